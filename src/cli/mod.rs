pub mod family;
pub mod import;
pub mod init;
pub mod locks;
pub mod remit;
pub mod split;
pub mod status;
pub mod transactions;

use clap::{Parser, Subcommand};

use crate::error::{Result, TallyError};
use crate::settings::{resolve, Settings};
use crate::store::Store;

#[derive(Parser)]
#[command(name = "tally", about = "Idempotent imports, guarded splits and family deletes for bookkeeping data.")]
pub struct Cli {
    /// Data directory holding tally.db (overrides settings)
    #[arg(long = "data-dir", global = true)]
    pub data_dir: Option<String>,
    /// Organization to operate on (overrides settings)
    #[arg(long, global = true)]
    pub org: Option<String>,
    /// Actor recorded in audit fields (overrides settings)
    #[arg(long, global = true)]
    pub actor: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the data directory and database.
    Init,
    /// Import a canonical CSV of statement rows.
    Import {
        /// Path to the CSV file (columns: date, description, amount, ...)
        file: String,
        /// Account id the rows belong to
        #[arg(long)]
        account: String,
        /// Source kind: csv, spreadsheet, manual, bank_feed
        #[arg(long, default_value = "csv")]
        source: String,
    },
    /// List transactions.
    Transactions {
        /// Include archived transactions
        #[arg(long)]
        all: bool,
    },
    /// Split a transaction into children.
    Split {
        /// Parent transaction id
        parent: String,
        /// Child amount, repeated once per child (e.g. --amount -60.00 --amount -40.00)
        #[arg(long = "amount", required = true, allow_hyphen_values = true)]
        amounts: Vec<String>,
    },
    /// Undo a split, archiving its children.
    UndoSplit {
        /// Parent transaction id
        parent: String,
    },
    /// Add a pending document awaiting remittance.
    Pending {
        description: String,
        /// Amount, e.g. 125.00
        #[arg(long, allow_hyphen_values = true)]
        amount: String,
        /// Due date: YYYY-MM-DD
        #[arg(long)]
        due: Option<String>,
    },
    /// Bundle pending documents into a remittance.
    Remit,
    /// List generated remittances.
    Remittances,
        /// Stage a remittance for the bank.
    Stage {
        /// Remittance id
        remittance: String,
    },
    /// Inspect or delete the organization's movements family.
    Family {
        #[command(subcommand)]
        command: FamilyCommands,
    },
    /// Show held process locks.
    Locks,
    /// Show database location and record counts.
    Status,
}

#[derive(Subcommand)]
pub enum FamilyCommands {
    /// Show what a delete would remove.
    Plan,
    /// Delete every record of the movements family.
    Delete {
        /// Paths per atomic batch (default from settings)
        #[arg(long = "batch-size")]
        batch_size: Option<usize>,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

/// Resolved settings plus the per-invocation overrides.
pub struct Context {
    pub settings: Settings,
    pub org_id: String,
    pub actor: String,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let settings = resolve(cli.data_dir.as_deref())?;
        Ok(Self {
            org_id: cli.org.clone().unwrap_or_else(|| settings.org_id.clone()),
            actor: cli.actor.clone().unwrap_or_else(|| settings.actor.clone()),
            settings,
        })
    }

    pub fn open_store(&self) -> Result<Store> {
        let db_path = self.settings.db_path();
        if !db_path.exists() {
            return Err(TallyError::Settings(format!(
                "No database found at {}\nRun `tally init` to create one.",
                db_path.display()
            )));
        }
        Ok(Store::open(&db_path)?.with_lock_ttl(self.settings.lock_ttl_secs))
    }
}
