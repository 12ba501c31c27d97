mod cli;
mod db;
mod error;
mod family;
mod fingerprint;
mod fmt;
mod importer;
mod lock;
mod models;
mod paths;
mod remittance;
mod settings;
mod splitter;
mod store;

use clap::Parser;

use cli::{Cli, Commands, Context, FamilyCommands};

fn run(cli: Cli) -> error::Result<()> {
    let ctx = Context::from_cli(&cli)?;
    match cli.command {
        Commands::Init => cli::init::run(&ctx),
        Commands::Import {
            file,
            account,
            source,
        } => cli::import::run(&ctx, &file, &account, &source),
        Commands::Transactions { all } => cli::transactions::list(&ctx, all),
        Commands::Split { parent, amounts } => cli::split::split(&ctx, &parent, &amounts),
        Commands::UndoSplit { parent } => cli::split::undo(&ctx, &parent),
        Commands::Pending {
            description,
            amount,
            due,
        } => cli::remit::pending(&ctx, &description, &amount, due.as_deref()),
        Commands::Remit => cli::remit::remit(&ctx),
        Commands::Remittances => cli::remit::list(&ctx),
        Commands::Stage { remittance } => cli::remit::stage(&ctx, &remittance),
        Commands::Family { command } => match command {
            FamilyCommands::Plan => cli::family::plan(&ctx),
            FamilyCommands::Delete { batch_size, yes } => cli::family::delete(&ctx, batch_size, yes),
        },
        Commands::Locks => cli::locks::list(&ctx),
        Commands::Status => cli::status::run(&ctx),
    }
}

fn main() {
    pretty_env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
