use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Import-side values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnKind {
    Debit,
    Credit,
    Fee,
    Transfer,
    Other,
}

impl TxnKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
            Self::Fee => "fee",
            Self::Transfer => "transfer",
            Self::Other => "other",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "debit" => Some(Self::Debit),
            "credit" => Some(Self::Credit),
            "fee" => Some(Self::Fee),
            "transfer" => Some(Self::Transfer),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Kind implied by the sign of an amount when the statement doesn't say.
    pub fn from_amount(amount_minor: i64) -> Self {
        if amount_minor < 0 {
            Self::Debit
        } else {
            Self::Credit
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Csv,
    Spreadsheet,
    Manual,
    BankFeed,
}

impl SourceKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Spreadsheet => "spreadsheet",
            Self::Manual => "manual",
            Self::BankFeed => "bank_feed",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "csv" => Some(Self::Csv),
            "spreadsheet" => Some(Self::Spreadsheet),
            "manual" => Some(Self::Manual),
            "bank_feed" => Some(Self::BankFeed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    pub id: String,
    pub kind: String,
}

/// One normalized bank statement row, as handed over by a format parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalTransactionRow {
    pub date: String,
    pub description: String,
    pub amount_minor: i64,
    pub balance_minor: Option<i64>,
    pub operation_date: Option<String>,
    pub category: Option<String>,
    pub counterparty: Option<Counterparty>,
    pub kind: TxnKind,
    pub account_id: String,
    pub source: SourceKind,
}

#[derive(Debug, Clone)]
pub struct ImportBatch {
    pub org_id: String,
    pub account_id: String,
    pub source: SourceKind,
    pub file_name: Option<String>,
    pub total_rows: usize,
    pub rows: Vec<CanonicalTransactionRow>,
}

impl ImportBatch {
    pub fn new(
        org_id: &str,
        account_id: &str,
        source: SourceKind,
        file_name: Option<&str>,
        rows: Vec<CanonicalTransactionRow>,
    ) -> Self {
        Self {
            org_id: org_id.to_string(),
            account_id: account_id.to_string(),
            source,
            file_name: file_name.map(str::to_string),
            total_rows: rows.len(),
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRow {
    pub id: String,
    pub signature: String,
    pub row: CanonicalTransactionRow,
}

// ---------------------------------------------------------------------------
// Persisted documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    SplitUndone,
}

/// Lifecycle of a transaction document. Archived records stay in the store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxnState {
    #[default]
    Active,
    Archived {
        reason: ArchiveReason,
        actor: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub account_id: String,
    pub date: String,
    pub description: String,
    pub amount_minor: i64,
    #[serde(default)]
    pub import_fingerprint: Option<String>,
    /// Canonical signature of the imported row this record came from.
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub is_split: bool,
    #[serde(default)]
    pub split_child_ids: Vec<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Set when the transaction has been posted to an external ledger.
    #[serde(default)]
    pub ledger_ref: Option<String>,
    #[serde(default)]
    pub state: TxnState,
}

impl Transaction {
    pub fn from_prepared(prepared: &PreparedRow, fingerprint: &str) -> Self {
        Self {
            id: prepared.id.clone(),
            account_id: prepared.row.account_id.clone(),
            date: prepared.row.date.clone(),
            description: prepared.row.description.clone(),
            amount_minor: prepared.row.amount_minor,
            import_fingerprint: Some(fingerprint.to_string()),
            signature: Some(prepared.signature.clone()),
            is_split: false,
            split_child_ids: Vec::new(),
            parent_id: None,
            ledger_ref: None,
            state: TxnState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TxnState::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOperation {
    Split,
    UndoSplit,
    Remittance,
}

impl LockOperation {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Split => "split",
            Self::UndoSplit => "undo_split",
            Self::Remittance => "remittance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLock {
    pub resource_key: String,
    pub operation: LockOperation,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
}

/// Entry in the prior-imports index, keyed by import fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRun {
    pub fingerprint: String,
    pub account_id: String,
    pub source: SourceKind,
    pub file_name: Option<String>,
    pub row_count: usize,
    pub status: RunStatus,
    pub actor: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    pub imported: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDocument {
    pub id: String,
    pub description: String,
    pub amount_minor: i64,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub remittance_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remittance {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub total_minor: i64,
    pub item_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItem {
    pub id: String,
    pub document_id: String,
    pub amount_minor: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrebankRemittance {
    pub id: String,
    pub remittance_id: String,
    pub total_minor: i64,
    pub created_at: DateTime<Utc>,
}
