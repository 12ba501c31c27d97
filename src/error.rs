use thiserror::Error;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another holder owns the process lock for this resource.
    #[error("Resource {key} is busy (held by {holder} for {operation})")]
    Busy {
        key: String,
        holder: String,
        operation: String,
    },

    /// An atomic write would exceed the store's batch limit.
    #[error("Operation needs {needed} writes in one batch, limit is {limit}")]
    Capacity { needed: usize, limit: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("{0} transaction(s) are still linked to an external ledger")]
    LedgerLinked(usize),

    #[error("Settings error: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, TallyError>;
