use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("model error: {0}")]
    Model(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error(
        "invalid fragment parameters: size {size} must exceed overlap {overlap}"
    )]
    InvalidFragmentParams { size: usize, overlap: usize },

    #[error("no ranking results: no candidate produced a retrievable fragment")]
    NoRankingResults,

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

