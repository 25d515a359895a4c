use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

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

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration file not found: {0}")]
    ConfigMissing(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse {path}: {reason}")]
    DocumentParse { path: PathBuf, reason: String },

    #[error("index at {path} exists but cannot be opened: {reason}")]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error(
        "index at {path} holds {stored}-dimension vectors but the embedder \
         produces {configured}; run `archivit rebuild`"
    )]
    EmbeddingDimension {
        path: PathBuf,
        stored: usize,
        configured: usize,
    },

    #[error(
        "index at {0} is locked by another writer; remove the lock file if \
         no other archivit process is running"
    )]
    IndexLocked(PathBuf),

    #[error("no index loaded; run `archivit rebuild` first")]
    IndexNotLoaded,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Process exit code reported by the CLI for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::ConfigMissing(_) | Error::Config(_) => 2,
            Error::IndexNotLoaded => 3,
            Error::IndexCorrupt { .. } | Error::EmbeddingDimension { .. } => 4,
            _ => 1,
        }
    }
}
