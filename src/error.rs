use thiserror::Error;

/// Reasons a loaded document cannot be turned into a current `WordBook`.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document is not a JSON object")]
    NotAnObject,

    #[error("document has no spec tag")]
    MissingSpec,

    #[error("unrecognized document spec {0:?}")]
    UnrecognizedSpec(String),

    #[error("unsupported schema version {0:?}")]
    UnsupportedVersion(String),

    #[error("document has no word list")]
    MissingWords,

    #[error("schema migration did not converge after {0} steps")]
    MigrationDidNotConverge(usize),

    #[error("malformed document: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such book: {0}")]
    NotFound(String),

    #[error("invalid book id {0:?}")]
    InvalidId(String),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures while importing or exporting a book file.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Document(#[from] DocumentError),
}
