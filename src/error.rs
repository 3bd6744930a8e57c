use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure modes of the pipeline stages.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot connect to store: {0}")]
    Connection(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("browser session error: {0}")]
    Session(String),

    #[error("extraction error: {0}")]
    Extraction(String),
}

/// A single page could not be retrieved or did not render in time.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("timed out after {secs}s waiting for {url}")]
    Timeout { url: String, secs: u64 },

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        // Display only says "db error" for server-side failures
        match e.as_db_error() {
            Some(db) => Error::Store(format!("{}: {}", db.code().code(), db.message())),
            None => Error::Store(e.to_string()),
        }
    }
}

impl Error {
    /// Per-item failures during enrichment; anything else ends the stage.
    pub fn is_item_failure(&self) -> bool {
        matches!(self, Error::Fetch(_) | Error::Extraction(_))
    }
}
