/// Errors raised while mirroring a local tree onto the remote store.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Rate-limited or overloaded remote; safe to retry.
    #[error("Remote store overloaded: {0}")]
    Transient(String),

    /// The remote resource is missing data we require (e.g. a page title).
    #[error("Malformed remote data: {0}")]
    Malformed(String),

    #[error("Remote API error: {0}")]
    Remote(String),

    #[error("Unexpected response: {0}")]
    Response(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Whether the failure is a rate-limit/overload signal worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Transient(_) => true,
            SyncError::Context { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Whether the failure is caused by malformed remote data.
    pub fn is_malformed(&self) -> bool {
        match self {
            SyncError::Malformed(_) => true,
            SyncError::Context { source, .. } => source.is_malformed(),
            _ => false,
        }
    }

    /// Wrap the error with the page or file that was being processed.
    pub fn context(self, context: impl Into<String>) -> Self {
        SyncError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
