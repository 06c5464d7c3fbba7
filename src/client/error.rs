use thiserror::Error;

/// Failures the query client surfaces to callers.
///
/// Remote failures never appear here: the client is total with respect to
/// them and reports per-server statuses inside the response instead. Only
/// programmer errors and truly unexpected failures escape.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cannot serialize request body: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
