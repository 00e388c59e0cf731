//! Error types for the analysis engine and its collaborators

use thiserror::Error;

/// Failures that abort an analysis call.
///
/// Short history, data gaps and zero-range bars are not errors: they are
/// reported through `DataQuality` flags or handled by policy.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A parameter is outside its domain (negative window, Vth <= 0, ...)
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// A bar violates the OHLCV invariants and cannot be ordered or typed
    #[error("malformed bar at index {index}: {reason}")]
    MalformedBar { index: usize, reason: String },

    /// Nothing to analyse
    #[error("bar series is empty")]
    EmptySeries,

    /// Bars could not be fetched from the retrieval collaborator
    #[error("bar retrieval failed: {0}")]
    Source(#[from] BarSourceError),

    /// Timeline state could not be read or written
    #[error("timeline store failed: {0}")]
    Store(#[from] StoreError),
}

/// Typed failure of the bar-retrieval collaborator
#[derive(Debug, Error)]
pub enum BarSourceError {
    #[error("invalid ticker: {0}")]
    InvalidTicker(String),

    #[error("no data for {0}")]
    NoData(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider error: {0}")]
    Provider(String),
}

/// Failure of a timeline persistence backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Another writer kept winning the compare-and-swap
    #[error("gave up after {attempts} conflicting writes for {subject}")]
    Contention { subject: String, attempts: usize },
}
