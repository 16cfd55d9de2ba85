use std::time::Duration;

use thiserror::Error;

use crate::download::strategy::Strategy;

/// Centralized error type for the acquisition pipeline
///
/// Every collaborator (yt-dlp, innertube, ffmpeg, delivery) reports failures through
/// this enum. The classifier in `download::classify` maps it onto an `ErrorClass`,
/// which in turn drives retry, fallback and the user-facing message.
///
/// # Example
///
/// ```no_run
/// use ytmux::core::error::AppError;
///
/// fn handle_error(err: AppError) {
///     eprintln!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Request rejected before any resource was allocated
    #[error("{0}")]
    Input(String),

    /// External tool cannot be launched at all (missing binary, broken bundle)
    #[error("{tool} is not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    /// Provider reported a failure; the message carries its raw diagnostic text
    #[error("{strategy} provider error: {message}")]
    Provider { strategy: Strategy, message: String },

    /// Provider response no longer matches the expected shape
    #[error("Unexpected provider response: {0}")]
    ResponseShape(String),

    /// Search collaborator failed
    #[error("Search failed: {0}")]
    Search(String),

    /// Elementary stream broke while feeding the merge
    #[error("Stream error: {0}")]
    Stream(String),

    /// Transcoder could not be spawned or exited unsuccessfully
    #[error("Merge failed: {0}")]
    Merge(String),

    /// Fallback merge exceeded its wall-clock budget
    #[error("Merge timed out after {}s", .0.as_secs())]
    MergeTimeout(Duration),

    /// An external command exceeded its timeout
    #[error("{program} timed out after {}s", .after.as_secs())]
    ProcessTimeout { program: String, after: Duration },

    #[error("Video is too long ({duration_secs}s, max {limit_secs}s)")]
    DurationExceeded { duration_secs: u64, limit_secs: u64 },

    #[error("File too large: {size_bytes} bytes (max {limit_bytes})")]
    SizeExceeded { size_bytes: u64, limit_bytes: u64 },

    /// Merged artifact is missing, empty or not a recognizable container
    #[error("Invalid output: {0}")]
    InvalidArtifact(String),

    /// Outbound delivery failed
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// HTTP/Fetch errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP status code errors
    #[error("HTTP request failed with status: {0}")]
    HttpStatus(reqwest::StatusCode),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// JSON decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Shorthand for a provider failure carrying raw diagnostic text.
    pub fn provider(strategy: Strategy, message: impl Into<String>) -> Self {
        AppError::Provider {
            strategy,
            message: message.into(),
        }
    }

    /// True when the error came out of the transcoder (spawn, exit status, timeout).
    pub fn is_merge_failure(&self) -> bool {
        matches!(self, AppError::Merge(_) | AppError::MergeTimeout(_))
    }
}
