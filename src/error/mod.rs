use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("Navigation error: {0}")]
    Navigation(#[from] NavigationError),

    #[error("Quote error: {0}")]
    Quote(#[from] QuoteError),

    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors from fetching data out of the story service.
///
/// `Clone` because a single in-flight page fetch hands its result to every
/// caller attached to it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error("Story service unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {message}")]
    Malformed { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Network error: {message}")]
    Network { message: String },
}

impl LoadError {
    /// Whether retrying the same request can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LoadError::Api { status, .. } => *status >= 500 || *status == 429,
            LoadError::Malformed { .. } => false,
            _ => true,
        }
    }
}

impl From<reqwest::Error> for LoadError {
    fn from(err: reqwest::Error) -> Self {
        LoadError::Network {
            message: err.to_string(),
        }
    }
}

/// Sibling navigation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NavigationError {
    #[error("Level index {index} out of range (loaded levels: {len})")]
    LevelOutOfRange { index: usize, len: usize },

    #[error("Node {node_id} is not a sibling at level {level_number}")]
    SiblingNotFound { level_number: u32, node_id: String },

    #[error("Node {node_id} is already focused at level {level_number}")]
    AlreadyFocused { node_id: String, level_number: u32 },
}

/// Quote resolution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuoteError {
    #[error("Selection is empty")]
    EmptySelection,

    #[error("Invalid quote range {start}..{end} for text of length {len}")]
    InvalidRange { start: usize, end: usize, len: usize },

    #[error("Rendered markup does not match the node text")]
    MarkupMismatch,
}

/// Duplicate group aggregation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error("Threshold {threshold} outside [0, 1]")]
    InvalidThreshold { threshold: f64 },

    #[error("Reply not found in group: {reply_id}")]
    ReplyNotInGroup { reply_id: String },
}

/// A duplicate whose similarity score falls below its group's threshold.
///
/// Reported alongside the group rather than returned as a failure; the
/// offending member is left out of the ranked group.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Reply {reply_id} has similarity {score} below group threshold {threshold}")]
pub struct ThresholdViolation {
    pub reply_id: String,
    pub score: f64,
    pub threshold: f64,
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for story service loads
pub type LoadResult<T> = Result<T, LoadError>;
