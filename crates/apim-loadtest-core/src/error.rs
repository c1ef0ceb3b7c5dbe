use thiserror::Error;

/// Canonical error type for the load harness.
#[derive(Debug, Error)]
pub enum LoadTestError {
    /// Settings are missing or contradict each other.
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable explanation of the bad setting.
        message: String,
    },

    /// `LOAD_PATTERN` named a schedule that does not exist.
    #[error("unhandled load pattern: {0}")]
    UnknownLoadPattern(String),

    /// `REQUEST_TYPE` named a request shape that does not exist.
    #[error("unhandled request type: {0}")]
    UnknownRequestType(String),

    /// Lifecycle hook fired out of order.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid transition.
        message: String,
    },

    /// Transport or protocol failure talking to an HTTP collaborator.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A collaborator answered with a status the harness cannot continue from.
    #[error("{service} returned {status}: {body}")]
    UnexpectedStatus {
        /// Collaborator name (e.g. `"simulator"`).
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Token acquisition for the analytics store failed.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Analytics query returned something the reporter cannot interpret.
    #[error("query error: {0}")]
    Query(String),

    /// URL could not be built from configured endpoints.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// I/O error while writing report output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registry or export error.
    #[error("metrics error: {0}")]
    Metrics(String),
}

impl LoadTestError {
    /// Creates a `Config` variant.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for LoadTestError {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}

impl From<prometheus::Error> for LoadTestError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}

/// Convenient result alias for harness operations.
pub type LoadTestResult<T> = Result<T, LoadTestError>;
