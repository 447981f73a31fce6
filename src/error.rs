use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure classification shared by every component.
///
/// `Recoverable` and `retryable` are independent: a `DataContract` error is
/// typically recoverable by the user (re-enter the data) but must not be
/// retried automatically, while a `Connection` error is both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Endpoint unreachable or connection refused.
    Connection,
    /// Caller-supplied config or input violates a constraint.
    Validation,
    /// Remote call completed but reported failure.
    Generation,
    /// Storage read/write failure.
    Filesystem,
    /// Response shape violates the expected schema.
    DataContract,
    /// Operation exceeded its allotted time.
    Timeout,
    Unknown,
}

impl ErrorCategory {
    /// Whether the system remains consistent and the user may retry the
    /// broader action.
    pub fn default_recoverable(&self) -> bool {
        // Every category leaves the core in a consistent state; the flag
        // exists so constructors can override it for truly fatal cases.
        true
    }

    /// Whether the retry executor may re-invoke the same operation
    /// automatically.
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection | Self::Generation | Self::Timeout | Self::Unknown
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connection => "connection",
            Self::Validation => "validation",
            Self::Generation => "generation",
            Self::Filesystem => "filesystem",
            Self::DataContract => "data_contract",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Structured error value used across the orchestration core.
///
/// Immutable once constructed; carries enough detail for logging, retry
/// decisions, and targeted recovery guidance in the presentation layer.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TypedError {
    pub message: String,
    pub category: ErrorCategory,
    pub recoverable: bool,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

pub type Result<T> = std::result::Result<T, TypedError>;

impl TypedError {
    pub fn new(message: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            message: message.into(),
            category,
            recoverable: category.default_recoverable(),
            retryable: category.default_retryable(),
            details: Map::new(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Connection)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Validation)
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Generation)
    }

    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Filesystem).retryable(false)
    }

    pub fn data_contract(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::DataContract)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Timeout)
    }

    /// Wrap an unclassified failure. Unknown errors stay retryable so a
    /// transient fault that slipped classification is not surfaced on the
    /// first attempt.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Unknown)
    }

    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

impl From<std::io::Error> for TypedError {
    fn from(err: std::io::Error) -> Self {
        Self::filesystem(err.to_string())
            .with_detail("kind", format!("{:?}", err.kind()))
    }
}

impl From<serde_json::Error> for TypedError {
    fn from(err: serde_json::Error) -> Self {
        Self::data_contract(err.to_string())
    }
}

impl From<toml::de::Error> for TypedError {
    fn from(err: toml::de::Error) -> Self {
        Self::validation(err.to_string()).with_detail("source", "toml")
    }
}

impl From<reqwest::Error> for TypedError {
    fn from(err: reqwest::Error) -> Self {
        let base = if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_connect() {
            Self::connection(err.to_string())
        } else if err.is_decode() {
            Self::data_contract(err.to_string())
        } else if let Some(status) = err.status() {
            // Remote accepted the request but reported failure; 4xx (other
            // than 408/429) will not succeed on a blind re-send.
            let retryable = status.is_server_error() || matches!(status.as_u16(), 408 | 429);
            Self::generation(err.to_string())
                .retryable(retryable)
                .with_detail("status", status.as_u16())
        } else {
            Self::unknown(err.to_string())
        };
        match err.url() {
            Some(url) => base.with_detail("url", url.to_string()),
            None => base,
        }
    }
}
