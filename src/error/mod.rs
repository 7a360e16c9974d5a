//! Error types for arbor.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all arbor operations.
#[derive(Error, Debug)]
pub enum ArborError {
    /// Malformed agent/tool wiring, detected when the tree is built.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Tool execution error: {tool_name}: {message}")]
    Tool { tool_name: String, message: String },

    #[error("State key not found: {0}")]
    StateKeyNotFound(String),

    #[error("State error for key '{key}': {message}")]
    State { key: String, message: String },

    #[error("Transfer target not found: {0}")]
    Transfer(String),

    #[error("Session not found: {app_name}/{user_id}/{session_id}")]
    SessionNotFound {
        app_name: String,
        user_id: String,
        session_id: String,
    },

    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("{hook} callback failed: {message}")]
    Callback { hook: &'static str, message: String },

    #[error("LLM call limit exceeded (max_llm_calls={0})")]
    LlmCallLimit(usize),

    #[error("Output validation failed: {0}")]
    OutputValidation(String),

    #[error("Remote agent error: {agent}: {message}")]
    Remote { agent: String, message: String },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Run canceled")]
    Canceled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ArborError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    pub fn callback(hook: &'static str, message: impl Into<String>) -> Self {
        Self::Callback {
            hook,
            message: message.into(),
        }
    }

    pub fn state(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::State {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Model(_) | Self::LlmCallLimit(_) | Self::OutputValidation(_) => {
                ErrorCategory::Model
            }
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Model,
            },
            Self::Tool { .. } => ErrorCategory::Tool,
            Self::StateKeyNotFound(_) | Self::State { .. } => ErrorCategory::State,
            Self::Transfer(_) => ErrorCategory::Transfer,
            Self::SessionNotFound { .. } | Self::SessionExists(_) | Self::ArtifactNotFound(_) => {
                ErrorCategory::Storage
            }
            Self::Callback { .. } => ErrorCategory::Callback,
            Self::Remote { .. } | Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Canceled => ErrorCategory::Canceled,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::InvalidArgument(_) | Self::Io(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether a caller could reasonably retry. The orchestration core never
    /// retries on its own; this is advice for capability clients.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }

    /// Whether the error ends the whole run rather than a single step.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Transfer | ErrorCategory::Canceled
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration | ErrorCategory::Transfer => {
                RecoverySuggestion::CheckConfiguration
            }
            ErrorCategory::Tool | ErrorCategory::Callback => {
                RecoverySuggestion::CheckToolImplementation
            }
            ErrorCategory::State => RecoverySuggestion::SupplyDefault,
            _ => RecoverySuggestion::ContactSupport,
        }
    }

    /// Stable machine-readable code recorded on terminal error events.
    pub fn code(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "CONFIGURATION_ERROR",
            ErrorCategory::Model => "MODEL_ERROR",
            ErrorCategory::Authentication => "AUTHENTICATION_ERROR",
            ErrorCategory::RateLimit => "RATE_LIMITED",
            ErrorCategory::Server => "SERVER_ERROR",
            ErrorCategory::Tool => "TOOL_ERROR",
            ErrorCategory::State => "STATE_ERROR",
            ErrorCategory::Transfer => "TRANSFER_ERROR",
            ErrorCategory::Storage => "STORAGE_ERROR",
            ErrorCategory::Callback => "CALLBACK_ERROR",
            ErrorCategory::Network => "NETWORK_ERROR",
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::Canceled => "CANCELED",
            ErrorCategory::Serialization => "SERIALIZATION_ERROR",
            ErrorCategory::Unknown => "UNKNOWN_ERROR",
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ArborError>;
