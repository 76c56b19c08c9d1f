//! Error types for Warden.

use thiserror::Error;

/// Primary error type for all Warden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid arguments for tool {tool_name}: {message}")]
    InvalidToolArguments { tool_name: String, message: String },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Turn exceeded max iterations ({0})")]
    IterationLimit(usize),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Failures of a single permission round-trip.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("permission request {0} not found")]
    NotFound(String),

    #[error("permission request {request_id} timed out after {after_ms}ms")]
    TimedOut { request_id: String, after_ms: u64 },

    #[error("permission request {0} was cancelled")]
    Cancelled(String),

    #[error("permission request {0} is already being awaited")]
    AlreadyAwaited(String),
}

/// Broad error category, following the runtime's failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    ToolExecution,
    Permission,
    Timeout,
    Authorization,
    Transport,
    Storage,
    Configuration,
    Unknown,
}

impl WardenError {
    /// Create a provider transport error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an argument validation error for a tool.
    pub fn invalid_arguments(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidToolArguments {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a tool runtime error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ToolNotFound(_) | Self::InvalidToolArguments { .. } => ErrorCategory::Validation,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Permission(PermissionError::TimedOut { .. }) => ErrorCategory::Timeout,
            Self::Permission(_) => ErrorCategory::Permission,
            Self::Unauthorized(_) => ErrorCategory::Authorization,
            Self::Provider { .. } | Self::RateLimited { .. } | Self::Stream(_) => {
                ErrorCategory::Transport
            }
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Storage(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Configuration(_) | Self::ConfigParse(_) => ErrorCategory::Configuration,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether opening the provider stream may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }

    /// True when this is a permission wait that ran out of time.
    pub fn is_permission_timeout(&self) -> bool {
        matches!(self, Self::Permission(PermissionError::TimedOut { .. }))
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, WardenError>;
