//! # PushKit Common
//!
//! Shared error types and logging configuration for the PushKit
//! background agent.
//!
//! ## Features
//!
//! - Unified error type for callers that aggregate across subsystems
//! - Logging configuration and setup on top of `tracing`
//! - Result and Option extension traits

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for PushKit.
///
/// Subsystem crates carry their own error enums; this type is the
/// aggregation point for binaries and hosts that drive several
/// subsystems at once.
#[derive(Error, Debug)]
pub enum PushKitError {
    /// Cache bucket errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Notification display or routing errors.
    #[error("Notification error: {message}")]
    Notification {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Worker lifecycle errors.
    #[error("Lifecycle error: {message}")]
    Lifecycle {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Client (window/tab) errors.
    #[error("Client error: {message}")]
    Client {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl PushKitError {
    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a notification error.
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
            source: None,
        }
    }

    /// Create a lifecycle error.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
            source: None,
        }
    }

    /// Create a client error.
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            PushKitError::Cache { .. } => "cache",
            PushKitError::Network { .. } => "network",
            PushKitError::Notification { .. } => "notification",
            PushKitError::Lifecycle { .. } => "lifecycle",
            PushKitError::Client { .. } => "client",
            PushKitError::Io(_) => "io",
            PushKitError::NotFound(_) => "not_found",
            PushKitError::InvalidArgument(_) => "invalid_argument",
            PushKitError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for PushKit operations.
pub type Result<T> = std::result::Result<T, PushKitError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| PushKitError::Internal {
            message: format!("{}: {}", message.into(), e),
            backtrace: Some(backtrace::Backtrace::new()),
        })
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| PushKitError::NotFound(resource.into()))
    }
}
