//! Error types for the provisioning engine
//!
//! Every failure raised while provisioning an order is one of these variants.
//! The variant decides whether the retry sweep will pick the order up again.

use thiserror::Error;

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the reseller back-office
#[derive(Error, Debug)]
pub enum Error {
    /// No provider, registry or connector is configured for the request
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Registry unreachable, TLS handshake or login failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// The registry answered a command with an explicit error
    #[error("{command} error: {message}")]
    RegistryProtocol {
        /// Registry command that failed (e.g. "DomainCreate")
        command: String,
        /// Registry message, verbatim
        message: String,
    },

    /// A mutating command was sent but no answer arrived in time.
    ///
    /// The registry may or may not have executed it.
    #[error("{command} outcome unknown: no response within {timeout_secs}s")]
    UnknownOutcome {
        /// Registry command that timed out
        command: String,
        /// Timeout that elapsed
        timeout_secs: u64,
    },

    /// An expected order, invoice or service row is missing or contradictory
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// The order's `<type>.<action>` has no provisioning workflow
    #[error("Unsupported service action: {0}")]
    UnsupportedAction(String),

    /// The invoice funding the order has not been paid
    #[error("Invoice {invoice_id} is not paid (payment status: {status})")]
    InvoiceNotPaid {
        /// Invoice identifier
        invoice_id: i64,
        /// Current payment status
        status: String,
    },

    /// Malformed order data or command input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Persistence backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stable, persistable classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Connection,
    RegistryProtocol,
    UnknownOutcome,
    Consistency,
    UnsupportedAction,
    InvoiceNotPaid,
    InvalidInput,
    Storage,
    Json,
}

impl ErrorKind {
    /// Snake-case name stored in order bookkeeping
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Connection => "connection",
            ErrorKind::RegistryProtocol => "registry_protocol",
            ErrorKind::UnknownOutcome => "unknown_outcome",
            ErrorKind::Consistency => "consistency",
            ErrorKind::UnsupportedAction => "unsupported_action",
            ErrorKind::InvoiceNotPaid => "invoice_not_paid",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Storage => "storage",
            ErrorKind::Json => "json",
        }
    }

    /// Parse a stored kind name
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name {
            "configuration" => ErrorKind::Configuration,
            "connection" => ErrorKind::Connection,
            "registry_protocol" => ErrorKind::RegistryProtocol,
            "unknown_outcome" => ErrorKind::UnknownOutcome,
            "consistency" => ErrorKind::Consistency,
            "unsupported_action" => ErrorKind::UnsupportedAction,
            "invoice_not_paid" => ErrorKind::InvoiceNotPaid,
            "invalid_input" => ErrorKind::InvalidInput,
            "storage" => ErrorKind::Storage,
            "json" => ErrorKind::Json,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether an order that failed with this kind may be re-attempted
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Connection
                | ErrorKind::RegistryProtocol
                | ErrorKind::UnknownOutcome
                | ErrorKind::Storage
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a registry protocol error carrying the registry's message
    pub fn registry(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RegistryProtocol {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create an unknown-outcome error for a timed-out command
    pub fn unknown_outcome(command: impl Into<String>, timeout_secs: u64) -> Self {
        Self::UnknownOutcome {
            command: command.into(),
            timeout_secs,
        }
    }

    /// Create a consistency error
    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::Consistency(msg.into())
    }

    /// Create an unsupported-action error
    pub fn unsupported(service_type: impl Into<String>) -> Self {
        Self::UnsupportedAction(service_type.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Connection(_) => ErrorKind::Connection,
            Error::RegistryProtocol { .. } => ErrorKind::RegistryProtocol,
            Error::UnknownOutcome { .. } => ErrorKind::UnknownOutcome,
            Error::Consistency(_) => ErrorKind::Consistency,
            Error::UnsupportedAction(_) => ErrorKind::UnsupportedAction,
            Error::InvoiceNotPaid { .. } => ErrorKind::InvoiceNotPaid,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Json(_) => ErrorKind::Json,
        }
    }

    /// Whether the retry sweep should re-attempt an order that failed this way
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
