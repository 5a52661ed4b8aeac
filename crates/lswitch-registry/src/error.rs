//! Error types for registry and linking operations.
//!
//! Every mutating call resolves to exactly one [`RegistryError`] kind (or
//! success), and every kind maps onto a stable wire [`Status`].

use std::time::Duration;
use thiserror::Error;

use crate::rpc::Status;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur while registering, linking or removing a program.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Malformed program name or config payload.
    #[error("Invalid input for {field}: {message}")]
    InvalidInput {
        /// The offending input (e.g., "program_name", "config_str").
        field: String,
        /// Error message.
        message: String,
    },

    /// Lookup or delete on a program that is not registered.
    #[error("Program '{program}' not found")]
    NotFound {
        /// The program name.
        program: String,
    },

    /// A newer write superseded this one before it could become active.
    #[error("Stale write for '{program}': version {version} superseded by {current}")]
    StaleVersion {
        /// The program name.
        program: String,
        /// The version this caller staged.
        version: u64,
        /// The newest version known to the store.
        current: u64,
    },

    /// The data-plane runtime refused to link the new config.
    #[error("Install of '{program}' rejected: {reason}")]
    InstallRejected {
        /// The program name.
        program: String,
        /// Reason reported by the runtime or the coordinator.
        reason: String,
    },

    /// The data-plane runtime refused to unlink the program.
    #[error("Removal of '{program}' rejected: {reason}")]
    RemoveRejected {
        /// The program name.
        program: String,
        /// Reason reported by the runtime.
        reason: String,
    },

    /// Another install/uninstall on the same program is in flight.
    #[error("Program '{program}' is busy with another operation")]
    Busy {
        /// The program name.
        program: String,
    },

    /// The data-plane runtime did not answer in time.
    #[error("Runtime {operation} of '{program}' timed out after {}ms", .after.as_millis())]
    Timeout {
        /// The program name.
        program: String,
        /// The runtime call that timed out ("install" or "uninstall").
        operation: String,
        /// The configured deadline.
        after: Duration,
    },
}

impl RegistryError {
    /// Creates an invalid input error.
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(program: impl Into<String>) -> Self {
        Self::NotFound {
            program: program.into(),
        }
    }

    /// Creates an install rejected error.
    pub fn install_rejected(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstallRejected {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Creates a remove rejected error.
    pub fn remove_rejected(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RemoveRejected {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Creates a busy error.
    pub fn busy(program: impl Into<String>) -> Self {
        Self::Busy {
            program: program.into(),
        }
    }

    /// Maps this error onto the wire status reported to callers.
    ///
    /// `StaleVersion` is an internal signal; callers see it as
    /// `InstallRejected` and must retry explicitly.
    pub fn status(&self) -> Status {
        match self {
            RegistryError::InvalidInput { .. } => Status::InvalidInput,
            RegistryError::NotFound { .. } => Status::NotFound,
            RegistryError::StaleVersion { .. } | RegistryError::InstallRejected { .. } => {
                Status::InstallRejected
            }
            RegistryError::RemoveRejected { .. } => Status::RemoveRejected,
            RegistryError::Busy { .. } => Status::Busy,
            RegistryError::Timeout { .. } => Status::Timeout,
        }
    }

    /// Returns true if a caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::Busy { .. }
                | RegistryError::Timeout { .. }
                | RegistryError::StaleVersion { .. }
        )
    }
}

/// Error reported by a data-plane runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime refused the operation.
    #[error("{reason}")]
    Rejected {
        /// Human readable reason.
        reason: String,
    },
}

impl RuntimeError {
    /// Creates a rejection.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Errors raised while loading daemon configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("Failed to parse {path}: {message}")]
    Parse {
        /// Path of the file.
        path: String,
        /// Parser message.
        message: String,
    },

    /// A value is out of range or inconsistent.
    #[error("Invalid configuration for {field}: {message}")]
    Invalid {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },
}

impl ConfigError {
    /// Creates a validation error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}
