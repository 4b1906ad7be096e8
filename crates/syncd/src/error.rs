//! Error types for netsyncd

use netsync_core::SyncError;
use netsync_extract::ExtractError;
use thiserror::Error;

/// Failure talking to one device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The device could not be reached at all
    #[error("Device {host} unreachable: {message}")]
    DeviceUnreachable { host: String, message: String },

    /// The session was refused
    #[error("Authentication failed for {host}: {message}")]
    AuthenticationFailed { host: String, message: String },

    /// A command did not finish in time
    #[error("Command '{command}' on {host} timed out after {seconds}s")]
    Timeout {
        host: String,
        command: String,
        seconds: u64,
    },

    /// The device rejected a single command
    #[error("Command '{command}' on {host} failed (exit code {exit_code}): {output}")]
    CommandFailed {
        host: String,
        command: String,
        exit_code: i32,
        output: String,
    },

    /// The transport process could not be started
    #[error("Failed to spawn transport for {host}: {message}")]
    Spawn { host: String, message: String },

    /// The transport answered with results that do not match the commands
    /// it was given
    #[error("Unexpected outputs from {host}: {message}")]
    UnexpectedOutputs { host: String, message: String },
}

impl CommandError {
    /// Creates a device-unreachable error.
    pub fn unreachable(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceUnreachable {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error makes every further command on the host
    /// pointless, so the whole host is marked failed.
    pub fn is_host_fatal(&self) -> bool {
        !matches!(self, CommandError::CommandFailed { .. })
    }

    /// Returns true if the transport broke its contract. Such errors abort
    /// the run instead of excluding one host.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, CommandError::UnexpectedOutputs { .. })
    }

    /// Returns the host the error refers to.
    pub fn host(&self) -> &str {
        match self {
            CommandError::DeviceUnreachable { host, .. }
            | CommandError::AuthenticationFailed { host, .. }
            | CommandError::Timeout { host, .. }
            | CommandError::CommandFailed { host, .. }
            | CommandError::Spawn { host, .. }
            | CommandError::UnexpectedOutputs { host, .. } => host,
        }
    }
}

/// Errors that stop a sync job before or around reconciliation.
#[derive(Error, Debug)]
pub enum JobError {
    /// Engine error (type order, fatal apply error)
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Mapping table error
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for job operations
pub type Result<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_fatal_classification() {
        assert!(CommandError::unreachable("10.0.0.1", "no route").is_host_fatal());
        assert!(CommandError::Timeout {
            host: "10.0.0.1".into(),
            command: "show version".into(),
            seconds: 30,
        }
        .is_host_fatal());
        let failed = CommandError::CommandFailed {
            host: "10.0.0.1".into(),
            command: "show inventory".into(),
            exit_code: 1,
            output: "% Invalid input".into(),
        };
        assert!(!failed.is_host_fatal());
        assert!(!failed.is_contract_violation());
        assert_eq!(failed.host(), "10.0.0.1");

        let mismatch = CommandError::UnexpectedOutputs {
            host: "10.0.0.1".into(),
            message: "output for unrequested command 'bogus'".into(),
        };
        assert!(mismatch.is_host_fatal());
        assert!(mismatch.is_contract_violation());
    }

    #[test]
    fn test_error_display() {
        let err = CommandError::unreachable("10.0.0.1", "connection refused");
        assert_eq!(err.to_string(), "Device 10.0.0.1 unreachable: connection refused");

        let err = JobError::Config("max_workers must be > 0".to_string());
        assert_eq!(err.to_string(), "Configuration error: max_workers must be > 0");
    }
}
