//! Error types for idalink.
//!
//! Errors fall into two groups. IPC failures (`Connection`, `Timeout`,
//! `Protocol`) are swallowed at the discovery and query boundary and turned
//! into `None`/`false`. Launch failures carry the readiness phase that failed
//! so callers can tell a crashed binary from a slow one.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for idalink.
#[derive(Debug, Error)]
pub enum IdaLinkError {
    // IPC errors
    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    #[error("Timed out after {timeout:?} waiting on {endpoint}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Launch errors
    #[error("{message}")]
    Launch {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("startup timeout after {}s during {phase}", timeout.as_secs_f64())]
    StartupTimeout { phase: String, timeout: Duration },

    // Resolution errors
    #[error("Workspace file {name} not found in search paths {search_roots:?}")]
    WorkspaceNotFound {
        name: String,
        search_roots: Vec<PathBuf>,
    },

    #[error("No IDA installation configured. Use: idalink install add <name> <dir> --default")]
    NoInstallation,

    #[error("No running instance has {name} open{}", open_list(.open_workspaces))]
    NoMatchingInstance {
        name: String,
        open_workspaces: Vec<String>,
    },

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid link {uri}: {message}")]
    InvalidLink { uri: String, message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

fn open_list(open_workspaces: &[String]) -> String {
    if open_workspaces.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nCurrently open databases:");
    for name in open_workspaces {
        out.push_str("\n  - ");
        out.push_str(name);
    }
    out
}

/// Result type alias for idalink operations.
pub type Result<T> = std::result::Result<T, IdaLinkError>;

impl From<std::io::Error> for IdaLinkError {
    fn from(err: std::io::Error) -> Self {
        IdaLinkError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for IdaLinkError {
    fn from(err: serde_json::Error) -> Self {
        IdaLinkError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl IdaLinkError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        IdaLinkError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        IdaLinkError::Protocol {
            message: message.into(),
        }
    }

    /// Create a launch error without an exit code.
    pub fn launch(message: impl Into<String>) -> Self {
        IdaLinkError::Launch {
            message: message.into(),
            exit_code: None,
        }
    }

    /// Exit code of the launched process, if it died during startup.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            IdaLinkError::Launch { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Readiness phase tag for startup timeouts.
    pub fn phase(&self) -> Option<&str> {
        match self {
            IdaLinkError::StartupTimeout { phase, .. } => Some(phase),
            _ => None,
        }
    }
}
