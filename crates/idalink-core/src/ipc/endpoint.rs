//! Endpoint naming: `<root><prefix><pid>`.
//!
//! On POSIX the root is a directory holding Unix domain sockets
//! (`/tmp/ida_ipc_<pid>`); on Windows it is the named pipe namespace
//! (`\\.\pipe\ida_ipc_<pid>`). The root is configurable so tests can point
//! discovery at a scratch directory.

use crate::config::IpcConfig;
use std::path::{Path, PathBuf};

/// Where IDA instances publish their IPC endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointNamespace {
    root: PathBuf,
    prefix: String,
}

impl Default for EndpointNamespace {
    fn default() -> Self {
        #[cfg(unix)]
        let root = PathBuf::from(IpcConfig::ENDPOINT_DIR);
        #[cfg(windows)]
        let root = PathBuf::from(IpcConfig::PIPE_NAMESPACE);
        #[cfg(not(any(unix, windows)))]
        let root = std::env::temp_dir();

        Self {
            root,
            prefix: IpcConfig::ENDPOINT_PREFIX.to_string(),
        }
    }
}

impl EndpointNamespace {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    /// Namespace rooted at `dir` with the standard prefix.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, IpcConfig::ENDPOINT_PREFIX)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Endpoint address for a given PID.
    pub fn endpoint_for(&self, pid: u32) -> String {
        let name = format!("{}{}", self.prefix, pid);
        #[cfg(windows)]
        {
            let root = self.root.to_string_lossy();
            if root.ends_with('\\') {
                format!("{}{}", root, name)
            } else {
                format!("{}\\{}", root, name)
            }
        }
        #[cfg(not(windows))]
        {
            self.root.join(name).to_string_lossy().into_owned()
        }
    }

    /// True if a bare file name looks like one of our endpoints.
    pub fn matches_name(&self, name: &str) -> bool {
        name.starts_with(&self.prefix)
    }

    /// Parse the PID out of an endpoint address or bare endpoint name.
    ///
    /// Returns `None` when the name does not carry the prefix or the
    /// remainder is not a decimal PID.
    pub fn parse_pid(&self, endpoint: &str) -> Option<u32> {
        let name = endpoint
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(endpoint);
        let digits = name.strip_prefix(&self.prefix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}
