//! Running IDA instances.
//!
//! An [`Instance`] is a snapshot: discovery produces existence-only records,
//! `get_info` fills in the open database. Nothing here is persisted.

mod discovery;

pub use discovery::{Discovery, WorkspaceLookup};

use crate::ipc::InfoResponse;
use serde::Serialize;

/// A running IDA process reachable over IPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pid: u32,
    endpoint: String,
    workspace_name: Option<String>,
    workspace_path: Option<String>,
    has_workspace: bool,
}

impl Instance {
    /// Instance known only to exist; nothing has been asked of it yet.
    pub fn existence(pid: u32, endpoint: impl Into<String>) -> Self {
        Self {
            pid,
            endpoint: endpoint.into(),
            workspace_name: None,
            workspace_path: None,
            has_workspace: false,
        }
    }

    /// Instance described by a `get_info` response.
    ///
    /// A response claiming an open database without both its name and path
    /// is treated as having none.
    pub fn from_info(pid: u32, endpoint: impl Into<String>, info: InfoResponse) -> Self {
        match (info.has_idb, info.idb_name, info.idb_path) {
            (true, Some(name), Some(path)) => Self {
                pid,
                endpoint: endpoint.into(),
                workspace_name: Some(name),
                workspace_path: Some(path),
                has_workspace: true,
            },
            _ => Self::existence(pid, endpoint),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// File name of the open database, e.g. `sample.i64`.
    pub fn workspace_name(&self) -> Option<&str> {
        self.workspace_name.as_deref()
    }

    pub fn workspace_path(&self) -> Option<&str> {
        self.workspace_path.as_deref()
    }

    pub fn has_workspace(&self) -> bool {
        self.has_workspace
    }

    /// Case-insensitive comparison against the open database's name.
    pub fn matches_workspace(&self, name: &str) -> bool {
        self.workspace_name
            .as_deref()
            .is_some_and(|open| workspace_names_match(open, name))
    }
}

/// Database names compare case-insensitively.
pub fn workspace_names_match(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}
