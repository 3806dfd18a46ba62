//! Instance discovery.
//!
//! Endpoints are found by name (`<prefix><pid>`), filtered by PID liveness,
//! and optionally queried with `get_info`. Dead endpoints left behind by
//! crashed instances are removed on the way. None of the operations here
//! return IPC errors: an instance that cannot be reached is simply absent.

use super::Instance;
use crate::ipc::{EndpointNamespace, IpcClient, LocalTransport, Transport};
use crate::platform::{ProcessProbe, SystemProbe};
use tracing::debug;

/// Outcome of [`Discovery::lookup_workspace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceLookup {
    Found(Instance),
    /// No instance has the database; `open_workspaces` lists what the
    /// reachable instances have open, in PID order.
    NotOpen { open_workspaces: Vec<String> },
}

/// Finds and queries running instances.
#[derive(Debug, Clone)]
pub struct Discovery<T: Transport = LocalTransport, P: ProcessProbe = SystemProbe> {
    client: IpcClient<T>,
    probe: P,
    namespace: EndpointNamespace,
}

impl Default for Discovery<LocalTransport, SystemProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery<LocalTransport, SystemProbe> {
    /// Discovery over the platform transport and process table.
    pub fn new() -> Self {
        Self::with_parts(IpcClient::new(), SystemProbe, EndpointNamespace::default())
    }
}

impl<T: Transport, P: ProcessProbe> Discovery<T, P> {
    pub fn with_parts(client: IpcClient<T>, probe: P, namespace: EndpointNamespace) -> Self {
        Self {
            client,
            probe,
            namespace,
        }
    }

    pub fn client(&self) -> &IpcClient<T> {
        &self.client
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn namespace(&self) -> &EndpointNamespace {
        &self.namespace
    }

    /// Enumerate live instances. Results carry no workspace info.
    ///
    /// Sorted by PID for stable output; callers should not depend on order.
    pub fn discover_instances(&self) -> Vec<Instance> {
        let mut instances: Vec<Instance> = self
            .candidate_endpoints()
            .into_iter()
            .filter_map(|endpoint| {
                let Some(pid) = self.namespace.parse_pid(&endpoint) else {
                    debug!("Ignoring endpoint with unparsable PID: {}", endpoint);
                    return None;
                };
                if self.probe.is_alive(pid) {
                    Some(Instance::existence(pid, endpoint))
                } else {
                    self.remove_stale(&endpoint, pid);
                    None
                }
            })
            .collect();

        instances.sort_by_key(Instance::pid);
        debug!("Discovered {} live instance(s)", instances.len());
        instances
    }

    /// Ask one endpoint what it has open. `None` if it cannot be reached or
    /// answers with anything but `ok`.
    pub fn query_instance(&self, endpoint: &str) -> Option<Instance> {
        let Some(pid) = self.namespace.parse_pid(endpoint) else {
            debug!("Cannot query {}: no PID in endpoint name", endpoint);
            return None;
        };
        match self.client.get_info(endpoint) {
            Ok(info) => Some(Instance::from_info(pid, endpoint, info)),
            Err(e) => {
                debug!("Query of {} failed: {}", endpoint, e);
                None
            }
        }
    }

    /// First queried instance with `name` open, compared case-insensitively.
    pub fn find_instance_for_workspace(&self, name: &str) -> Option<Instance> {
        match self.lookup_workspace(name) {
            WorkspaceLookup::Found(instance) => Some(instance),
            WorkspaceLookup::NotOpen { .. } => None,
        }
    }

    /// Like [`find_instance_for_workspace`](Self::find_instance_for_workspace),
    /// but a miss reports the databases that are open instead.
    pub fn lookup_workspace(&self, name: &str) -> WorkspaceLookup {
        let mut open_workspaces = Vec::new();
        for candidate in self.discover_instances() {
            let Some(instance) = self.query_instance(candidate.endpoint()) else {
                continue;
            };
            if instance.matches_workspace(name) {
                return WorkspaceLookup::Found(instance);
            }
            if let Some(open) = instance.workspace_name() {
                open_workspaces.push(open.to_string());
            }
        }
        WorkspaceLookup::NotOpen { open_workspaces }
    }

    /// Every live instance, with workspace info where the query succeeded.
    pub fn list_instances_with_info(&self) -> Vec<Instance> {
        self.discover_instances()
            .into_iter()
            .map(|instance| {
                self.query_instance(instance.endpoint())
                    .unwrap_or(instance)
            })
            .collect()
    }

    #[cfg(not(windows))]
    fn candidate_endpoints(&self) -> Vec<String> {
        let root = self.namespace.root();
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot scan {}: {}", root.display(), e);
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| self.namespace.matches_name(name))
            })
            .map(|entry| entry.path().to_string_lossy().into_owned())
            .collect()
    }

    /// Pipes cannot be listed cheaply, so probe one name per running PID.
    #[cfg(windows)]
    fn candidate_endpoints(&self) -> Vec<String> {
        crate::platform::list_process_ids()
            .into_iter()
            .map(|pid| self.namespace.endpoint_for(pid))
            .filter(|endpoint| self.client.transport().endpoint_exists(endpoint))
            .collect()
    }

    #[cfg(not(windows))]
    fn remove_stale(&self, endpoint: &str, pid: u32) {
        match std::fs::remove_file(endpoint) {
            Ok(()) => debug!("Removed stale endpoint {} (PID {} is gone)", endpoint, pid),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove stale endpoint {}: {}", endpoint, e),
        }
    }

    /// The OS tears pipes down with their owner; nothing to clean.
    #[cfg(windows)]
    fn remove_stale(&self, endpoint: &str, pid: u32) {
        debug!("Pipe {} belongs to dead PID {}", endpoint, pid);
    }
}
