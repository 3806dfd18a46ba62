//! Route a command to the instance that has the right database open.
//!
//! Resolution order: a running instance whose database name matches
//! (case-insensitively), otherwise a freshly launched one if auto-launch is
//! enabled and the database can be found under the search roots.

use crate::cancel::CancellationToken;
use crate::config::{LaunchDefaults, LaunchConfig};
use crate::error::{IdaLinkError, Result};
use crate::instance::{Instance, WorkspaceLookup};
use crate::ipc::{LocalTransport, Transport};
use crate::platform::{ProcessProbe, SystemProbe};
use crate::process::{Launcher, OsSpawner, ProcessSpawner, Progress};
use crate::workspace::find_workspace_file;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// URL scheme for database links.
pub const LINK_SCHEME: &str = "idb";

/// A parsed `idb://<name>/<resource>?<params>` link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Database name taken from the link's host part.
    pub workspace: String,
    /// The full link, forwarded unchanged to the instance.
    pub uri: String,
}

/// Parse an `idb://` link.
pub fn parse_link(uri: &str) -> Result<Link> {
    let invalid = |message: String| IdaLinkError::InvalidLink {
        uri: uri.to_string(),
        message,
    };

    let parsed = Url::parse(uri).map_err(|e| invalid(e.to_string()))?;
    if parsed.scheme() != LINK_SCHEME {
        return Err(invalid(format!(
            "expected {}:// link, got {}://",
            LINK_SCHEME,
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| invalid("no database name in link, expected idb://<name>/...".to_string()))?;
    let workspace = urlencoding::decode(host)
        .map_err(|e| invalid(e.to_string()))?
        .into_owned();

    Ok(Link {
        workspace,
        uri: uri.to_string(),
    })
}

/// Knobs for one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Launch IDA when no running instance matches.
    pub auto_launch: bool,
    /// Directories searched, in order, for the database file.
    pub search_roots: Vec<PathBuf>,
    /// Resolved IDA executable; `None` means none is configured.
    pub executable: Option<PathBuf>,
    /// Overall startup budget, split between socket and load phases.
    pub timeout: Option<Duration>,
    /// Skip the auto-analysis wait after launching.
    pub skip_analysis_wait: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            auto_launch: true,
            search_roots: Vec::new(),
            executable: None,
            timeout: None,
            skip_analysis_wait: false,
        }
    }
}

/// Where a dispatched command ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub instance: Instance,
    /// True if the instance was launched for this dispatch.
    pub launched: bool,
    /// Message returned by the instance.
    pub message: String,
}

/// Resolves a target database to an instance and sends it a command.
pub struct Dispatcher<T: Transport = LocalTransport, S: ProcessSpawner = OsSpawner, P: ProcessProbe = SystemProbe> {
    launcher: Launcher<T, S, P>,
}

impl Default for Dispatcher<LocalTransport, OsSpawner, SystemProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher<LocalTransport, OsSpawner, SystemProbe> {
    pub fn new() -> Self {
        Self::with_launcher(Launcher::new())
    }
}

impl<T: Transport, S: ProcessSpawner, P: ProcessProbe> Dispatcher<T, S, P> {
    pub fn with_launcher(launcher: Launcher<T, S, P>) -> Self {
        Self { launcher }
    }

    pub fn launcher(&self) -> &Launcher<T, S, P> {
        &self.launcher
    }

    /// Open `link` in the instance holding its database.
    pub fn open_link(
        &self,
        link: &Link,
        options: &DispatchOptions,
        progress: Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport> {
        self.dispatch(&link.workspace, &link.uri, options, progress, cancel)
    }

    /// Send `payload` to the instance that has `target` open, launching one
    /// if allowed.
    pub fn dispatch(
        &self,
        target: &str,
        payload: &str,
        options: &DispatchOptions,
        progress: Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport> {
        let discovery = self.launcher.discovery();

        let (instance, launched) = match discovery.lookup_workspace(target) {
            WorkspaceLookup::Found(instance) => {
                debug!("{} is open in PID {}", target, instance.pid());
                (instance, false)
            }
            WorkspaceLookup::NotOpen { open_workspaces } if !options.auto_launch => {
                return Err(IdaLinkError::NoMatchingInstance {
                    name: target.to_string(),
                    open_workspaces,
                });
            }
            WorkspaceLookup::NotOpen { .. } => {
                (self.launch_for(target, options, progress, cancel)?, true)
            }
        };

        let outcome = discovery.client().send_command(instance.endpoint(), payload);
        if !outcome.success {
            return Err(IdaLinkError::CommandFailed {
                message: outcome.message,
            });
        }

        info!("Sent command to PID {}", instance.pid());
        Ok(DispatchReport {
            instance,
            launched,
            message: outcome.message,
        })
    }

    fn launch_for(
        &self,
        target: &str,
        options: &DispatchOptions,
        progress: Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<Instance> {
        let workspace = find_workspace_file(target, &options.search_roots).ok_or_else(|| {
            IdaLinkError::WorkspaceNotFound {
                name: target.to_string(),
                search_roots: options.search_roots.clone(),
            }
        })?;
        let executable = options
            .executable
            .as_deref()
            .ok_or(IdaLinkError::NoInstallation)?;

        let mut config: LaunchConfig = self.launcher.config().clone();
        if let Some(total) = options.timeout {
            config = config.with_overall_timeout(total, LaunchDefaults::DISPATCH_SOCKET_SHARE);
        }
        let skip_analysis = options.skip_analysis_wait || config.skip_analysis_wait;
        config = config.with_skip_analysis_wait(skip_analysis);

        info!("No instance has {} open, launching one", target);
        let result =
            self.launcher
                .launch_and_wait_with(&config, executable, &workspace, progress, cancel);
        let (instance, _process) = result.into_result()?;
        Ok(instance)
    }
}
