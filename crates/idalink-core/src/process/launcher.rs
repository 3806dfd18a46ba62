//! Launch-and-wait state machine.
//!
//! ```text
//! NotStarted -> SocketResponsive -> WorkspaceLoaded -> AnalysisComplete -> Ready
//! ```
//!
//! Each transition is driven by a probe. SocketResponsive and WorkspaceLoaded
//! poll with backoff against independent deadlines; AnalysisComplete polls
//! at a fixed interval with no deadline and can be cancelled. The
//! cancellation token is armed only for that last phase. When spawning
//! yields no process handle (macOS `open -a`) the first two phases collapse
//! into a single discovery search.

use super::backoff::{BackoffPolicy, Poller};
use super::spawn::{ChildProcess, OsSpawner, ProcessSpawner, SpawnedProcess};
use crate::cancel::CancellationToken;
use crate::config::LaunchConfig;
use crate::error::{IdaLinkError, Result};
use crate::instance::{Discovery, Instance};
use crate::ipc::{LocalTransport, ResponseStatus, Transport};
use crate::platform::{ProcessProbe, SystemProbe};
use std::fmt;
use std::path::Path;
use std::process::Child;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Startup phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadinessPhase {
    NotStarted,
    SocketResponsive,
    WorkspaceLoaded,
    AnalysisComplete,
    Ready,
}

impl ReadinessPhase {
    /// Tag used in startup timeout errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessPhase::NotStarted => "not_started",
            ReadinessPhase::SocketResponsive => "socket_responsive",
            ReadinessPhase::WorkspaceLoaded => "workspace_loaded",
            ReadinessPhase::AnalysisComplete => "analysis_complete",
            ReadinessPhase::Ready => "ready",
        }
    }
}

impl fmt::Display for ReadinessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a launch-and-wait run.
#[derive(Debug)]
pub struct LaunchResult<H = Child> {
    pub success: bool,
    /// Present iff `success`.
    pub instance: Option<Instance>,
    /// Present iff a process was spawned and we hold its handle.
    pub process: Option<H>,
    /// Present iff not `success`.
    pub error_message: Option<String>,
    pub error: Option<IdaLinkError>,
    /// True when the analysis wait was skipped by cancellation.
    pub analysis_skipped: bool,
}

impl<H> LaunchResult<H> {
    fn ready(instance: Instance, process: Option<H>, analysis_skipped: bool) -> Self {
        Self {
            success: true,
            instance: Some(instance),
            process,
            error_message: None,
            error: None,
            analysis_skipped,
        }
    }

    fn failed(error: IdaLinkError, process: Option<H>) -> Self {
        Self {
            success: false,
            instance: None,
            process,
            error_message: Some(error.to_string()),
            error: Some(error),
            analysis_skipped: false,
        }
    }

    /// Convert into a `Result`, keeping the structured error.
    pub fn into_result(self) -> Result<(Instance, Option<H>)> {
        match (self.instance, self.error) {
            (Some(instance), None) => Ok((instance, self.process)),
            (_, Some(error)) => Err(error),
            (None, None) => Err(IdaLinkError::launch(
                self.error_message
                    .unwrap_or_else(|| "launch failed".to_string()),
            )),
        }
    }
}

/// Progress sink: called on each phase transition and analysis tick.
pub type Progress<'a> = &'a mut dyn FnMut(&str);

/// How the analysis wait ended.
enum AnalysisOutcome {
    Complete,
    Skipped,
}

/// Drives a freshly spawned IDA through its startup phases.
pub struct Launcher<T: Transport = LocalTransport, S: ProcessSpawner = OsSpawner, P: ProcessProbe = SystemProbe> {
    discovery: Discovery<T, P>,
    spawner: S,
    config: LaunchConfig,
}

impl Default for Launcher<LocalTransport, OsSpawner, SystemProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher<LocalTransport, OsSpawner, SystemProbe> {
    pub fn new() -> Self {
        Self::with_parts(Discovery::new(), OsSpawner, LaunchConfig::default())
    }
}

impl<T: Transport, S: ProcessSpawner, P: ProcessProbe> Launcher<T, S, P> {
    pub fn with_parts(discovery: Discovery<T, P>, spawner: S, config: LaunchConfig) -> Self {
        Self {
            discovery,
            spawner,
            config,
        }
    }

    pub fn with_config(mut self, config: LaunchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn discovery(&self) -> &Discovery<T, P> {
        &self.discovery
    }

    /// Launch `executable` on `workspace` and wait until it is ready.
    ///
    /// Never panics and never returns early without a result: every failure
    /// is reported through [`LaunchResult`], tagged with its phase where a
    /// deadline expired.
    pub fn launch_and_wait(
        &self,
        executable: &Path,
        workspace: &Path,
        progress: Progress<'_>,
        cancel: &CancellationToken,
    ) -> LaunchResult<S::Handle> {
        self.launch_and_wait_with(&self.config, executable, workspace, progress, cancel)
    }

    /// Like [`Launcher::launch_and_wait`], with a one-off configuration.
    pub fn launch_and_wait_with(
        &self,
        config: &LaunchConfig,
        executable: &Path,
        workspace: &Path,
        progress: Progress<'_>,
        cancel: &CancellationToken,
    ) -> LaunchResult<S::Handle> {
        if let Err(e) = config.validate() {
            return LaunchResult::failed(e, None);
        }
        if let Err(e) = validate_workspace(workspace) {
            return LaunchResult::failed(e, None);
        }
        let Some(target) = workspace.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return LaunchResult::failed(
                IdaLinkError::launch(format!("IDB path has no file name: {}", workspace.display())),
                None,
            );
        };

        report(progress, &format!("Launching IDA with {}", target));
        let spawned = match self.spawner.spawn(executable, workspace) {
            Ok(spawned) => spawned,
            Err(e) => return LaunchResult::failed(e, None),
        };

        match spawned {
            SpawnedProcess::Handle(mut child) => {
                match self.wait_with_handle(config, &mut child, &target, progress, cancel) {
                    Ok((instance, skipped)) => LaunchResult::ready(instance, Some(child), skipped),
                    Err(e) => LaunchResult::failed(e, Some(child)),
                }
            }
            SpawnedProcess::Detached => match self.wait_detached(config, &target, progress, cancel) {
                Ok((instance, skipped)) => LaunchResult::ready(instance, None, skipped),
                Err(e) => LaunchResult::failed(e, None),
            },
        }
    }

    fn wait_with_handle(
        &self,
        config: &LaunchConfig,
        child: &mut S::Handle,
        target: &str,
        progress: Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<(Instance, bool)> {
        let policy = BackoffPolicy::from_config(config);
        let endpoint = self.discovery.namespace().endpoint_for(child.id());
        let client = self.discovery.client();

        report(progress, "Waiting for IDA to start...");
        let mut poller = policy.start(config.socket_timeout);
        poll_until(&mut poller, ReadinessPhase::SocketResponsive, || {
            check_alive(child)?;
            Ok(client.transport().endpoint_exists(&endpoint) && client.ping(&endpoint))
        })?;
        report(
            progress,
            &format!("IDA is responding (PID {})", child.id()),
        );

        report(progress, &format!("Waiting for {} to load...", target));
        let mut poller = policy.start(config.workspace_loaded_timeout);
        let mut loaded = None;
        poll_until(&mut poller, ReadinessPhase::WorkspaceLoaded, || {
            check_alive(child)?;
            loaded = self
                .discovery
                .query_instance(&endpoint)
                .filter(|instance| instance.has_workspace() && instance.matches_workspace(target));
            Ok(loaded.is_some())
        })?;
        let instance = loaded.ok_or_else(|| IdaLinkError::launch("instance vanished after loading"))?;
        report(progress, &format!("{} loaded", target));

        let skipped = self.wait_for_analysis(config, &instance, Some(child), progress, cancel)?;
        Ok((instance, skipped))
    }

    fn wait_detached(
        &self,
        config: &LaunchConfig,
        target: &str,
        progress: Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<(Instance, bool)> {
        let policy = BackoffPolicy::from_config(config);
        let timeout = config.socket_timeout + config.workspace_loaded_timeout;

        report(progress, &format!("Waiting for IDA to load {}...", target));
        let mut poller = policy.start(timeout);
        let mut found = None;
        poll_until(&mut poller, ReadinessPhase::WorkspaceLoaded, || {
            found = self.discovery.find_instance_for_workspace(target);
            Ok(found.is_some())
        })?;
        let instance = found.ok_or_else(|| IdaLinkError::launch("instance vanished after loading"))?;
        report(
            progress,
            &format!("{} loaded (PID {})", target, instance.pid()),
        );

        let skipped = self.wait_for_analysis::<S::Handle>(config, &instance, None, progress, cancel)?;
        Ok((instance, skipped))
    }

    /// Returns whether the wait was skipped.
    fn wait_for_analysis<H: ChildProcess>(
        &self,
        config: &LaunchConfig,
        instance: &Instance,
        mut child: Option<&mut H>,
        progress: Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if config.skip_analysis_wait {
            debug!("Skipping analysis wait");
            return Ok(false);
        }

        let _armed = cancel.arm();
        let started = Instant::now();
        let client = self.discovery.client();
        report(progress, "Waiting for auto-analysis (Ctrl+C to skip)...");

        let outcome = loop {
            if cancel.is_cancelled() {
                break AnalysisOutcome::Skipped;
            }
            if let Some(child) = child.as_deref_mut() {
                check_alive(child)?;
            }

            let status =
                client.is_analysis_complete(instance.endpoint(), config.analysis_probe_timeout);
            match status.status {
                ResponseStatus::Ok => break AnalysisOutcome::Complete,
                ResponseStatus::Timeout => {}
                ResponseStatus::Cancelled => {
                    info!("Analysis wait cancelled inside IDA");
                    break AnalysisOutcome::Skipped;
                }
                ResponseStatus::Error | ResponseStatus::Unknown => {
                    return Err(IdaLinkError::launch(format!(
                        "Analysis check failed: {}",
                        status
                            .message
                            .unwrap_or_else(|| format!("{:?}", status.status))
                    )));
                }
            }

            report(
                progress,
                &format!(
                    "Waiting for analysis... ({:.0}s)",
                    started.elapsed().as_secs_f64()
                ),
            );
            if cancel.sleep(config.analysis_poll_interval).is_err() {
                break AnalysisOutcome::Skipped;
            }
        };

        match outcome {
            AnalysisOutcome::Complete => {
                report(
                    progress,
                    &format!(
                        "Analysis complete ({:.1}s)",
                        started.elapsed().as_secs_f64()
                    ),
                );
                Ok(false)
            }
            AnalysisOutcome::Skipped => {
                report(progress, "Analysis wait skipped");
                Ok(true)
            }
        }
    }
}

/// The workspace must be an existing regular file.
pub fn validate_workspace(workspace: &Path) -> Result<()> {
    if !workspace.exists() {
        return Err(IdaLinkError::launch(format!(
            "IDB file not found: {}",
            workspace.display()
        )));
    }
    if !workspace.is_file() {
        return Err(IdaLinkError::launch(format!(
            "IDB path is not a file: {}",
            workspace.display()
        )));
    }
    Ok(())
}

fn report(progress: Progress<'_>, message: &str) {
    info!("{}", message);
    progress(message);
}

/// Fail with the exit code if the child has already exited.
fn check_alive<H: ChildProcess>(child: &mut H) -> Result<()> {
    match child.try_exit() {
        Ok(None) => Ok(()),
        Ok(Some(exit)) => Err(IdaLinkError::Launch {
            message: format!("IDA {} during startup", exit),
            exit_code: exit.code,
        }),
        Err(e) => {
            warn!("Could not poll IDA process {}: {}", child.id(), e);
            Ok(())
        }
    }
}

/// Run `probe` with backoff until it reports ready or the deadline passes.
fn poll_until<F>(poller: &mut Poller, phase: ReadinessPhase, mut probe: F) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    loop {
        if probe()? {
            debug!("{} reached after {:?}", phase, poller.elapsed());
            return Ok(());
        }
        match poller.next_delay() {
            Some(delay) => thread::sleep(delay),
            None => {
                return Err(IdaLinkError::StartupTimeout {
                    phase: phase.as_str().to_string(),
                    timeout: poller.timeout(),
                })
            }
        }
    }
}
