//! Launching IDA and waiting for it to become usable.
//!
//! # Readiness
//!
//! A freshly spawned IDA is not immediately useful. Its IPC server comes up
//! first, then the database finishes loading, then auto-analysis runs. The
//! [`Launcher`] waits through each of these in turn:
//!
//! 1. **SocketResponsive** - the endpoint for the child's PID answers `ping`
//! 2. **WorkspaceLoaded** - `get_info` reports the requested database
//! 3. **AnalysisComplete** - `is_analysis_complete` answers `ok` (skippable)
//!
//! # Example
//!
//! ```rust,no_run
//! use idalink_core::cancel::CancellationToken;
//! use idalink_core::process::Launcher;
//! use std::path::Path;
//!
//! let launcher = Launcher::new();
//! let result = launcher.launch_and_wait(
//!     Path::new("/opt/ida-9.2/ida"),
//!     Path::new("/work/sample.i64"),
//!     &mut |msg| eprintln!("{}", msg),
//!     &CancellationToken::new(),
//! );
//! if let Some(instance) = result.instance {
//!     println!("ready: PID {}", instance.pid());
//! }
//! ```

mod backoff;
mod launcher;
mod spawn;

pub use backoff::{BackoffPolicy, Intervals, Poller};
pub use launcher::{validate_workspace, LaunchResult, Launcher, Progress, ReadinessPhase};
pub use spawn::{app_bundle, ChildProcess, OsSpawner, ProcessExit, ProcessSpawner, SpawnedProcess};
