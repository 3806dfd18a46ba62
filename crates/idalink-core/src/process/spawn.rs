//! Spawning IDA.
//!
//! The launched process is detached from our session so that closing the
//! terminal does not take IDA down with it. On macOS an app-bundle binary is
//! started through `open -a`, which hands back no process handle.

use crate::error::{IdaLinkError, Result};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{error, info};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exited with code {}", code),
            None => write!(f, "was terminated by a signal"),
        }
    }
}

/// A spawned process we can poll for exit.
pub trait ChildProcess {
    fn id(&self) -> u32;

    /// Non-blocking exit check.
    fn try_exit(&mut self) -> io::Result<Option<ProcessExit>>;
}

impl ChildProcess for Child {
    fn id(&self) -> u32 {
        Child::id(self)
    }

    fn try_exit(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self
            .try_wait()?
            .map(|status| ProcessExit { code: status.code() }))
    }
}

/// What spawning produced.
#[derive(Debug)]
pub enum SpawnedProcess<H> {
    /// We own the child and can watch it.
    Handle(H),
    /// Launched through a helper; the real process is only reachable via
    /// discovery.
    Detached,
}

/// Starts IDA on a workspace file.
pub trait ProcessSpawner {
    type Handle: ChildProcess;

    fn spawn(&self, executable: &Path, workspace: &Path) -> Result<SpawnedProcess<Self::Handle>>;
}

/// [`ProcessSpawner`] that starts real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSpawner;

impl ProcessSpawner for OsSpawner {
    type Handle = Child;

    fn spawn(&self, executable: &Path, workspace: &Path) -> Result<SpawnedProcess<Child>> {
        if !executable.exists() {
            return Err(IdaLinkError::launch(format!(
                "IDA executable not found: {}",
                executable.display()
            )));
        }

        if let Some(bundle) = app_bundle(executable).filter(|_| cfg!(target_os = "macos")) {
            open_bundle(&bundle, workspace)?;
            return Ok(SpawnedProcess::Detached);
        }

        let mut cmd = Command::new(executable);
        cmd.arg(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut cmd);

        info!(
            "Launching {} with {}",
            executable.display(),
            workspace.display()
        );
        let child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn IDA: {}", e);
            IdaLinkError::launch(format!("Failed to launch IDA: {}", e))
        })?;
        info!("Launched IDA with PID {}", child.id());
        Ok(SpawnedProcess::Handle(child))
    }
}

/// `.app` bundle containing `executable`, if it sits under `Contents/MacOS/`.
pub fn app_bundle(executable: &Path) -> Option<PathBuf> {
    let text = executable.to_string_lossy();
    let index = text.find("/Contents/MacOS/")?;
    let bundle = &text[..index];
    bundle.ends_with(".app").then(|| PathBuf::from(bundle))
}

fn open_bundle(bundle: &Path, workspace: &Path) -> Result<()> {
    info!(
        "Launching {} via open -a with {}",
        bundle.display(),
        workspace.display()
    );
    let status = Command::new("open")
        .arg("-a")
        .arg(bundle)
        .arg("--args")
        .arg(workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| IdaLinkError::launch(format!("Failed to run open: {}", e)))?;

    if status.success() {
        Ok(())
    } else {
        Err(IdaLinkError::Launch {
            message: format!("open -a {} failed", bundle.display()),
            exit_code: status.code(),
        })
    }
}

/// Put the child in its own session (Unix) or process group (Windows).
#[allow(unsafe_code)]
fn detach(cmd: &mut Command) {
    #[cfg(unix)]
    {
        // SAFETY: setsid() is async-signal-safe and touches no memory shared
        // with the parent, which is all pre_exec requires.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = cmd;
    }
}
