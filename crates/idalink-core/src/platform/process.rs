//! Platform-specific process queries.
//!
//! Liveness checks for the PIDs embedded in IPC endpoint names, plus PID
//! enumeration where endpoints cannot be listed directly (Windows).

use tracing::debug;

/// Answers whether a PID belongs to a running process.
///
/// Discovery and the launcher take this as a seam so tests can fake the
/// process table.
pub trait ProcessProbe {
    fn is_alive(&self, pid: u32) -> bool;
}

/// [`ProcessProbe`] backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        is_process_alive(pid)
    }
}

impl<F> ProcessProbe for F
where
    F: Fn(u32) -> bool,
{
    fn is_alive(&self, pid: u32) -> bool {
        self(pid)
    }
}

/// Check if a process with the given PID is alive.
///
/// A process we are not permitted to signal counts as dead: its endpoint is
/// not one we could talk to anyway.
///
/// # Platform Behavior
/// - **Linux/macOS**: Uses `kill(pid, 0)` signal check
/// - **Windows**: Uses `OpenProcess` with `PROCESS_QUERY_LIMITED_INFORMATION`
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        is_process_alive_unix(pid)
    }

    #[cfg(windows)]
    {
        is_process_alive_windows(pid)
    }

    #[cfg(not(any(unix, windows)))]
    {
        tracing::warn!("Process alive check not implemented for this platform");
        true
    }
}

#[cfg(unix)]
fn is_process_alive_unix(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // 0 and negative values address process groups, not a single process
    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return false,
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => {
            debug!("Process {} exists but is not ours, treating as dead", pid);
            false
        }
        Err(_) => false,
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn is_process_alive_windows(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    // SAFETY: OpenProcess takes plain integers and returns a handle or null.
    // A non-null handle is closed exactly once before returning.
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if !handle.is_null() {
            CloseHandle(handle);
            true
        } else {
            false
        }
    }
}

/// List the PIDs of all running processes.
#[cfg(windows)]
pub fn list_process_ids() -> Vec<u32> {
    use sysinfo::System;

    let system = System::new_all();
    let mut pids: Vec<u32> = system.processes().keys().map(|pid| pid.as_u32()).collect();
    pids.sort_unstable();
    debug!("Enumerated {} processes", pids.len());
    pids
}
