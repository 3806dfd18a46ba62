//! OS-specific process handling.
//!
//! Endpoint transport lives in `ipc::transport`; this module owns the other
//! `#[cfg]` split: PID liveness and, on Windows, PID enumeration.
//!
//! | OS | endpoints | liveness |
//! |---|---|---|
//! | Linux, macOS | Unix sockets under `/tmp` | `kill(pid, 0)` |
//! | Windows | named pipes | `OpenProcess` |

pub mod process;

pub use process::{is_process_alive, ProcessProbe, SystemProbe};

#[cfg(windows)]
pub use process::list_process_ids;

/// OS name as used in log lines, e.g. `linux` or `macos`.
pub fn current_platform() -> &'static str {
    std::env::consts::OS
}
