//! idalink core: find, query and launch IDA instances over local IPC.
//!
//! Every IDA instance with the IPC plugin loaded listens on a local endpoint
//! named after its PID (`/tmp/ida_ipc_<pid>` or `\\.\pipe\ida_ipc_<pid>`).
//! This crate discovers those endpoints, asks each instance which database it
//! has open, sends it commands, and when no instance has the wanted database
//! open, launches IDA and waits for it to become ready.
//!
//! The core is blocking and single-threaded per call. It reads no
//! environment or settings on its own: search roots and the executable are
//! passed in.
//!
//! # Example
//!
//! ```rust,no_run
//! use idalink_core::{parse_link, CancellationToken, DispatchOptions, Dispatcher};
//!
//! fn main() -> idalink_core::Result<()> {
//!     let link = parse_link("idb://sample.i64/functions?ea=0x401000")?;
//!     let options = DispatchOptions {
//!         auto_launch: false,
//!         ..DispatchOptions::default()
//!     };
//!
//!     let report = Dispatcher::new().open_link(
//!         &link,
//!         &options,
//!         &mut |msg| eprintln!("{}", msg),
//!         &CancellationToken::new(),
//!     )?;
//!     println!("opened in PID {}", report.instance.pid());
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod instance;
pub mod ipc;
pub mod platform;
pub mod process;
pub mod settings;
pub mod workspace;

// Re-export commonly used types
pub use cancel::{CancellationToken, CancelledError};
pub use config::{IpcConfig, LaunchConfig, LaunchDefaults};
pub use dispatch::{parse_link, DispatchOptions, DispatchReport, Dispatcher, Link};
pub use error::{IdaLinkError, Result};
pub use instance::{Discovery, Instance, WorkspaceLookup};
pub use ipc::{CommandOutcome, EndpointNamespace, IpcClient};
pub use process::{LaunchResult, Launcher, ReadinessPhase};
pub use settings::Settings;
pub use workspace::find_workspace_file;
