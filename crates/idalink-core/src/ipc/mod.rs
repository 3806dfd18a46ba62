//! Local IPC with running IDA instances.
//!
//! # Architecture
//!
//! - **Transport**: platform stream (Unix socket or named pipe) behind a trait
//! - **Protocol**: one JSON request, one JSON response per connection
//! - **Endpoint**: `ida_ipc_<pid>` naming and PID parsing
//! - **Client**: typed commands (`ping`, `get_info`, `open_link`, analysis probe)

pub mod client;
pub mod endpoint;
pub mod protocol;
pub mod transport;

pub use client::{AnalysisStatus, CommandOutcome, IpcClient};
pub use endpoint::EndpointNamespace;
pub use protocol::{InfoResponse, Request, Response, ResponseStatus};
pub use transport::{Connection, LocalTransport, Transport};
