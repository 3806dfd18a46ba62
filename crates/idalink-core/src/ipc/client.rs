//! IPC client for IDA instances.
//!
//! Every call opens a fresh connection, exchanges one request and one
//! response, and closes the connection again. Nothing is cached between
//! calls, so a client can be shared freely.

use super::protocol::{read_response, write_request, InfoResponse, Request, Response, ResponseStatus};
use super::transport::{LocalTransport, Transport};
use crate::config::IpcConfig;
use crate::{IdaLinkError, Result};
use std::time::Duration;
use tracing::debug;

/// Outcome of a fire-and-report command such as `open_link`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
}

impl CommandOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            message: "OK".to_string(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Result of one analysis probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisStatus {
    /// True once auto-analysis has finished.
    pub success: bool,
    pub status: ResponseStatus,
    pub message: Option<String>,
}

/// Client for the in-IDA IPC server.
#[derive(Debug, Clone)]
pub struct IpcClient<T: Transport = LocalTransport> {
    transport: T,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for IpcClient<LocalTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl IpcClient<LocalTransport> {
    /// Client over the platform transport with the standard timeouts.
    pub fn new() -> Self {
        Self::with_transport(LocalTransport)
    }
}

impl<T: Transport> IpcClient<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            connect_timeout: IpcConfig::CONNECT_TIMEOUT,
            read_timeout: IpcConfig::READ_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Perform one request/response exchange.
    pub fn request(&self, endpoint: &str, request: &Request) -> Result<Response> {
        self.exchange(endpoint, request, self.read_timeout)
    }

    fn exchange(&self, endpoint: &str, request: &Request, read_timeout: Duration) -> Result<Response> {
        let mut conn = self
            .transport
            .connect(endpoint, self.connect_timeout)
            .map_err(|e| IdaLinkError::Connection {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        debug!("IPC {} -> {}", request.name(), endpoint);
        write_request(&mut conn, request)?;
        let response = read_response(&mut conn, read_timeout)?;
        debug!("IPC {} <- {:?}", request.name(), response.status);
        Ok(response)
    }

    /// True iff the endpoint answers `ping` with `status=ok`.
    pub fn ping(&self, endpoint: &str) -> bool {
        match self.request(endpoint, &Request::Ping) {
            Ok(response) => response.is_ok(),
            Err(e) => {
                debug!("Ping {} failed: {}", endpoint, e);
                false
            }
        }
    }

    /// Ask the instance which database it has open.
    pub fn get_info(&self, endpoint: &str) -> Result<InfoResponse> {
        let response = self.request(endpoint, &Request::GetInfo)?;
        if !response.is_ok() {
            return Err(IdaLinkError::CommandFailed {
                message: response
                    .message
                    .unwrap_or_else(|| format!("get_info returned {:?}", response.status)),
            });
        }
        response.decode()
    }

    /// Ask the instance to open `uri`. Never fails: transport and server
    /// errors are folded into the returned message.
    pub fn send_command(&self, endpoint: &str, uri: &str) -> CommandOutcome {
        let request = Request::OpenLink {
            uri: uri.to_string(),
        };
        match self.request(endpoint, &request) {
            Ok(response) if response.is_ok() => CommandOutcome::ok(),
            Ok(response) => CommandOutcome::failed(
                response
                    .message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ),
            Err(e) => {
                debug!("open_link on {} failed: {}", endpoint, e);
                CommandOutcome::failed(e.to_string())
            }
        }
    }

    /// Probe auto-analysis state. The server may hold the request for up to
    /// `wait` before answering `timeout`, so the read deadline is extended
    /// by the same amount. A read that still times out is reported as
    /// `timeout` too: the instance is busy, not broken.
    pub fn is_analysis_complete(&self, endpoint: &str, wait: Duration) -> AnalysisStatus {
        let request = Request::IsAnalysisComplete {
            timeout: Some(u64::try_from(wait.as_millis()).unwrap_or(u64::MAX)),
        };
        match self.exchange(endpoint, &request, self.read_timeout + wait) {
            Ok(response) => AnalysisStatus {
                success: response.is_ok(),
                status: response.status,
                message: response.message,
            },
            Err(e @ IdaLinkError::Timeout { .. }) => {
                debug!("Analysis probe on {} timed out: {}", endpoint, e);
                AnalysisStatus {
                    success: false,
                    status: ResponseStatus::Timeout,
                    message: Some(e.to_string()),
                }
            }
            Err(e) => AnalysisStatus {
                success: false,
                status: ResponseStatus::Error,
                message: Some(e.to_string()),
            },
        }
    }
}
