//! Wire protocol shared with the in-IDA server.
//!
//! One JSON object per direction, no framing. The request is written in one
//! piece; the response is complete once the accumulated bytes parse as JSON.
//!
//! ```text
//! -> {"cmd": "get_info"}
//! <- {"status": "ok", "has_idb": true, "idb_name": "a.idb", "idb_path": "/w/a.idb"}
//! ```

use super::transport::Connection;
use crate::config::IpcConfig;
use crate::{IdaLinkError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::{Duration, Instant};
use tracing::debug;

/// Request sent to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    GetInfo,
    OpenLink {
        uri: String,
    },
    IsAnalysisComplete {
        /// Server-side wait hint in milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::GetInfo => "get_info",
            Request::OpenLink { .. } => "open_link",
            Request::IsAnalysisComplete { .. } => "is_analysis_complete",
        }
    }
}

/// Response status reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
    Timeout,
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// Response envelope. Command-specific fields are kept in `fields` and
/// decoded on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            message: None,
            fields: serde_json::Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: Some(message.into()),
            fields: serde_json::Map::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Decode the command-specific fields.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(serde_json::Value::Object(self.fields.clone())).map_err(|e| {
            IdaLinkError::protocol(format!("unexpected response fields: {}", e))
        })
    }
}

/// Fields of a `get_info` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoResponse {
    #[serde(default)]
    pub has_idb: bool,
    #[serde(default)]
    pub idb_name: Option<String>,
    #[serde(default)]
    pub idb_path: Option<String>,
}

/// Serialize and send a request on an open connection.
pub fn write_request<C: Connection>(conn: &mut C, request: &Request) -> Result<()> {
    let bytes = serde_json::to_vec(request)?;
    conn.send(&bytes).map_err(|e| IdaLinkError::Connection {
        endpoint: conn.endpoint().to_string(),
        message: format!("send failed: {}", e),
    })
}

/// Read until the bytes form a complete JSON response, the peer closes, or
/// `read_timeout` elapses.
pub fn read_response<C: Connection>(conn: &mut C, read_timeout: Duration) -> Result<Response> {
    let deadline = Instant::now() + read_timeout;
    let mut data: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; IpcConfig::READ_CHUNK_SIZE];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(incomplete(conn, &data, read_timeout, true));
        }

        let n = match conn.receive(&mut chunk, remaining) {
            Ok(n) => n,
            Err(e) if is_timeout(&e) => {
                return Err(incomplete(conn, &data, read_timeout, true));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(IdaLinkError::Connection {
                    endpoint: conn.endpoint().to_string(),
                    message: format!("receive failed: {}", e),
                })
            }
        };

        if n == 0 {
            return Err(incomplete(conn, &data, read_timeout, false));
        }

        data.extend_from_slice(&chunk[..n]);
        if data.len() > IpcConfig::MAX_RESPONSE_SIZE {
            return Err(IdaLinkError::protocol(format!(
                "response from {} exceeds {} bytes",
                conn.endpoint(),
                IpcConfig::MAX_RESPONSE_SIZE
            )));
        }

        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&data) {
            debug!("Received {} bytes from {}", data.len(), conn.endpoint());
            return serde_json::from_value(value)
                .map_err(|e| IdaLinkError::protocol(format!("malformed response: {}", e)));
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

fn incomplete<C: Connection>(
    conn: &C,
    data: &[u8],
    read_timeout: Duration,
    timed_out: bool,
) -> IdaLinkError {
    match (data.is_empty(), timed_out) {
        (true, true) => IdaLinkError::Timeout {
            endpoint: conn.endpoint().to_string(),
            timeout: read_timeout,
        },
        (true, false) => IdaLinkError::protocol(format!("empty response from {}", conn.endpoint())),
        (false, _) => IdaLinkError::protocol(format!(
            "incomplete JSON response from {} ({} bytes)",
            conn.endpoint(),
            data.len()
        )),
    }
}
