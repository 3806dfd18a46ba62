//! Scripted stand-ins for IDA: a transport answering from in-memory state
//! and a spawner that "starts" instances by registering them with it.

#![allow(dead_code)]

use idalink_core::ipc::{Connection, EndpointNamespace, Request, Response, ResponseStatus, Transport};
use idalink_core::process::{ChildProcess, ProcessExit, ProcessSpawner, SpawnedProcess};
use idalink_core::Result;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

/// Behaviour of one fake instance.
#[derive(Debug, Clone)]
pub struct FakeInstance {
    /// Pings answered with an error before the first `ok`. `None` never answers.
    pub pings_before_ready: Option<u32>,
    /// `get_info` calls reporting no database before it shows as loaded.
    pub infos_before_loaded: u32,
    /// Loaded database path; its file name is reported as `idb_name`.
    pub workspace: Option<String>,
    /// Statuses returned by successive analysis probes; `ok` once drained.
    pub analysis: VecDeque<&'static str>,
    /// Error message for `open_link`, if it should fail.
    pub link_error: Option<String>,
    /// Close without replying to anything.
    pub silent: bool,

    pub pings: u32,
    pub infos: u32,
    pub analysis_probes: u32,
    pub links: Vec<String>,
}

impl FakeInstance {
    pub fn ready(workspace: &str) -> Self {
        Self {
            pings_before_ready: Some(0),
            infos_before_loaded: 0,
            workspace: Some(workspace.to_string()),
            analysis: VecDeque::new(),
            link_error: None,
            silent: false,
            pings: 0,
            infos: 0,
            analysis_probes: 0,
            links: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self {
            workspace: None,
            ..Self::ready("")
        }
    }

    pub fn unresponsive() -> Self {
        Self {
            pings_before_ready: None,
            ..Self::empty()
        }
    }

    pub fn with_analysis(mut self, statuses: &[&'static str]) -> Self {
        self.analysis = statuses.iter().copied().collect();
        self
    }

    fn respond(&mut self, request: Request) -> Option<Response> {
        if self.silent {
            return None;
        }
        let response = match request {
            Request::Ping => {
                self.pings += 1;
                match self.pings_before_ready {
                    None => return None,
                    Some(n) if self.pings > n => Response::ok(),
                    Some(_) => Response::error("starting"),
                }
            }
            Request::GetInfo => {
                self.infos += 1;
                let mut response = Response::ok();
                let loaded = self.infos > self.infos_before_loaded;
                match self.workspace.as_deref().filter(|_| loaded) {
                    Some(path) => {
                        let name = Path::new(path)
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        response.fields.insert("has_idb".into(), true.into());
                        response.fields.insert("idb_name".into(), name.into());
                        response.fields.insert("idb_path".into(), path.into());
                    }
                    None => {
                        response.fields.insert("has_idb".into(), false.into());
                    }
                }
                response
            }
            Request::OpenLink { uri } => {
                self.links.push(uri);
                match &self.link_error {
                    Some(message) => Response::error(message.clone()),
                    None => Response::ok(),
                }
            }
            Request::IsAnalysisComplete { .. } => {
                self.analysis_probes += 1;
                let status = self.analysis.pop_front().unwrap_or("ok");
                let mut response = Response::ok();
                response.status = match status {
                    "ok" => ResponseStatus::Ok,
                    "timeout" => ResponseStatus::Timeout,
                    "cancelled" => ResponseStatus::Cancelled,
                    _ => ResponseStatus::Error,
                };
                if response.status == ResponseStatus::Error {
                    response.message = Some(status.to_string());
                }
                response
            }
        };
        Some(response)
    }
}

/// In-memory IDA "network", keyed by endpoint.
#[derive(Debug, Clone, Default)]
pub struct FakeIda {
    instances: Rc<RefCell<HashMap<String, FakeInstance>>>,
    pub connects: Rc<Cell<u32>>,
}

impl FakeIda {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, endpoint: &str, instance: FakeInstance) {
        self.instances
            .borrow_mut()
            .insert(endpoint.to_string(), instance);
    }

    pub fn get(&self, endpoint: &str) -> Option<FakeInstance> {
        self.instances.borrow().get(endpoint).cloned()
    }

    pub fn update(&self, endpoint: &str, f: impl FnOnce(&mut FakeInstance)) {
        if let Some(instance) = self.instances.borrow_mut().get_mut(endpoint) {
            f(instance);
        }
    }
}

pub struct FakeConn {
    endpoint: String,
    ida: FakeIda,
    reply: Option<Vec<u8>>,
}

impl Connection for FakeConn {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let request: Request = serde_json::from_slice(data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let response = self
            .ida
            .instances
            .borrow_mut()
            .get_mut(&self.endpoint)
            .and_then(|instance| instance.respond(request));
        self.reply = response.map(|r| serde_json::to_vec(&r).unwrap_or_default());
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        match self.reply.take() {
            Some(bytes) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            None => Ok(0),
        }
    }
}

impl Transport for FakeIda {
    type Conn = FakeConn;

    fn connect(&self, endpoint: &str, _timeout: Duration) -> io::Result<FakeConn> {
        self.connects.set(self.connects.get() + 1);
        if !self.instances.borrow().contains_key(endpoint) {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        Ok(FakeConn {
            endpoint: endpoint.to_string(),
            ida: self.clone(),
            reply: None,
        })
    }

    fn endpoint_exists(&self, endpoint: &str) -> bool {
        self.instances.borrow().contains_key(endpoint)
    }
}

/// Child that exits after a number of polls.
#[derive(Debug)]
pub struct FakeChild {
    pub pid: u32,
    pub exit_after_polls: Option<(u32, i32)>,
    polls: u32,
}

impl ChildProcess for FakeChild {
    fn id(&self) -> u32 {
        self.pid
    }

    fn try_exit(&mut self) -> io::Result<Option<ProcessExit>> {
        self.polls += 1;
        Ok(match self.exit_after_polls {
            Some((after, code)) if self.polls > after => Some(ProcessExit { code: Some(code) }),
            _ => None,
        })
    }
}

/// Spawner that registers a scripted instance for the new "process".
pub struct FakeSpawner {
    pub ida: FakeIda,
    pub namespace: EndpointNamespace,
    pub pid: u32,
    /// Instance registered at spawn; `None` registers nothing.
    pub instance: Option<FakeInstance>,
    pub exit_after_polls: Option<(u32, i32)>,
    /// Hand back no process handle, as `open -a` does.
    pub detached: bool,
    /// Also create the endpoint file so directory discovery sees it.
    pub touch_endpoint: bool,
    /// Shared so tests can keep a handle after the spawner is moved.
    pub spawns: Rc<Cell<u32>>,
}

impl FakeSpawner {
    pub fn new(ida: &FakeIda, namespace: &EndpointNamespace, pid: u32) -> Self {
        Self {
            ida: ida.clone(),
            namespace: namespace.clone(),
            pid,
            instance: None,
            exit_after_polls: None,
            detached: false,
            touch_endpoint: false,
            spawns: Rc::new(Cell::new(0)),
        }
    }

    pub fn registering(mut self, instance: FakeInstance) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn exiting(mut self, after_polls: u32, code: i32) -> Self {
        self.exit_after_polls = Some((after_polls, code));
        self
    }

    pub fn detached(mut self) -> Self {
        self.detached = true;
        self.touch_endpoint = true;
        self
    }

    pub fn endpoint(&self) -> String {
        self.namespace.endpoint_for(self.pid)
    }
}

impl ProcessSpawner for FakeSpawner {
    type Handle = FakeChild;

    fn spawn(&self, _executable: &Path, workspace: &Path) -> Result<SpawnedProcess<FakeChild>> {
        self.spawns.set(self.spawns.get() + 1);
        let endpoint = self.endpoint();
        if let Some(template) = &self.instance {
            let mut instance = template.clone();
            if instance.workspace.is_none() {
                instance.workspace = Some(workspace.to_string_lossy().into_owned());
            }
            self.ida.add(&endpoint, instance);
            if self.touch_endpoint {
                std::fs::write(&endpoint, b"")?;
            }
        }
        if self.detached {
            return Ok(SpawnedProcess::Detached);
        }
        Ok(SpawnedProcess::Handle(FakeChild {
            pid: self.pid,
            exit_after_polls: self.exit_after_polls,
            polls: 0,
        }))
    }
}

/// Create an empty database file.
pub fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, b"").unwrap();
}
