//! Local stream transport.
//!
//! [`LocalTransport`] is the one platform implementation, picked at compile
//! time: Unix domain sockets on POSIX, named pipes on Windows. Everything
//! above this module talks to the [`Transport`]/[`Connection`] traits, which
//! is also where tests plug in fakes.
//!
//! Connections are single-use. Dropping one closes it.

use std::io;
use std::time::Duration;

/// An open, bidirectional byte stream to one instance.
pub trait Connection {
    /// Address this connection was opened against.
    fn endpoint(&self) -> &str;

    /// Write the whole buffer.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read into `buf`, waiting at most `timeout`.
    ///
    /// `Ok(0)` means the peer closed. A timeout surfaces as
    /// `ErrorKind::TimedOut` or `ErrorKind::WouldBlock`.
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;
}

/// Opens connections to endpoint addresses.
pub trait Transport {
    type Conn: Connection;

    fn connect(&self, endpoint: &str, timeout: Duration) -> io::Result<Self::Conn>;

    /// Cheap check that something is listening at `endpoint`.
    fn endpoint_exists(&self, endpoint: &str) -> bool;
}

impl<T: Transport + ?Sized> Transport for &T {
    type Conn = T::Conn;

    fn connect(&self, endpoint: &str, timeout: Duration) -> io::Result<Self::Conn> {
        (**self).connect(endpoint, timeout)
    }

    fn endpoint_exists(&self, endpoint: &str) -> bool {
        (**self).endpoint_exists(endpoint)
    }
}

/// Platform transport for IDA's IPC endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

#[cfg(unix)]
mod unix {
    use super::{Connection, LocalTransport, Transport};
    use std::io::{self, Read, Write};
    use std::os::unix::net::UnixStream;
    use std::path::Path;
    use std::time::Duration;

    /// Unix domain socket connection.
    #[derive(Debug)]
    pub struct SocketConnection {
        endpoint: String,
        stream: UnixStream,
    }

    impl Connection for SocketConnection {
        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        fn send(&mut self, data: &[u8]) -> io::Result<()> {
            self.stream.write_all(data)?;
            self.stream.flush()
        }

        fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
            if timeout.is_zero() {
                return Err(io::Error::from(io::ErrorKind::TimedOut));
            }
            self.stream.set_read_timeout(Some(timeout))?;
            self.stream.read(buf)
        }
    }

    impl Transport for LocalTransport {
        type Conn = SocketConnection;

        /// Local socket connects either complete or fail immediately, so
        /// `timeout` bounds the request write instead.
        fn connect(&self, endpoint: &str, timeout: Duration) -> io::Result<SocketConnection> {
            let stream = UnixStream::connect(endpoint)?;
            if !timeout.is_zero() {
                stream.set_write_timeout(Some(timeout))?;
            }
            Ok(SocketConnection {
                endpoint: endpoint.to_string(),
                stream,
            })
        }

        fn endpoint_exists(&self, endpoint: &str) -> bool {
            Path::new(endpoint).exists()
        }
    }
}

#[cfg(unix)]
pub use unix::SocketConnection;

#[cfg(windows)]
mod windows {
    #![allow(unsafe_code)]

    use super::{Connection, LocalTransport, Transport};
    use std::ffi::OsStr;
    use std::fs::{File, OpenOptions};
    use std::io::{self, Read, Write};
    use std::os::windows::ffi::OsStrExt;
    use std::os::windows::io::AsRawHandle;
    use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tracing::debug;
    use windows_sys::Win32::Foundation::{
        GetLastError, ERROR_FILE_NOT_FOUND, ERROR_PIPE_BUSY, HANDLE,
    };
    use windows_sys::Win32::System::Pipes::WaitNamedPipeW;
    use windows_sys::Win32::System::IO::CancelSynchronousIo;

    /// Tries at unblocking the reader thread on drop, 1ms apart.
    const READER_CANCEL_ATTEMPTS: u32 = 50;

    /// Named pipe connection.
    ///
    /// Pipe handles opened through `std::fs` have no read timeout, so a
    /// reader thread owns a clone of the handle and forwards chunks. Dropping
    /// the connection cancels that thread's pending read, which closes the
    /// clone and releases the pipe instance.
    pub struct PipeConnection {
        endpoint: String,
        pipe: File,
        chunks: Receiver<io::Result<Vec<u8>>>,
        pending: Vec<u8>,
        reader: Option<JoinHandle<()>>,
    }

    impl std::fmt::Debug for PipeConnection {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PipeConnection")
                .field("endpoint", &self.endpoint)
                .finish()
        }
    }

    impl PipeConnection {
        fn open(endpoint: &str, pipe: File) -> io::Result<Self> {
            let mut reader = pipe.try_clone()?;
            let (tx, rx) = mpsc::channel();
            let handle = thread::Builder::new()
                .name("idalink-pipe-reader".to_string())
                .spawn(move || {
                    let mut buf = [0u8; 4096];
                    loop {
                        match reader.read(&mut buf) {
                            Ok(0) => {
                                let _ = tx.send(Ok(Vec::new()));
                                break;
                            }
                            Ok(n) => {
                                if tx.send(Ok(buf[..n].to_vec())).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e));
                                break;
                            }
                        }
                    }
                })?;
            Ok(Self {
                endpoint: endpoint.to_string(),
                pipe,
                chunks: rx,
                pending: Vec::new(),
                reader: Some(handle),
            })
        }
    }

    impl Drop for PipeConnection {
        fn drop(&mut self) {
            let Some(reader) = self.reader.take() else {
                return;
            };
            // The reader may be between reads, so retry until it exits.
            for _ in 0..READER_CANCEL_ATTEMPTS {
                if reader.is_finished() {
                    break;
                }
                // SAFETY: `reader` keeps the thread handle open for the
                // duration of the call.
                unsafe {
                    CancelSynchronousIo(reader.as_raw_handle() as HANDLE);
                }
                thread::sleep(Duration::from_millis(1));
            }
            if reader.is_finished() {
                let _ = reader.join();
            } else {
                debug!("Pipe reader for {} did not stop", self.endpoint);
            }
        }
    }

    impl Connection for PipeConnection {
        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        fn send(&mut self, data: &[u8]) -> io::Result<()> {
            self.pipe.write_all(data)?;
            self.pipe.flush()
        }

        fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
            if self.pending.is_empty() {
                match self.chunks.recv_timeout(timeout) {
                    Ok(Ok(bytes)) => self.pending = bytes,
                    Ok(Err(e)) => return Err(e),
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(io::Error::from(io::ErrorKind::TimedOut))
                    }
                    Err(RecvTimeoutError::Disconnected) => return Ok(0),
                }
            }
            let n = self.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    fn wide(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
    }

    /// Wait for a pipe instance to become free. Returns false on timeout or
    /// when no pipe by that name exists.
    fn wait_for_pipe(endpoint: &str, timeout: Duration) -> bool {
        let name = wide(endpoint);
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX).max(1);
        // SAFETY: `name` is a NUL-terminated UTF-16 buffer that outlives the call.
        unsafe { WaitNamedPipeW(name.as_ptr(), millis) != 0 }
    }

    impl Transport for LocalTransport {
        type Conn = PipeConnection;

        fn connect(&self, endpoint: &str, timeout: Duration) -> io::Result<PipeConnection> {
            let open = || OpenOptions::new().read(true).write(true).open(endpoint);
            let pipe = match open() {
                Ok(pipe) => pipe,
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY as i32) => {
                    debug!("Pipe {} busy, waiting up to {:?}", endpoint, timeout);
                    if !wait_for_pipe(endpoint, timeout) {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("pipe {} stayed busy", endpoint),
                        ));
                    }
                    open()?
                }
                Err(e) => return Err(e),
            };
            PipeConnection::open(endpoint, pipe)
        }

        /// Probes without opening, so no pipe instance is consumed.
        fn endpoint_exists(&self, endpoint: &str) -> bool {
            let name = wide(endpoint);
            // SAFETY: `name` is a NUL-terminated UTF-16 buffer that outlives
            // the call; GetLastError reads thread-local state only.
            unsafe {
                if WaitNamedPipeW(name.as_ptr(), 1) != 0 {
                    return true;
                }
                GetLastError() != ERROR_FILE_NOT_FOUND
            }
        }
    }
}

#[cfg(windows)]
pub use windows::PipeConnection;
