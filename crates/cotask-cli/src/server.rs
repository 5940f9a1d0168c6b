//! Non-blocking HTTP echo server driven entirely by readiness waits
//!
//! The accept task only touches the listener after a read-readiness wait;
//! each handler task reads after read-readiness and writes after
//! write-readiness on its own connection. No socket operation ever blocks
//! the scheduler.

use cotask_core::{Coroutine, ResumeValue, Step, SystemCall, TaskError};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

const MAX_REQUEST_BYTES: usize = 8192;

/// Accept loop: waits for read-readiness on the listening socket, accepts
/// one connection per wakeup and spawns a handler task for it.
pub struct AcceptLoop {
    listener: TcpListener,
}

impl AcceptLoop {
    pub fn new(listener: TcpListener) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(AcceptLoop { listener })
    }

    fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

impl Coroutine for AcceptLoop {
    fn resume(&mut self, value: ResumeValue) -> Result<Step, TaskError> {
        match value {
            ResumeValue::Ready(_) => match self.listener.accept() {
                Ok((stream, peer)) => {
                    log::info!("accepted connection from {}", peer);
                    let handler = ClientHandler::new(stream)?;
                    Ok(Step::Syscall(SystemCall::Spawn(Box::new(handler))))
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // spurious wakeup; park again
                    Ok(Step::Syscall(SystemCall::WaitRead(self.fd())))
                }
                Err(e) => Err(e.into()),
            },
            ResumeValue::Fault(fault) => Err(fault.into()),
            // first turn, or back from spawning a handler
            _ => Ok(Step::Syscall(SystemCall::WaitRead(self.fd()))),
        }
    }
}

#[derive(Clone, Copy)]
enum Phase {
    AwaitRequest,
    AwaitResponse,
}

/// Per-connection handler: read the request once readable, answer once
/// writable, then release the connection.
pub struct ClientHandler {
    stream: TcpStream,
    phase: Phase,
    response: Vec<u8>,
    written: usize,
}

impl ClientHandler {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(ClientHandler {
            stream,
            phase: Phase::AwaitRequest,
            response: Vec::new(),
            written: 0,
        })
    }

    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl Coroutine for ClientHandler {
    fn resume(&mut self, value: ResumeValue) -> Result<Step, TaskError> {
        if let ResumeValue::Fault(fault) = value {
            return Err(fault.into());
        }
        match self.phase {
            Phase::AwaitRequest => {
                if !matches!(value, ResumeValue::Ready(_)) {
                    return Ok(Step::Syscall(SystemCall::WaitRead(self.fd())));
                }
                let mut buf = [0u8; MAX_REQUEST_BYTES];
                let n = match self.stream.read(&mut buf) {
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(Step::Syscall(SystemCall::WaitRead(self.fd())));
                    }
                    Err(e) => return Err(e.into()),
                };
                let request = String::from_utf8_lossy(&buf[..n]);
                log::debug!("read {} request bytes", n);
                self.response = render_response(&request);
                self.phase = Phase::AwaitResponse;
                Ok(Step::Syscall(SystemCall::WaitWrite(self.fd())))
            }
            Phase::AwaitResponse => {
                if !matches!(value, ResumeValue::Ready(_)) {
                    return Ok(Step::Syscall(SystemCall::WaitWrite(self.fd())));
                }
                while self.written < self.response.len() {
                    match self.stream.write(&self.response[self.written..]) {
                        Ok(0) => return Err(TaskError::other("connection closed mid-response")),
                        Ok(n) => self.written += n,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Ok(Step::Syscall(SystemCall::WaitWrite(self.fd())));
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                log::debug!("wrote {} response bytes, closing", self.written);
                // dropping the task drops the stream and releases the socket
                Ok(Step::Done)
            }
        }
    }
}

fn render_response(request: &str) -> Vec<u8> {
    let body = format!("Received following request:\n\n{}", request);
    let mut response = Vec::with_capacity(body.len() + 96);
    response.extend_from_slice(b"HTTP/1.1 200 OK\r\n");
    response.extend_from_slice(b"Content-Type: text/plain\r\n");
    response.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    response.extend_from_slice(b"Connection: close\r\n");
    response.extend_from_slice(b"\r\n");
    response.extend_from_slice(body.as_bytes());
    response
}
