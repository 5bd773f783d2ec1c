//! # Network Module
//!
//! This module provides the control link, a plain TCP stream carrying `#`-terminated command
//! messages. The link adds no acknowledgement, length prefix or checksum, all reliability comes
//! from TCP itself.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    time::Duration,
};

use crate::{
    cmd::Command,
    framer::{Framer, Frames},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default endpoint of the motor controller.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:1337";

/// Size of the buffer used for a single read from the socket.
const READ_CHUNK_SIZE: usize = 512;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network parameters for the control link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetParams {
    /// Address of the motor controller, e.g. `"127.0.0.1:1337"`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Maximum accepted message length in bytes. If `None` the receive buffer is unbounded.
    #[serde(default)]
    pub max_message_len: Option<usize>,

    /// Timeout on a single blocking read, or `None` to block indefinitely.
    ///
    /// Units: milliseconds
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
}

/// One end of a control link session.
///
/// The sensor client uses [`ControlLink::send`] to push commands, the motor controller uses
/// [`ControlLink::recv`] to pull framed messages. Generic over the stream so that the session
/// logic can be driven by anything readable and writable.
pub struct ControlLink<S> {
    stream: S,

    framer: Framer,

    peer: String,

    read_buf: Box<[u8; READ_CHUNK_SIZE]>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Faults on the link itself. All link faults end the session.
#[derive(thiserror::Error, Debug)]
pub enum LinkFault {
    #[error("Could not connect to {0}: {1}")]
    CouldNotConnect(String, io::Error),

    #[error("Could not configure the socket: {0}")]
    SocketOptionError(io::Error),

    #[error("The peer closed the connection")]
    Closed,

    #[error("Could not read from the socket: {0}")]
    RecvError(io::Error),

    #[error("Could not send to the socket: {0}")]
    SendError(io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for NetParams {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            max_message_len: None,
            read_timeout_ms: None,
        }
    }
}

impl NetParams {
    /// Build a framer matching these parameters.
    pub fn framer(&self) -> Framer {
        match self.max_message_len {
            Some(n) => Framer::with_max_len(n),
            None => Framer::new(),
        }
    }
}

impl ControlLink<TcpStream> {
    /// Connect to the motor controller at the endpoint in `params`.
    pub fn connect(params: &NetParams) -> Result<Self, LinkFault> {
        let addrs = params
            .endpoint
            .to_socket_addrs()
            .map_err(|e| LinkFault::CouldNotConnect(params.endpoint.clone(), e))?;

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "endpoint resolved to nothing");
        for addr in addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => return Self::from_tcp(stream, params),
                Err(e) => last_err = e,
            }
        }

        Err(LinkFault::CouldNotConnect(params.endpoint.clone(), last_err))
    }

    /// Wrap an already connected (or accepted) TCP stream.
    pub fn from_tcp(stream: TcpStream, params: &NetParams) -> Result<Self, LinkFault> {
        // Commands are tiny and operator paced, send each immediately
        stream
            .set_nodelay(true)
            .map_err(LinkFault::SocketOptionError)?;
        stream
            .set_read_timeout(params.read_timeout_ms.map(Duration::from_millis))
            .map_err(LinkFault::SocketOptionError)?;

        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| String::from("unknown"));

        debug!("Control link established with {}", peer);

        Ok(Self::new(stream, params.framer(), peer))
    }

    /// Close both directions of the link.
    pub fn shutdown(&self) {
        self.stream.shutdown(Shutdown::Both).ok();
    }
}

impl<S> ControlLink<S>
where
    S: Read + Write,
{
    /// Create a link over any stream.
    pub fn new(stream: S, framer: Framer, peer: String) -> Self {
        Self {
            stream,
            framer,
            peer,
            read_buf: Box::new([0u8; READ_CHUNK_SIZE]),
        }
    }

    /// Name of the remote end, used in logs.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Serialise and send a single command.
    pub fn send(&mut self, cmd: &Command) -> Result<(), LinkFault> {
        self.send_raw(&cmd.to_wire())
    }

    /// Send pre-rendered wire text as-is. The caller is responsible for terminating messages.
    pub fn send_raw(&mut self, wire: &str) -> Result<(), LinkFault> {
        trace!("Sending {:?} to {}", wire, self.peer);

        self.stream
            .write_all(wire.as_bytes())
            .and_then(|_| self.stream.flush())
            .map_err(LinkFault::SendError)
    }

    /// Block for one read from the stream and return the messages it completes.
    ///
    /// Returns [`LinkFault::Closed`] once the peer has closed the connection. The returned
    /// iterator may be empty if the read only carried part of a message, or if the read timed out
    /// (see [`NetParams::read_timeout_ms`]). A timeout is not a fault, the link stays open.
    pub fn recv(&mut self) -> Result<Frames<'_>, LinkFault> {
        let n = loop {
            match self.stream.read(&mut self.read_buf[..]) {
                Ok(0) => return Err(LinkFault::Closed),
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => {
                    trace!("Nothing received from {}", self.peer);
                    return Ok(self.framer.feed(&[]));
                }
                Err(e) => return Err(LinkFault::RecvError(e)),
            }
        };

        trace!("Read {} bytes from {}", n, self.peer);

        Ok(self.framer.feed(&self.read_buf[..n]))
    }

    /// Consume the link, returning the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_endpoint() -> String {
    String::from(DEFAULT_ENDPOINT)
}

/// Read timeouts surface as `WouldBlock` on unix and `TimedOut` on windows.
fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        cmd::Action,
        framer::{FramingDefect, RawMessage},
    };
    use std::io::Cursor;

    /// Stream that hands out its input a few bytes at a time and records what's written.
    struct Trickle {
        input: Cursor<Vec<u8>>,
        step: usize,
        output: Vec<u8>,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.step);
            self.input.read(&mut buf[..n])
        }
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn trickle(input: &[u8], step: usize) -> ControlLink<Trickle> {
        ControlLink::new(
            Trickle {
                input: Cursor::new(input.to_vec()),
                step,
                output: Vec::new(),
            },
            Framer::new(),
            String::from("test"),
        )
    }

    #[test]
    fn test_send_renders_commands() {
        let mut link = trickle(b"", 1);
        link.send(&Command::new(Action::Forward, vec![500])).unwrap();
        link.send(&Command::bare(Action::Stop)).unwrap();

        assert_eq!(link.into_inner().output, b"forward-500#stop#");
    }

    #[test]
    fn test_recv_reassembles_then_closes() {
        let mut link = trickle(b"forward-500#stop#", 3);

        let mut msgs: Vec<Result<RawMessage, FramingDefect>> = Vec::new();
        loop {
            match link.recv() {
                Ok(frames) => msgs.extend(frames),
                Err(LinkFault::Closed) => break,
                Err(e) => panic!("unexpected fault: {}", e),
            }
        }

        assert_eq!(
            msgs,
            vec![
                Ok(RawMessage::from("forward-500")),
                Ok(RawMessage::from("stop"))
            ]
        );
    }

    /// Stream which times out once before each chunk it hands out.
    struct Idle {
        chunks: Vec<&'static [u8]>,
        timed_out: bool,
    }

    impl Read for Idle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.timed_out {
                self.timed_out = true;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.timed_out = false;

            if self.chunks.is_empty() {
                return Ok(0);
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    impl Write for Idle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_read_timeout_not_fatal() {
        let mut link = ControlLink::new(
            Idle {
                chunks: vec![b"forw", b"ard-500#"],
                timed_out: false,
            },
            Framer::new(),
            String::from("idle"),
        );

        let mut msgs = Vec::new();
        let mut num_empty = 0;
        loop {
            match link.recv() {
                Ok(frames) => {
                    let before = msgs.len();
                    msgs.extend(frames);
                    if msgs.len() == before {
                        num_empty += 1;
                    }
                }
                Err(LinkFault::Closed) => break,
                Err(e) => panic!("unexpected fault: {}", e),
            }
        }

        // One timeout before each chunk and before the close, plus the partial chunk
        assert_eq!(num_empty, 4);
        assert_eq!(msgs, vec![Ok(RawMessage::from("forward-500"))]);
    }

    #[test]
    fn test_params_defaults() {
        let params = NetParams::default();
        assert_eq!(params.endpoint, DEFAULT_ENDPOINT);
        assert!(params.max_message_len.is_none());
    }
}
