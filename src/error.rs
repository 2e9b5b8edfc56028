//! Error type shared by the buffers, the channel and the protocol layer.

use std::fmt;
use std::io;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub enum Error {
    /// Not enough data (or space) right now; retry later.
    WouldBlock,
    /// Peer or transport is gone.
    Closed,
    /// Unclassified OS error. Treated as fatal.
    Io(Arc<io::Error>),
    /// Fixed-capacity ring buffer cannot take the write.
    BufferOverflow,
    /// Malformed frame, bad opcode, or a fragmentation rule was broken.
    Protocol(&'static str),
    /// No complete message is buffered yet.
    NoMessage,
    /// Server answered the upgrade request with this status instead of 101.
    Refused(u16),
    /// Upgrade response was malformed or failed validation.
    Handshake(&'static str),
    Tls(rustls::Error),
    InvalidInput(&'static str),
}

impl Error {
    /// Whether the error invalidates the connection it came from.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Closed | Error::Io(_) | Error::Protocol(_) | Error::Tls(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::WouldBlock => write!(f, "operation would block"),
            Error::Closed => write!(f, "connection closed"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::BufferOverflow => write!(f, "ring buffer overflow"),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::NoMessage => write!(f, "no complete message available"),
            Error::Refused(status) => write!(f, "upgrade refused with status {}", status),
            Error::Handshake(msg) => write!(f, "handshake failed: {}", msg),
            Error::Tls(e) => write!(f, "TLS error: {}", e),
            Error::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(&**e),
            Error::Tls(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Error::WouldBlock,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => Error::Closed,
            _ => Error::Io(Arc::new(e)),
        }
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e)
    }
}
