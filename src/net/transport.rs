//! Byte transports the channel pumps read from and write to.
//!
//! Implementations must be non-blocking: the pumps share one transport
//! behind a mutex, so a `read` that parks would starve the writer. Return
//! [`Error::WouldBlock`] when nothing can be done yet, [`Error::Closed`] once
//! the peer is gone.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use mio::net::TcpStream;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::net::tcp_opt;

pub trait Transport: Send + 'static {
    /// Reads at most `max_len` bytes. Never returns an empty buffer; EOF is `Closed`.
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>>;

    /// Writes a prefix of `bytes` and returns its length.
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;
}

/// Transports that can dial a host by name.
pub trait Connect: Transport + Sized {
    const DEFAULT_PORT: u16;

    fn open(host: &str, port: u16, config: &Config) -> Result<Self>;
}

/// Resolves `host:port`, returning the first address.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or(Error::InvalidInput("host did not resolve to any address"))
}

/// Plain TCP on a non-blocking mio stream.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = tcp_opt::connect(&addr, timeout)?;
        debug!("tcp connected to {}", addr);
        Ok(Self {
            stream: TcpStream::from_std(stream),
        })
    }

    /// Wraps an already connected std stream, switching it to non-blocking.
    pub fn from_std(stream: std::net::TcpStream) -> Result<Self> {
        tcp_opt::apply_optimizations(&stream)?;
        Ok(Self {
            stream: TcpStream::from_std(stream),
        })
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        match self.stream.read(&mut buf) {
            Ok(0) => Err(Error::Closed),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        match self.stream.write(bytes) {
            Ok(0) if !bytes.is_empty() => Err(Error::Closed),
            Ok(n) => Ok(n),
            Err(e) => Err(e.into()),
        }
    }
}

impl Connect for TcpTransport {
    const DEFAULT_PORT: u16 = 80;

    fn open(host: &str, port: u16, config: &Config) -> Result<Self> {
        let addr = resolve(host, port)?;
        Self::connect(addr, config.connect_timeout)
    }
}

#[derive(Default)]
struct Pipe {
    bytes: VecDeque<u8>,
    closed: bool,
}

/// In-process transport; the other end is a [`MemoryPeer`].
pub struct MemoryTransport {
    rx: Arc<Mutex<Pipe>>,
    tx: Arc<Mutex<Pipe>>,
}

/// Test-side end of a [`MemoryTransport`]: plays the remote server.
#[derive(Clone)]
pub struct MemoryPeer {
    /// What the transport writes.
    rx: Arc<Mutex<Pipe>>,
    /// What the transport reads.
    tx: Arc<Mutex<Pipe>>,
}

pub fn memory_pair() -> (MemoryTransport, MemoryPeer) {
    let to_transport = Arc::new(Mutex::new(Pipe::default()));
    let from_transport = Arc::new(Mutex::new(Pipe::default()));
    (
        MemoryTransport {
            rx: to_transport.clone(),
            tx: from_transport.clone(),
        },
        MemoryPeer {
            rx: from_transport,
            tx: to_transport,
        },
    )
}

impl Transport for MemoryTransport {
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let mut pipe = self.rx.lock();
        if pipe.bytes.is_empty() {
            return Err(if pipe.closed { Error::Closed } else { Error::WouldBlock });
        }
        let n = max_len.min(pipe.bytes.len());
        Ok(pipe.bytes.drain(..n).collect())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut pipe = self.tx.lock();
        if pipe.closed {
            return Err(Error::Closed);
        }
        pipe.bytes.extend(bytes);
        Ok(bytes.len())
    }
}

impl MemoryPeer {
    /// Queues bytes for the transport to read.
    pub fn send(&self, bytes: &[u8]) {
        self.tx.lock().bytes.extend(bytes);
    }

    /// Everything the transport has written so far.
    pub fn recv(&self) -> Vec<u8> {
        self.rx.lock().bytes.drain(..).collect()
    }

    /// Waits until `len` written bytes are available and takes exactly those.
    pub fn recv_exact(&self, len: usize, timeout: Duration) -> Option<Vec<u8>> {
        self.poll_until(timeout, |bytes| (bytes.len() >= len).then_some(len))
    }

    /// Waits for `delim` and takes everything up to and including it.
    pub fn recv_until(&self, delim: &[u8], timeout: Duration) -> Option<Vec<u8>> {
        self.poll_until(timeout, |bytes| {
            let bytes = bytes.make_contiguous();
            bytes
                .windows(delim.len())
                .position(|w| w == delim)
                .map(|pos| pos + delim.len())
        })
    }

    /// Ends the stream in both directions once queued bytes are consumed.
    pub fn close(&self) {
        self.tx.lock().closed = true;
        self.rx.lock().closed = true;
    }

    fn poll_until<F>(&self, timeout: Duration, mut ready: F) -> Option<Vec<u8>>
    where
        F: FnMut(&mut VecDeque<u8>) -> Option<usize>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut pipe = self.rx.lock();
                if let Some(n) = ready(&mut pipe.bytes) {
                    return Some(pipe.bytes.drain(..n).collect());
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_memory_pair_moves_bytes_both_ways() {
        let (mut transport, peer) = memory_pair();
        assert!(matches!(transport.read(16), Err(Error::WouldBlock)));

        peer.send(b"hello");
        assert_eq!(transport.read(3).unwrap(), b"hel");
        assert_eq!(transport.read(16).unwrap(), b"lo");

        transport.write(b"world").unwrap();
        assert_eq!(peer.recv(), b"world");
        assert!(peer.recv().is_empty());
    }

    #[test]
    fn test_memory_close_drains_then_reports_closed() {
        let (mut transport, peer) = memory_pair();
        peer.send(b"x");
        peer.close();
        assert_eq!(transport.read(4).unwrap(), b"x");
        assert!(matches!(transport.read(4), Err(Error::Closed)));
        assert!(matches!(transport.write(b"y"), Err(Error::Closed)));
    }

    #[test]
    fn test_recv_until_delimiter() {
        let (mut transport, peer) = memory_pair();
        transport.write(b"GET / HTTP/1.1\r\n\r\nextra").unwrap();
        let head = peer.recv_until(b"\r\n\r\n", Duration::from_secs(1)).unwrap();
        assert_eq!(head, b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(peer.recv(), b"extra");
    }

    #[test]
    fn test_tcp_transport_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut transport = TcpTransport::connect(addr, Duration::from_secs(2)).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let mut written = 0;
        while written < 4 {
            match transport.write(&b"ping"[written..]) {
                Ok(n) => written += n,
                Err(Error::WouldBlock) => thread::yield_now(),
                Err(e) => panic!("write failed: {}", e),
            }
        }
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").unwrap();
        let mut got = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while got.len() < 4 && Instant::now() < deadline {
            match transport.read(16) {
                Ok(bytes) => got.extend(bytes),
                Err(Error::WouldBlock) => thread::yield_now(),
                Err(e) => panic!("read failed: {}", e),
            }
        }
        assert_eq!(got, b"pong");

        drop(server);
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match transport.read(16) {
                Err(Error::Closed) => break,
                Err(Error::WouldBlock) if Instant::now() < deadline => thread::yield_now(),
                other => panic!("expected Closed, got {:?}", other.map(|b| b.len())),
            }
        }
    }
}
