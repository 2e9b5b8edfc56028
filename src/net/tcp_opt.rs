use std::io;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use socket2::{Socket, Domain, Type, Protocol};

/// Sets latency-oriented TCP flags on an already connected stream.
///
/// # Optimizations
/// * `TCP_NODELAY` (Disable Nagle's Algorithm): small frames such as pongs
///   and close frames go out immediately.
/// * `Non-blocking`: the pump threads poll the socket and must never park
///   inside `read`/`write` while holding the transport lock.
pub fn apply_optimizations(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    stream.set_nonblocking(true)?;
    Ok(())
}

/// Creates a properly configured socket for `addr` and connects it.
///
/// The connect itself is blocking (bounded by `timeout`); the returned stream
/// is switched to non-blocking mode afterwards.
pub fn connect(addr: &SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;
    socket.connect_timeout(&(*addr).into(), timeout)?;

    let stream: TcpStream = socket.into();
    apply_optimizations(&stream)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_connect_sets_nonblocking() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = connect(&addr, Duration::from_secs(2)).unwrap();
        assert!(stream.nodelay().unwrap());

        let mut buf = [0u8; 1];
        let err = io::Read::read(&mut &stream, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
