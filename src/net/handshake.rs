//! Client side of the HTTP/1.1 Upgrade exchange (RFC 6455 section 4).
//!
//! Runs synchronously over a non-blocking [`Transport`] before any pump
//! thread exists. Bytes the server sent after the response head (frames
//! pipelined behind the 101) are handed back to the caller.

use std::thread;
use std::time::{Duration, Instant};

use base64::Engine;
use log::{debug, trace};
use ring::digest;

use crate::error::{Error, Result};
use crate::net::mask::random_bytes;
use crate::net::transport::Transport;

/// Appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest response head accepted.
pub const MAX_HEADER_SIZE: usize = 8192;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct HandshakeResponse<'a> {
    pub status: u16,
    pub accept: Option<&'a str>,
    pub extensions: Option<&'a str>,
}

/// Base64 of 16 random bytes.
pub fn generate_key() -> Result<String> {
    let nonce = random_bytes(16)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(nonce))
}

/// Base64(SHA-1(key + GUID)).
pub fn accept_key(key: &str) -> String {
    let mut ctx = digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);
    ctx.update(key.as_bytes());
    ctx.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(ctx.finish())
}

pub fn validate_accept_key(sent_key: &str, received_accept: &str) -> bool {
    accept_key(sent_key) == received_accept.trim()
}

/// The Upgrade request. `Host` carries the port only when it differs from
/// `default_port`.
pub fn build_request(host: &str, resource: &str, port: u16, default_port: u16, key: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(b"GET ");
    buf.extend_from_slice(if resource.is_empty() { "/" } else { resource }.as_bytes());
    buf.extend_from_slice(b" HTTP/1.1\r\nHost: ");
    buf.extend_from_slice(host.as_bytes());
    if port != default_port {
        let mut port_buf = itoa::Buffer::new();
        buf.push(b':');
        buf.extend_from_slice(port_buf.format(port).as_bytes());
    }
    buf.extend_from_slice(b"\r\nUpgrade: websocket\r\n");
    buf.extend_from_slice(b"Connection: Upgrade\r\n");
    buf.extend_from_slice(b"Sec-WebSocket-Key: ");
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(b"\r\nSec-WebSocket-Version: 13\r\n\r\n");
    buf
}

/// Parses a response head.
///
/// `Ok(None)` while the head is incomplete. Otherwise the parsed head and
/// its length in bytes. Any status other than 101 is `Refused`.
pub fn parse_response(buf: &[u8]) -> Result<Option<(HandshakeResponse<'_>, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut res = httparse::Response::new(&mut headers);

    let len = match res.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            if buf.len() >= MAX_HEADER_SIZE {
                return Err(Error::Handshake("response head too large"));
            }
            return Ok(None);
        }
        Err(_) => return Err(Error::Handshake("malformed HTTP response")),
    };

    let status = res.code.unwrap_or(0);
    if status != 101 {
        return Err(Error::Refused(status));
    }

    let mut accept = None;
    let mut extensions = None;
    for header in res.headers.iter() {
        let value = std::str::from_utf8(header.value)
            .map_err(|_| Error::Handshake("invalid header value"))?;
        if header.name.eq_ignore_ascii_case("sec-websocket-accept") {
            accept = Some(value);
        } else if header.name.eq_ignore_ascii_case("sec-websocket-extensions") {
            extensions = Some(value);
        }
    }

    Ok(Some((
        HandshakeResponse {
            status,
            accept,
            extensions,
        },
        len,
    )))
}

/// Runs the exchange with the default timeout.
pub fn perform<T: Transport>(
    transport: &mut T,
    host: &str,
    resource: &str,
    port: u16,
    default_port: u16,
) -> Result<Vec<u8>> {
    perform_within(transport, host, resource, port, default_port, DEFAULT_TIMEOUT)
}

/// Sends the request, waits for a valid 101 and returns the bytes read past
/// the response head.
pub fn perform_within<T: Transport>(
    transport: &mut T,
    host: &str,
    resource: &str,
    port: u16,
    default_port: u16,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let key = generate_key()?;
    let request = build_request(host, resource, port, default_port, &key);
    trace!("handshake request:\n{}", String::from_utf8_lossy(&request));

    let mut sent = 0;
    while sent < request.len() {
        match transport.write(&request[sent..]) {
            Ok(n) => sent += n,
            Err(Error::WouldBlock) => wait_until(deadline)?,
            Err(e) => return Err(e),
        }
    }

    let mut buf = Vec::with_capacity(1024);
    loop {
        match transport.read(MAX_HEADER_SIZE) {
            Ok(bytes) => buf.extend_from_slice(&bytes),
            Err(Error::WouldBlock) => {
                wait_until(deadline)?;
                continue;
            }
            Err(e) => return Err(e),
        }

        let Some((res, consumed)) = parse_response(&buf)? else {
            continue;
        };
        let accept = res
            .accept
            .ok_or(Error::Handshake("missing Sec-WebSocket-Accept"))?;
        if !validate_accept_key(&key, accept) {
            return Err(Error::Handshake("invalid Sec-WebSocket-Accept"));
        }
        if res.extensions.is_some() {
            return Err(Error::Handshake("server selected an extension that was not offered"));
        }

        debug!("handshake with {}{} complete ({} leftover bytes)", host, resource, buf.len() - consumed);
        return Ok(buf.split_off(consumed));
    }
}

fn wait_until(deadline: Instant) -> Result<()> {
    if Instant::now() >= deadline {
        return Err(Error::Handshake("timed out waiting for the server"));
    }
    thread::sleep(Duration::from_micros(200));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::{memory_pair, MemoryPeer};

    const WAIT: Duration = Duration::from_secs(5);

    /// Reads the request off `peer` and returns the client's key.
    fn take_key(peer: &MemoryPeer) -> String {
        let request = peer.recv_until(b"\r\n\r\n", WAIT).unwrap();
        let text = String::from_utf8(request).unwrap();
        text.lines()
            .find_map(|l| l.strip_prefix("Sec-WebSocket-Key: "))
            .unwrap()
            .to_string()
    }

    fn switching(accept: &str) -> String {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            accept
        )
    }

    #[test]
    fn test_accept_key_rfc_vector() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert!(validate_accept_key("dGhlIHNhbXBsZSBub25jZQ==", "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        assert!(!validate_accept_key("dGhlIHNhbXBsZSBub25jZQ==", "invalid"));
    }

    #[test]
    fn test_generate_key_is_16_bytes() {
        let key = generate_key().unwrap();
        let raw = base64::engine::general_purpose::STANDARD.decode(&key).unwrap();
        assert_eq!(raw.len(), 16);
        assert_ne!(key, generate_key().unwrap());
    }

    #[test]
    fn test_build_request_host_port() {
        let req = build_request("example.com", "/chat", 80, 80, "k");
        let text = String::from_utf8(req).unwrap();
        assert!(text.starts_with("GET /chat HTTP/1.1\r\nHost: example.com\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains("Sec-WebSocket-Key: k\r\n"));
        assert!(text.ends_with("Sec-WebSocket-Version: 13\r\n\r\n"));

        let req = build_request("example.com", "", 8080, 80, "k");
        let text = String::from_utf8(req).unwrap();
        assert!(text.starts_with("GET / HTTP/1.1\r\nHost: example.com:8080\r\n"));
    }

    #[test]
    fn test_parse_response_partial_and_refused() {
        assert!(parse_response(b"HTTP/1.1 101 Switching").unwrap().is_none());

        let refused = parse_response(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n");
        assert!(matches!(refused, Err(Error::Refused(403))));
    }

    #[test]
    fn test_perform_returns_leftover_bytes() {
        let (mut transport, peer) = memory_pair();
        let server = std::thread::spawn(move || {
            let key = take_key(&peer);
            let mut reply = switching(&accept_key(&key)).into_bytes();
            reply.extend_from_slice(&[0x81, 0x02, b'h', b'i']);
            peer.send(&reply);
            peer
        });

        let leftover = perform(&mut transport, "localhost", "/", 80, 80).unwrap();
        assert_eq!(leftover, vec![0x81, 0x02, b'h', b'i']);
        server.join().unwrap();
    }

    #[test]
    fn test_perform_refused() {
        let (mut transport, peer) = memory_pair();
        let server = std::thread::spawn(move || {
            take_key(&peer);
            peer.send(b"HTTP/1.1 403 Forbidden\r\n\r\n");
            peer
        });

        let result = perform(&mut transport, "localhost", "/", 80, 80);
        assert!(matches!(result, Err(Error::Refused(403))));
        server.join().unwrap();
    }

    #[test]
    fn test_perform_rejects_bad_accept() {
        let (mut transport, peer) = memory_pair();
        let server = std::thread::spawn(move || {
            take_key(&peer);
            peer.send(switching("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=").as_bytes());
            peer
        });

        let result = perform(&mut transport, "localhost", "/", 80, 80);
        assert!(matches!(result, Err(Error::Handshake(_))));
        server.join().unwrap();
    }

    #[test]
    fn test_perform_times_out_on_silent_server() {
        let (mut transport, _peer) = memory_pair();
        let result = perform_within(
            &mut transport,
            "localhost",
            "/",
            80,
            80,
            Duration::from_millis(30),
        );
        assert!(matches!(result, Err(Error::Handshake(_))));
    }

    #[test]
    fn test_perform_closed_before_response() {
        let (mut transport, peer) = memory_pair();
        let server = std::thread::spawn(move || {
            take_key(&peer);
            peer.close();
        });
        let result = perform(&mut transport, "localhost", "/", 80, 80);
        assert!(matches!(result, Err(Error::Closed)));
        server.join().unwrap();
    }
}
