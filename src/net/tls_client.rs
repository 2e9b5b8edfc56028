use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use log::{debug, trace};
use mio::net::TcpStream;
use rustls::{ClientConnection, ClientConfig, RootCertStore, pki_types::ServerName};
use std::convert::TryFrom;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::net::tcp_opt;
use crate::net::transport::{resolve, Connect, Transport};

/// A non-blocking TLS wrapper around mio::net::TcpStream.
/// No internal locks: the channel serialises access to the whole transport.
pub struct TlsTransport {
    socket: TcpStream,
    tls_conn: ClientConnection,
}

/// Client config trusting the bundled webpki roots.
pub fn default_client_config() -> Result<Arc<ClientConfig>> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(Arc::new(config))
}

impl TlsTransport {
    pub fn new(socket: TcpStream, server_name: &str, config: Arc<ClientConfig>) -> Result<Self> {
        let server_name = ServerName::try_from(server_name)
            .map_err(|_| Error::InvalidInput("invalid DNS name"))?
            .to_owned();

        let tls_conn = ClientConnection::new(config, server_name)?;

        Ok(Self {
            socket,
            tls_conn,
        })
    }

    /// Connects, then drives the TLS handshake to completion.
    pub fn connect(host: &str, port: u16, tls_config: Arc<ClientConfig>, config: &Config) -> Result<Self> {
        let addr = resolve(host, port)?;
        let stream = tcp_opt::connect(&addr, config.connect_timeout)?;
        let mut client = Self::new(TcpStream::from_std(stream), host, tls_config)?;
        client.complete_handshake(config.connect_timeout)?;
        debug!("tls established with {}:{}", host, port);
        Ok(client)
    }

    /// Pumps handshake records until the session is up or `timeout` passes.
    pub fn complete_handshake(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while self.tls_conn.is_handshaking() {
            self.write_tls()?;
            let progressed = self.read_tls()?;
            if !progressed {
                if Instant::now() >= deadline {
                    return Err(Error::Handshake("TLS handshake timed out"));
                }
                thread::yield_now();
            }
        }
        // Flush the client Finished.
        self.write_tls()
    }

    pub fn socket(&self) -> &TcpStream {
        &self.socket
    }

    pub fn wants_write(&self) -> bool {
        self.tls_conn.wants_write()
    }

    /// Pulls encrypted data from socket -> TLS Engine.
    /// Returns true if data was read. EOF on the socket is `Closed`.
    pub fn read_tls(&mut self) -> Result<bool> {
        match self.tls_conn.read_tls(&mut self.socket) {
            Ok(0) => Err(Error::Closed),
            Ok(n) => {
                let state = self.tls_conn.process_new_packets()?;
                trace!("tls read {} bytes, {} plaintext ready", n, state.plaintext_bytes_to_read());
                Ok(true)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Pushes encrypted data from TLS Engine -> Socket until it would block.
    pub fn write_tls(&mut self) -> Result<()> {
        while self.tls_conn.wants_write() {
            match self.tls_conn.write_tls(&mut self.socket) {
                Ok(_) => {}
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl TlsTransport {
    /// Decrypted bytes already held by the session. `None` if there are none.
    fn read_plaintext(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.tls_conn.reader().read(buf) {
            // close_notify received
            Ok(0) => Err(Error::Closed),
            Ok(n) => Ok(Some(n)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Transport for TlsTransport {
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        self.write_tls()?;

        let mut buf = vec![0u8; max_len];
        // Drain buffered plaintext first: rustls refuses new records while
        // its plaintext buffer is full.
        if let Some(n) = self.read_plaintext(&mut buf)? {
            buf.truncate(n);
            return Ok(buf);
        }

        let eof = match self.read_tls() {
            Ok(_) => false,
            Err(Error::Closed) => true,
            Err(e) => return Err(e),
        };
        match self.read_plaintext(&mut buf)? {
            Some(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            None if eof => Err(Error::Closed),
            None => Err(Error::WouldBlock),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let n = self.tls_conn.writer().write(bytes)?;
        self.write_tls()?;
        if n == 0 && !bytes.is_empty() {
            return Err(Error::WouldBlock);
        }
        Ok(n)
    }
}

impl Connect for TlsTransport {
    const DEFAULT_PORT: u16 = 443;

    fn open(host: &str, port: u16, config: &Config) -> Result<Self> {
        Self::connect(host, port, default_client_config()?, config)
    }
}
