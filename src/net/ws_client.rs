//! WebSocket client over any [`Transport`].
//!
//! The client owns a [`BufferedChannel`]; the pump threads move bytes and
//! the caller's thread does all framing. Inbound bytes are staged locally so
//! a frame split across reads is decoded once it is complete.

use log::{debug, trace, warn};

use crate::config::Config;
use crate::core::buffered::{BufferedChannel, Idle};
use crate::error::{Error, Result};
use crate::net::assembler::FragmentAssembler;
use crate::net::framing::{FrameCodec, Opcode, MAX_CONTROL_PAYLOAD};
use crate::net::handshake;
use crate::net::mask::generate_mask;
use crate::net::message::{Message, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR};
use crate::net::tls_client::TlsTransport;
use crate::net::transport::{Connect, TcpTransport, Transport};

/// Plain `ws://` client, default port 80.
pub type WsClient = WebSocketClient<TcpTransport>;
/// `wss://` client, default port 443.
pub type WssClient = WebSocketClient<TlsTransport>;

pub struct WebSocketClient<T: Transport> {
    socket: Option<BufferedChannel<T>>,
    last_error: Option<Error>,
    /// Inbound bytes not yet decoded into frames.
    staging: Vec<u8>,
    assembler: FragmentAssembler,
    codec: FrameCodec,
    config: Config,
    idle: Idle,
    close_sent: bool,
}

impl<T: Connect> WebSocketClient<T> {
    pub const DEFAULT_PORT: u16 = T::DEFAULT_PORT;

    pub fn connect(host: &str, resource: &str, port: u16) -> Result<Self> {
        Self::connect_with(host, resource, port, Config::default())
    }

    /// Connects to the transport's default port.
    pub fn connect_default(host: &str, resource: &str) -> Result<Self> {
        Self::connect(host, resource, T::DEFAULT_PORT)
    }

    pub fn connect_with(host: &str, resource: &str, port: u16, config: Config) -> Result<Self> {
        config.validate()?;
        debug!("connecting to {}:{}{}", host, port, resource);
        let transport = T::open(host, port, &config)?;
        Self::establish(transport, host, resource, port, T::DEFAULT_PORT, config)
    }
}

impl<T: Transport> WebSocketClient<T> {
    /// Runs the Upgrade exchange over an already open transport.
    ///
    /// `Host` carries the port unless it is 80 or 443.
    pub fn handshake(transport: T, host: &str, resource: &str, port: u16, config: Config) -> Result<Self> {
        config.validate()?;
        let default_port = if port == 80 || port == 443 { port } else { 0 };
        Self::establish(transport, host, resource, port, default_port, config)
    }

    fn establish(
        mut transport: T,
        host: &str,
        resource: &str,
        port: u16,
        default_port: u16,
        config: Config,
    ) -> Result<Self> {
        let leftover = handshake::perform_within(
            &mut transport,
            host,
            resource,
            port,
            default_port,
            config.connect_timeout,
        )?;
        let channel = BufferedChannel::with_prefill(transport, &leftover, &config)?;
        debug!("connected to {}:{}{}", host, port, resource);

        Ok(Self {
            socket: Some(channel),
            last_error: None,
            staging: Vec::new(),
            assembler: FragmentAssembler::new(config.max_message_size),
            codec: FrameCodec::new(config.max_frame_size),
            idle: Idle::from_interval(config.poll_interval),
            config,
            close_sent: false,
        })
    }

    /// True until a disconnect, a received Close or a fatal error.
    pub fn is_valid(&self) -> bool {
        self.socket.is_some()
    }

    /// The error that invalidated the client, if any.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_blocking(&mut self, blocking: bool) {
        self.config.blocking = blocking;
        if let Some(channel) = self.socket.as_mut() {
            channel.set_blocking(blocking);
        }
    }

    /// Detaches the channel. The client is invalid afterwards and any staged
    /// but undecoded bytes are dropped.
    pub fn take_channel(&mut self) -> Option<BufferedChannel<T>> {
        self.staging.clear();
        self.assembler.reset();
        self.socket.take()
    }

    /// Sends one message, masked with a fresh key per frame.
    ///
    /// Data messages longer than `Config::max_frame_payload` go out as
    /// several frames.
    pub fn send_message(&mut self, message: &Message) -> Result<()> {
        let result = self.send(message.clone());
        self.check(result)
    }

    /// Next complete message, without waiting.
    ///
    /// `NoMessage` if none is ready. Pings are answered (when
    /// `Config::auto_pong` is set) and still returned. A Close is echoed and
    /// returned, after which the client is invalid.
    pub fn read_message(&mut self) -> Result<Message> {
        let result = self.next_message();
        self.check(result)
    }

    /// Polls [`read_message`](Self::read_message) until something other
    /// than `NoMessage` comes back.
    pub fn wait_message(&mut self) -> Result<Message> {
        loop {
            match self.read_message() {
                Err(Error::NoMessage) => self.idle.wait(),
                other => return other,
            }
        }
    }

    /// Sends Close with status 1000 and tears down.
    pub fn close(&mut self) -> Result<()> {
        self.disconnect(CLOSE_NORMAL)
    }

    pub fn disconnect(&mut self, code: u16) -> Result<()> {
        self.disconnect_with_reason(code, "")
    }

    /// Sends Close with `code` and `reason`, waits up to the linger for it to
    /// leave, then stops the pumps.
    pub fn disconnect_with_reason(&mut self, code: u16, reason: &str) -> Result<()> {
        if self.socket.is_none() {
            return Err(Error::Closed);
        }
        if reason.len() > MAX_CONTROL_PAYLOAD - 2 {
            return Err(Error::InvalidInput("close reason exceeds 123 bytes"));
        }
        let result = if self.close_sent {
            Ok(())
        } else {
            self.send(Message::close(code, reason))
        };
        debug!("disconnecting with {}", code);
        self.release();
        result
    }

    fn channel(&self) -> Result<&BufferedChannel<T>> {
        self.socket.as_ref().ok_or(Error::Closed)
    }

    fn send(&mut self, message: Message) -> Result<()> {
        let channel = self.channel()?;
        let is_close = message.opcode == Opcode::Close;

        let mut wire = Vec::with_capacity(message.payload.len() + 14);
        for frame in message.into_frames(self.config.max_frame_payload) {
            let frame = frame.with_mask(generate_mask()?);
            wire.extend_from_slice(&self.codec.encode(&frame)?);
        }
        trace!("queueing {} bytes", wire.len());
        // One write keeps the fragments of a message contiguous.
        channel.write(&wire)?;

        if is_close {
            self.close_sent = true;
        }
        Ok(())
    }

    fn next_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = self.decode_staged()? {
                return self.on_message(message);
            }
            let bytes = self.channel()?.read_available()?;
            if bytes.is_empty() {
                return Err(Error::NoMessage);
            }
            self.staging.extend_from_slice(&bytes);
        }
    }

    /// Feeds staged frames to the assembler until a message completes or
    /// the staged bytes run out mid-frame.
    fn decode_staged(&mut self) -> Result<Option<Message>> {
        let mut offset = 0;
        let mut message = None;
        while message.is_none() {
            let Some((frame, used)) = self.codec.decode(&self.staging[offset..])? else {
                break;
            };
            offset += used;
            if frame.is_masked() && self.config.strict_masking {
                return Err(Error::Protocol("server frames must not be masked"));
            }
            message = self.assembler.push(frame)?;
        }
        self.staging.drain(..offset);
        Ok(message)
    }

    fn on_message(&mut self, message: Message) -> Result<Message> {
        match message.opcode {
            Opcode::Ping if self.config.auto_pong => {
                if let Err(e) = self.send(Message::pong(message.payload.clone())) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!("pong not sent: {}", e);
                }
            }
            Opcode::Close => {
                if !self.close_sent {
                    // Echo the status code only; an empty Close stays empty.
                    let echo = match message.close_code() {
                        Some(code) => Message::close(code, ""),
                        None => Message::new(Opcode::Close, Vec::new()),
                    };
                    if let Err(e) = self.send(echo) {
                        debug!("close echo not sent: {}", e);
                    }
                }
                debug!("server closed with {:?}", message.close_code());
                self.release();
            }
            _ => {}
        }
        Ok(message)
    }

    /// Invalidates the client on fatal errors; every error is still returned.
    fn check<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(ref e) = result {
            if e.is_fatal() && self.socket.is_some() {
                warn!("connection failed: {}", e);
                if matches!(e, Error::Protocol(_)) && !self.close_sent {
                    if let Err(close_err) = self.send(Message::close(CLOSE_PROTOCOL_ERROR, "")) {
                        debug!("close 1002 not sent: {}", close_err);
                    }
                }
                self.last_error = Some(e.clone());
                self.release();
            }
        }
        result
    }

    /// Flushes (bounded by the linger), stops the pumps, drops the transport.
    fn release(&mut self) {
        self.staging.clear();
        self.assembler.reset();
        if let Some(mut channel) = self.socket.take() {
            channel.shutdown();
        }
    }
}

impl<T: Transport> Drop for WebSocketClient<T> {
    fn drop(&mut self) {
        if self.socket.is_some() {
            if let Err(e) = self.disconnect(CLOSE_NORMAL) {
                debug!("disconnect on drop: {}", e);
            }
        }
    }
}
