//! Threaded WebSocket client engine.
//!
//! A [`BufferedChannel`] runs one pump thread per direction between a
//! non-blocking [`Transport`] and two ring buffers. [`WebSocketClient`]
//! frames messages on top of it: masking, fragmentation, reassembly and the
//! Upgrade handshake.
//!
//! ```no_run
//! use ws_pump::{Message, WsClient};
//!
//! let mut client = WsClient::connect_default("echo.example.com", "/")?;
//! client.send_message(&Message::text("hello"))?;
//! let reply = client.wait_message()?;
//! println!("{}", reply.as_text()?);
//! client.close()?;
//! # Ok::<(), ws_pump::Error>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod net;

pub use crate::config::Config;
pub use crate::core::buffered::BufferedChannel;
pub use crate::core::ring_buffer::RingByteBuffer;
pub use crate::error::{Error, Result};
pub use crate::net::framing::{Frame, FrameCodec, Opcode};
pub use crate::net::message::Message;
pub use crate::net::transport::{Connect, Transport};
pub use crate::net::ws_client::{WebSocketClient, WsClient, WssClient};
