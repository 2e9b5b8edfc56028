use std::str;

use log::debug;
use serde::de::DeserializeOwned;
use simd_json::OwnedValue;

use crate::error::{Error, Result};
use crate::net::framing::{Frame, Opcode};

/// Status code sent by a plain `disconnect`.
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// A complete application message or a control message.
///
/// The opcode is never `Continuation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        debug_assert!(opcode != Opcode::Continuation);
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Opcode::Text, text.into().into_bytes())
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Binary, bytes)
    }

    pub fn ping(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Ping, bytes)
    }

    pub fn pong(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Pong, bytes)
    }

    pub fn close(code: u16, reason: &str) -> Self {
        Self::new(Opcode::Close, Frame::close(code, reason).payload)
    }

    #[inline]
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Payload as UTF-8.
    pub fn as_text(&self) -> Result<&str> {
        str::from_utf8(&self.payload).map_err(|_| Error::InvalidInput("payload is not valid UTF-8"))
    }

    /// Status code of a Close message, if it carries one.
    pub fn close_code(&self) -> Option<u16> {
        match (self.opcode, self.payload.as_slice()) {
            (Opcode::Close, [hi, lo, ..]) => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Reason text following the status code of a Close message.
    pub fn close_reason(&self) -> Option<&str> {
        if self.opcode != Opcode::Close || self.payload.len() < 2 {
            return None;
        }
        str::from_utf8(&self.payload[2..]).ok()
    }

    /// Parses a Text or Binary payload into a JSON tree.
    pub fn as_json(&self) -> Result<OwnedValue> {
        if self.is_control() {
            return Err(Error::InvalidInput("control messages carry no JSON"));
        }
        // simd-json parses in place.
        let mut scratch = self.payload.clone();
        simd_json::to_owned_value(&mut scratch).map_err(|e| {
            debug!("json parse failed: {}", e);
            Error::InvalidInput("payload is not valid JSON")
        })
    }

    /// Deserializes a Text or Binary payload into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        if self.is_control() {
            return Err(Error::InvalidInput("control messages carry no JSON"));
        }
        let mut scratch = self.payload.clone();
        simd_json::serde::from_slice(&mut scratch).map_err(|e| {
            debug!("json deserialize failed: {}", e);
            Error::InvalidInput("payload does not match the expected shape")
        })
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.payload.extend_from_slice(bytes);
    }

    /// Unmasked frames for this message.
    ///
    /// Data messages longer than `max_payload` are split into a first frame
    /// with the real opcode followed by Continuation frames; only the last
    /// one has `fin` set. Control messages always yield a single frame.
    pub fn into_frames(self, max_payload: Option<usize>) -> Vec<Frame> {
        let limit = match max_payload {
            Some(limit) if limit > 0 && !self.is_control() && self.payload.len() > limit => limit,
            _ => return vec![Frame::new(self.opcode, self.payload, true)],
        };

        let count = self.payload.len().div_ceil(limit);
        self.payload
            .chunks(limit)
            .enumerate()
            .map(|(i, chunk)| {
                let opcode = if i == 0 { self.opcode } else { Opcode::Continuation };
                Frame::new(opcode, chunk, i + 1 == count)
            })
            .collect()
    }
}
