//! Reassembly of fragmented data messages (RFC 6455 section 5.4).
//!
//! A fragmented message is a Text or Binary frame with FIN=0, zero or more
//! Continuation frames with FIN=0 and a final Continuation with FIN=1.
//! Control frames may arrive between fragments and are delivered on their
//! own without disturbing the message being assembled.

use log::warn;

use crate::error::{Error, Result};
use crate::net::framing::{Frame, Opcode};
use crate::net::message::Message;

#[derive(Debug)]
pub struct FragmentAssembler {
    /// Opcode of the first fragment; `None` while idle.
    initial_opcode: Option<Opcode>,
    buffer: Vec<u8>,
    max_message_size: usize,
}

impl Default for FragmentAssembler {
    fn default() -> Self {
        Self::new(64 * 1024 * 1024)
    }
}

impl FragmentAssembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            initial_opcode: None,
            buffer: Vec::new(),
            max_message_size,
        }
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.initial_opcode.is_none()
    }

    /// Drops any partially assembled message.
    pub fn reset(&mut self) {
        self.initial_opcode = None;
        self.buffer.clear();
    }

    /// Feeds one frame.
    ///
    /// Returns the completed message, if this frame completed one. Control
    /// frames complete immediately. A protocol violation discards the
    /// pending message.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        if frame.opcode.is_control() {
            return Ok(Some(Message::new(frame.opcode, frame.payload)));
        }

        let result = self.push_data(frame);
        if let Err(ref e) = result {
            warn!("fragment reassembly failed: {}", e);
            self.reset();
        }
        result
    }

    fn push_data(&mut self, frame: Frame) -> Result<Option<Message>> {
        match (frame.opcode, self.initial_opcode) {
            (Opcode::Text | Opcode::Binary, None) => {
                self.check_size(frame.payload.len())?;
                if frame.fin {
                    return Ok(Some(Message::new(frame.opcode, frame.payload)));
                }
                self.initial_opcode = Some(frame.opcode);
                self.buffer = frame.payload;
                Ok(None)
            }
            (Opcode::Text | Opcode::Binary, Some(_)) => {
                Err(Error::Protocol("new message started during a fragmented message"))
            }
            (Opcode::Continuation, None) => Err(Error::Protocol("unexpected continuation frame")),
            (Opcode::Continuation, Some(opcode)) => {
                self.check_size(self.buffer.len() + frame.payload.len())?;
                self.buffer.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                self.initial_opcode = None;
                let payload = std::mem::take(&mut self.buffer);
                Ok(Some(Message::new(opcode, payload)))
            }
            _ => Err(Error::Protocol("unexpected opcode in reassembly")),
        }
    }

    fn check_size(&self, total: usize) -> Result<()> {
        if total > self.max_message_size {
            return Err(Error::Protocol("message exceeds the configured size limit"));
        }
        Ok(())
    }
}
