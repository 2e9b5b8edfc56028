//! WebSocket frame codec (RFC 6455 section 5.2).
//!
//! ```text
//!  0               1               2               3
//! |F|R|R|R| opcode|M| len (7)     | extended len (0/16/64 bits)  |
//! |I|S|S|S|  (4)  |A|             |                               |
//! |N|V|V|V|       |S|             |                               |
//! | masking key (0/32 bits)       | payload ...                   |
//! ```
//!
//! Multi-byte fields are big-endian.

use arrayvec::ArrayVec;
use log::trace;

use crate::core::source::{ByteSource, SliceSource};
use crate::error::{Error, Result};
use crate::net::mask::apply_mask;

/// Largest payload a control frame may carry, and the largest length that
/// fits the 7-bit field.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest length encoded in the 16-bit extended field.
pub const MAX_MEDIUM_PAYLOAD: usize = 65535;

/// 2 base + 8 extended length + 4 masking key.
pub const MAX_HEADER_SIZE: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    #[inline]
    pub fn is_control(self) -> bool {
        (self as u8) >= 0x8
    }

    #[inline]
    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

/// One frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// Masking key; the frame is masked iff this is present.
    pub mask: Option<u32>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>, fin: bool) -> Self {
        Self {
            fin,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Text, payload, true)
    }

    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Binary, payload, true)
    }

    /// Close frame carrying `code` big-endian followed by `reason`.
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::new(Opcode::Close, payload, true)
    }

    pub fn with_mask(mut self, key: u32) -> Self {
        self.mask = Some(key);
        self
    }

    #[inline]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    #[inline]
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    fn check_control(fin: bool, opcode: Opcode, len: u64) -> Result<()> {
        if opcode.is_control() {
            if !fin {
                return Err(Error::Protocol("control frame must not be fragmented"));
            }
            if len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(Error::Protocol("control frame payload exceeds 125 bytes"));
            }
        }
        Ok(())
    }
}

/// Stateless encoder/decoder with an upper bound on accepted payloads.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload: u64,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_payload: 64 * 1024 * 1024,
        }
    }
}

impl FrameCodec {
    pub fn new(max_payload: u64) -> Self {
        Self { max_payload }
    }

    /// Serializes `frame`, masking the payload if the frame carries a key.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        // Outbound violations are input errors.
        Frame::check_control(frame.fin, frame.opcode, frame.payload.len() as u64)
            .map_err(|_| Error::InvalidInput("control frame must be final and at most 125 bytes"))?;

        let len = frame.payload.len();
        let mut header: ArrayVec<u8, MAX_HEADER_SIZE> = ArrayVec::new();

        // RSV bits stay 0: no extensions are negotiated.
        header.push(((frame.fin as u8) << 7) | frame.opcode as u8);

        let mask_bit = if frame.is_masked() { 0x80 } else { 0x00 };
        if len <= MAX_CONTROL_PAYLOAD {
            header.push(mask_bit | len as u8);
        } else if len <= MAX_MEDIUM_PAYLOAD {
            header.push(mask_bit | 126);
            header.extend((len as u16).to_be_bytes());
        } else {
            header.push(mask_bit | 127);
            header.extend((len as u64).to_be_bytes());
        }

        if let Some(key) = frame.mask {
            header.extend(key.to_be_bytes());
        }
        trace!("encode {:?} fin={} header={}", frame.opcode, frame.fin, hex::encode(&header));

        let mut out = Vec::with_capacity(header.len() + len);
        out.extend_from_slice(&header);
        out.extend_from_slice(&frame.payload);
        if let Some(key) = frame.mask {
            apply_mask(&mut out[header.len()..], key.to_be_bytes());
        }
        Ok(out)
    }

    /// Reads one frame from `src`.
    ///
    /// `src` must deliver all-or-nothing reads. A `WouldBlock` from it is
    /// passed through; with a non-blocking source the caller is expected to
    /// retry from the start of the frame (see [`decode`](Self::decode)).
    pub fn receive<S: ByteSource + ?Sized>(&self, src: &mut S) -> Result<Frame> {
        let head = src.read(2)?;
        let (b0, b1) = (head[0], head[1]);

        if b0 & 0x70 != 0 {
            return Err(Error::Protocol("reserved bits set without a negotiated extension"));
        }
        let fin = b0 & 0x80 != 0;
        let opcode = Opcode::from_u8(b0 & 0x0F).ok_or(Error::Protocol("unknown opcode"))?;
        let masked = b1 & 0x80 != 0;

        let len = match b1 & 0x7F {
            126 => {
                let ext = src.read(2)?;
                u16::from_be_bytes([ext[0], ext[1]]) as u64
            }
            127 => {
                let ext = src.read(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&ext);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 {
                    return Err(Error::Protocol("payload length MSB must be 0"));
                }
                len
            }
            short => short as u64,
        };

        Frame::check_control(fin, opcode, len)?;
        if len > self.max_payload {
            return Err(Error::Protocol("frame payload exceeds the configured limit"));
        }

        let mask = if masked {
            let key = src.read(4)?;
            Some(u32::from_be_bytes([key[0], key[1], key[2], key[3]]))
        } else {
            None
        };

        let mut payload = src.read(len as usize)?;
        if let Some(key) = mask {
            apply_mask(&mut payload, key.to_be_bytes());
        }
        trace!("decode {:?} fin={} len={} masked={}", opcode, fin, len, masked);

        Ok(Frame {
            fin,
            opcode,
            mask,
            payload,
        })
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` holds only part of a frame, otherwise the
    /// frame and the number of bytes it occupied.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Frame, usize)>> {
        let mut src = SliceSource::new(buf);
        match self.receive(&mut src) {
            Ok(frame) => Ok(Some((frame, src.position()))),
            Err(Error::WouldBlock) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ring_buffer::RingByteBuffer;

    fn round_trip(frame: &Frame) -> Frame {
        let codec = FrameCodec::default();
        let bytes = codec.encode(frame).unwrap();
        let (decoded, used) = codec.decode(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        decoded
    }

    #[test]
    fn test_opcode_classes() {
        assert!(Opcode::Ping.is_control());
        assert!(Opcode::Pong.is_control());
        assert!(Opcode::Close.is_control());
        assert!(Opcode::Text.is_data());
        assert!(Opcode::Binary.is_data());
        assert!(Opcode::Continuation.is_data());
        assert_eq!(Opcode::from_u8(0x3), None);
        assert_eq!(Opcode::from_u8(0xA), Some(Opcode::Pong));
    }

    #[test]
    fn test_round_trip_boundary_lengths() {
        for len in [0usize, 1, 125, 126, 127, 65535, 65536] {
            for opcode in [Opcode::Text, Opcode::Binary] {
                let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
                let frame = Frame::new(opcode, payload, true).with_mask(0x1234_5678);
                assert_eq!(round_trip(&frame), frame, "len {} {:?}", len, opcode);

                let unmasked = Frame::new(opcode, frame.payload.clone(), true);
                assert_eq!(round_trip(&unmasked), unmasked);
            }
        }
    }

    #[test]
    fn test_length_field_selection() {
        let codec = FrameCodec::default();

        let bytes = codec.encode(&Frame::binary(vec![0; 125])).unwrap();
        assert_eq!(bytes[1], 125);
        assert_eq!(bytes.len(), 2 + 125);

        let bytes = codec.encode(&Frame::binary(vec![0; 126])).unwrap();
        assert_eq!(bytes[1], 126);
        assert_eq!(&bytes[2..4], &[0x00, 0x7E]);
        assert_eq!(bytes.len(), 4 + 126);

        let bytes = codec.encode(&Frame::binary(vec![0; 65536])).unwrap();
        assert_eq!(bytes[1], 127);
        assert_eq!(&bytes[2..10], &[0, 0, 0, 0, 0, 1, 0, 0]);
        assert_eq!(bytes.len(), 10 + 65536);
    }

    #[test]
    fn test_masked_text_wire_bytes() {
        let frame = Frame::text("hi").with_mask(0xAABB_CCDD);
        let bytes = FrameCodec::default().encode(&frame).unwrap();
        assert_eq!(
            bytes,
            vec![0x81, 0x82, 0xAA, 0xBB, 0xCC, 0xDD, b'h' ^ 0xAA, b'i' ^ 0xBB]
        );
    }

    #[test]
    fn test_decode_partial_input() {
        let codec = FrameCodec::default();
        let bytes = codec.encode(&Frame::binary(vec![7; 300]).with_mask(1)).unwrap();
        for cut in [0, 1, 2, 3, 4, 8, bytes.len() - 1] {
            assert!(codec.decode(&bytes[..cut]).unwrap().is_none(), "cut {}", cut);
        }
        assert!(codec.decode(&bytes).unwrap().is_some());
    }

    #[test]
    fn test_decode_two_frames_back_to_back() {
        let codec = FrameCodec::default();
        let mut bytes = codec.encode(&Frame::text("one")).unwrap();
        bytes.extend(codec.encode(&Frame::text("two")).unwrap());

        let (first, used) = codec.decode(&bytes).unwrap().unwrap();
        assert_eq!(first.payload, b"one");
        let (second, _) = codec.decode(&bytes[used..]).unwrap().unwrap();
        assert_eq!(second.payload, b"two");
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let result = FrameCodec::default().decode(&[0x83, 0x00]);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let result = FrameCodec::default().decode(&[0xC1, 0x00]);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_fragmented_ping_rejected() {
        // FIN=0, opcode Ping.
        let result = FrameCodec::default().decode(&[0x09, 0x00]);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_oversized_ping_rejected() {
        let mut bytes = vec![0x89, 126, 0x00, 126];
        bytes.extend(vec![0u8; 126]);
        let result = FrameCodec::default().decode(&bytes);
        assert!(matches!(result, Err(Error::Protocol(_))));

        // Rejected from the header alone, before the payload arrives.
        let result = FrameCodec::default().decode(&bytes[..4]);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_encode_refuses_invalid_control_frames() {
        let codec = FrameCodec::default();
        assert!(matches!(
            codec.encode(&Frame::new(Opcode::Ping, vec![0; 126], true)),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            codec.encode(&Frame::new(Opcode::Pong, vec![], false)),
            Err(Error::InvalidInput(_))
        ));
        assert!(codec.encode(&Frame::new(Opcode::Ping, vec![0; 125], true)).is_ok());
    }

    #[test]
    fn test_payload_limit() {
        let codec = FrameCodec::new(10);
        let bytes = FrameCodec::default().encode(&Frame::binary(vec![0; 11])).unwrap();
        assert!(matches!(codec.decode(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_length_msb_rejected() {
        let mut bytes = vec![0x82, 127];
        bytes.extend(u64::MAX.to_be_bytes());
        assert!(matches!(FrameCodec::default().decode(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_close_frame_code_round_trip() {
        let frame = Frame::close(1001, "going away").with_mask(0xDEAD_BEEF);
        let decoded = round_trip(&frame);
        assert_eq!(u16::from_be_bytes([decoded.payload[0], decoded.payload[1]]), 1001);
        assert_eq!(&decoded.payload[2..], b"going away");
    }

    #[test]
    fn test_receive_from_ring_buffer() {
        let codec = FrameCodec::default();
        let mut ring = RingByteBuffer::growable(16);
        ring.write(&codec.encode(&Frame::binary(vec![9; 40]).with_mask(5)).unwrap())
            .unwrap();
        let frame = codec.receive(&mut ring).unwrap();
        assert_eq!(frame.payload, vec![9; 40]);
        assert!(ring.is_empty());
    }
}
