//! RFC 6455 frame representation and encoding.

use bytes::{BufMut, Bytes, BytesMut};

/// Frame opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text data.
    Text,
    /// Binary data.
    Binary,
    /// Connection close.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
}

impl Opcode {
    /// Parse the low nibble of the first header byte. Reserved opcodes yield
    /// `None`.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            _ => return None,
        })
    }

    /// Wire value.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Whether this is a control opcode (close, ping or pong).
    #[must_use]
    pub fn is_control(self) -> bool { self.as_u8() & 0x8 != 0 }
}

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// A complete WebSocket frame with its payload unmasked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsFrame {
    /// Final fragment of a message.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl WsFrame {
    /// A final frame with `opcode` and `payload`.
    #[must_use]
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }

    /// A text frame.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self { Self::new(Opcode::Text, text.into()) }

    /// A binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self { Self::new(Opcode::Binary, data) }

    /// A ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self { Self::new(Opcode::Ping, data) }

    /// A pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self { Self::new(Opcode::Pong, data) }

    /// A close frame carrying `code` and a reason truncated to fit a control
    /// frame.
    #[must_use]
    pub fn close(code: u16, reason: &str) -> Self {
        let mut reason_len = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
        while !reason.is_char_boundary(reason_len) {
            reason_len -= 1;
        }
        let mut payload = BytesMut::with_capacity(2 + reason_len);
        payload.put_u16(code);
        payload.put_slice(&reason.as_bytes()[..reason_len]);
        Self::new(Opcode::Close, payload.freeze())
    }

    /// Status code of a close frame, if present.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != Opcode::Close {
            return None;
        }
        let bytes: [u8; 2] = self.payload.get(..2)?.try_into().ok()?;
        Some(u16::from_be_bytes(bytes))
    }

    /// Payload as text, if valid UTF-8.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> { std::str::from_utf8(&self.payload).ok() }

    /// Serialise the frame into `dst`, masking the payload when `mask` is
    /// given.
    ///
    /// Servers send unmasked frames; clients must mask.
    pub fn encode(&self, dst: &mut BytesMut, mask: Option<[u8; 4]>) {
        let len = self.payload.len();
        dst.reserve(14 + len);
        dst.put_u8(u8::from(self.fin) << 7 | self.opcode.as_u8());
        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        match len {
            0..=125 => dst.put_u8(mask_bit | len as u8),
            126..=0xFFFF => {
                dst.put_u8(mask_bit | 126);
                dst.put_u16(len as u16);
            }
            _ => {
                dst.put_u8(mask_bit | 127);
                dst.put_u64(len as u64);
            }
        }
        match mask {
            Some(key) => {
                dst.put_slice(&key);
                dst.extend(self.payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
            }
            None => dst.put_slice(&self.payload),
        }
    }
}
