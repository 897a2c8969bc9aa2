use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the fixed message header: magic, command, length, checksum
pub const HEADER_SIZE: usize = 24;

/// Width of the NUL-padded command field
pub const COMMAND_SIZE: usize = 12;

/// Maximum payload size in bytes
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024; // 32 MB

/// Errors raised while framing or unframing a message
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unexpected network magic {found:#010x} (expected {expected:#010x})")]
    BadMagic { expected: u32, found: u32 },

    #[error("invalid command name {0:?}")]
    BadCommand(String),

    #[error("payload too large: {0} bytes")]
    TooLarge(usize),

    #[error("checksum mismatch for {command} message")]
    BadChecksum { command: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One protocol message: a command name and its opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(command: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            command: command.into(),
            payload: payload.into(),
        }
    }
}

/// First four bytes of the double SHA-256 of `payload`
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(Sha256::digest(payload));
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

/// Codec for the Bitcoin message envelope.
///
/// Layout: magic (u32 LE), command (12 bytes, NUL padded), payload length
/// (u32 LE), checksum (4 bytes), payload.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    magic: u32,
}

impl FrameCodec {
    pub fn new(magic: u32) -> Self {
        Self { magic }
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }
}

/// Whether `command` fits the 12-byte printable-ASCII command field
pub fn is_valid_command(command: &str) -> bool {
    let name = command.as_bytes();
    !name.is_empty() && name.len() <= COMMAND_SIZE && name.iter().all(|b| b.is_ascii_graphic())
}

fn parse_command(raw: &[u8; COMMAND_SIZE]) -> Result<String, FrameError> {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(COMMAND_SIZE);
    let (name, padding) = raw.split_at(end);
    if name.is_empty() || !name.iter().all(|b| b.is_ascii_graphic()) || padding.iter().any(|b| *b != 0) {
        return Err(FrameError::BadCommand(String::from_utf8_lossy(raw).into_owned()));
    }
    Ok(String::from_utf8_lossy(name).into_owned())
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header = &src[..HEADER_SIZE];
        let magic = header.get_u32_le();
        if magic != self.magic {
            return Err(FrameError::BadMagic {
                expected: self.magic,
                found: magic,
            });
        }

        let mut command = [0u8; COMMAND_SIZE];
        header.copy_to_slice(&mut command);
        let length = header.get_u32_le() as usize;
        let mut expected_checksum = [0u8; 4];
        header.copy_to_slice(&mut expected_checksum);

        if length > MAX_PAYLOAD_SIZE {
            return Err(FrameError::TooLarge(length));
        }

        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        let command = parse_command(&command)?;
        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();

        if checksum(&payload) != expected_checksum {
            return Err(FrameError::BadChecksum { command });
        }

        Ok(Some(Frame { command, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        if !is_valid_command(&frame.command) {
            return Err(FrameError::BadCommand(frame.command));
        }
        let name = frame.command.as_bytes();
        if frame.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::TooLarge(frame.payload.len()));
        }

        dst.reserve(HEADER_SIZE + frame.payload.len());
        dst.put_u32_le(self.magic);
        dst.put_slice(name);
        dst.put_bytes(0, COMMAND_SIZE - name.len());
        dst.put_u32_le(frame.payload.len() as u32);
        dst.put_slice(&checksum(&frame.payload));
        dst.put_slice(&frame.payload);
        Ok(())
    }
}
