//! Framing: MAGIC(2) | KIND(1) | LENGTH(1) | PAYLOAD(LENGTH bytes, UTF-8).

use crate::protocol::{Frame, MAGIC};

const HEADER_LEN: usize = 4;

/// Largest payload a frame can carry (LENGTH is one byte).
pub const MAX_PAYLOAD: usize = 255;

/// Encode one frame. Fails if the payload exceeds the one-byte length field;
/// no partial output is produced.
pub fn encode_frame(kind: u8, payload: &str) -> Result<Vec<u8>, FrameEncodeError> {
    let data = payload.as_bytes();
    if data.len() > MAX_PAYLOAD {
        return Err(FrameEncodeError::PayloadTooLarge(data.len()));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + data.len());
    out.extend_from_slice(&MAGIC);
    out.push(kind);
    out.push(data.len() as u8);
    out.extend_from_slice(data);
    Ok(out)
}

/// Error encoding a frame (payload over the length-field limit).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameEncodeError {
    #[error("payload too large: {0} bytes (max {MAX_PAYLOAD})")]
    PayloadTooLarge(usize),
}

/// Decode one frame from the front of `bytes`. Returns the frame and the
/// number of bytes consumed. `NeedMore`: wait for more input. `BadMagic`: the
/// stream is desynchronized; the caller must drop exactly one byte and retry.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), FrameDecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameDecodeError::NeedMore);
    }
    if bytes[0..2] != MAGIC {
        return Err(FrameDecodeError::BadMagic);
    }
    let kind = bytes[2];
    let len = bytes[3] as usize;
    if bytes.len() < HEADER_LEN + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let payload = bytes[HEADER_LEN..HEADER_LEN + len].to_vec();
    Ok((Frame { kind, payload }, HEADER_LEN + len))
}

/// Decode outcome short of a complete frame.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("bad magic")]
    BadMagic,
}
