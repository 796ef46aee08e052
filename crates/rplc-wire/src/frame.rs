use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Size in bytes of the length prefix that precedes every serialized
/// message on the wire.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum accepted body size, guarding against a corrupt or malicious
/// length prefix turning into an unbounded allocation.
const MAX_FRAME_BODY_SIZE: u32 = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("frame body of {0} bytes exceeds the maximum of {MAX_FRAME_BODY_SIZE}")]
    TooLarge(u32),
    #[error("failed to encode frame body: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A single length-prefixed, JSON-encoded message.
pub struct Frame;

impl Frame {
    /// Serializes `body` and writes it to `out` as `[len: u32 BE][json]`.
    pub fn write<T: Serialize>(out: &mut impl Write, body: &T) -> Result<(), FrameError> {
        let encoded = serde_json::to_vec(body)?;
        let len = u32::try_from(encoded.len()).map_err(|_| FrameError::TooLarge(u32::MAX))?;
        if len > MAX_FRAME_BODY_SIZE {
            return Err(FrameError::TooLarge(len));
        }
        out.write_all(&len.to_be_bytes())?;
        out.write_all(&encoded)?;
        Ok(())
    }

    /// Blocks until a full frame has been read from `input` and decodes
    /// its body as `T`.
    pub fn read<T: DeserializeOwned>(input: &mut impl Read) -> Result<T, FrameError> {
        let mut len_bytes = [0u8; FRAME_HEADER_SIZE];
        input.read_exact(&mut len_bytes)?;
        let len = u32::from_be_bytes(len_bytes);
        if len > MAX_FRAME_BODY_SIZE {
            return Err(FrameError::TooLarge(len));
        }
        let mut body = vec![0u8; len as usize];
        input.read_exact(&mut body)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Attempts to decode one frame out of an in-memory buffer accumulated
    /// from non-blocking reads, returning the number of bytes consumed on
    /// success, or `None` if the buffer does not yet hold a full frame.
    /// Used by the `mio`-driven worker and messenger event loops, which
    /// cannot block on `read_exact`.
    pub fn try_decode<T: DeserializeOwned>(buf: &[u8]) -> Result<Option<(T, usize)>, FrameError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let len = u32::from_be_bytes(buf[..FRAME_HEADER_SIZE].try_into().expect("4 bytes"));
        if len > MAX_FRAME_BODY_SIZE {
            return Err(FrameError::TooLarge(len));
        }
        let total = FRAME_HEADER_SIZE + len as usize;
        if buf.len() < total {
            return Ok(None);
        }
        let body: T = serde_json::from_slice(&buf[FRAME_HEADER_SIZE..total])?;
        Ok(Some((body, total)))
    }

    /// Encodes `body` as a standalone `Vec<u8>` frame, for callers that
    /// assemble an outbound buffer themselves (the Messenger's per-worker
    /// send queue).
    pub fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>, FrameError> {
        let mut out = Vec::new();
        Frame::write(&mut out, body)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn write_then_read_round_trips() {
        let sample = Sample { a: 7, b: "hello".into() };
        let mut buf = Vec::new();
        Frame::write(&mut buf, &sample).unwrap();
        let mut cursor = &buf[..];
        let decoded: Sample = Frame::read(&mut cursor).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn try_decode_reports_incomplete_buffer() {
        let sample = Sample { a: 1, b: "x".into() };
        let encoded = Frame::encode(&sample).unwrap();
        let partial = &encoded[..encoded.len() - 1];
        let decoded: Option<(Sample, usize)> = Frame::try_decode(partial).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn try_decode_consumes_exact_frame_and_leaves_remainder() {
        let a = Sample { a: 1, b: "x".into() };
        let b = Sample { a: 2, b: "y".into() };
        let mut buf = Frame::encode(&a).unwrap();
        buf.extend(Frame::encode(&b).unwrap());

        let (decoded_a, consumed): (Sample, usize) = Frame::try_decode(&buf).unwrap().unwrap();
        assert_eq!(decoded_a, a);
        let (decoded_b, _): (Sample, usize) = Frame::try_decode(&buf[consumed..]).unwrap().unwrap();
        assert_eq!(decoded_b, b);
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_be_bytes());
        let result: Result<Option<(Sample, usize)>, FrameError> = Frame::try_decode(&buf);
        assert!(matches!(result, Err(FrameError::TooLarge(_))));
    }
}
