//! Length-prefixed framing.
//!
//! Each frame is a 4-byte big-endian payload length followed by the payload
//! bytes. Payloads are opaque; empty frames are legal.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Size of the length prefix.
pub const HEADER_BYTES: usize = 4;

/// Largest payload accepted in either direction.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The payload exceeds [`MAX_FRAME_BYTES`].
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    TooLarge {
        /// Declared or actual payload length.
        len: usize,
    },
}

/// Encodes `payload` as a single frame.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = checked_len(payload.len())?;
    let mut frame = Vec::with_capacity(HEADER_BYTES + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn checked_len(len: usize) -> Result<u32, FrameError> {
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge { len });
    }
    u32::try_from(len).map_err(|_| FrameError::TooLarge { len })
}

/// Incremental decoder for bytes arriving in arbitrary chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Removes and returns the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let Some(header) = self.buffer.get(..HEADER_BYTES) else {
            return Ok(None);
        };
        let mut prefix = [0_u8; HEADER_BYTES];
        prefix.copy_from_slice(header);
        let len = usize::try_from(u32::from_be_bytes(prefix))
            .map_err(|_| FrameError::TooLarge { len: usize::MAX })?;
        if len > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge { len });
        }
        if self.buffer.len() < HEADER_BYTES + len {
            return Ok(None);
        }
        let payload = self
            .buffer
            .drain(..HEADER_BYTES + len)
            .skip(HEADER_BYTES)
            .collect();
        Ok(Some(payload))
    }

    /// Number of buffered bytes not yet returned as frames.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops any partially received frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Reads one frame, blocking until it is complete.
///
/// Returns `Ok(None)` when the stream ends cleanly before a new frame starts.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut prefix = [0_u8; HEADER_BYTES];
    let mut filled = 0;
    while filled < HEADER_BYTES {
        let Some(window) = prefix.get_mut(filled..) else {
            break;
        };
        match reader.read(window) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }

    let len = usize::try_from(u32::from_be_bytes(prefix))
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame length overflow"))?;
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            FrameError::TooLarge { len },
        ));
    }
    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Writes `payload` as one frame and flushes the writer.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let frame =
        encode(payload).map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;
    writer.write_all(&frame)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn decoder_waits_for_complete_frames() {
        let frame = encode(b"PONG").expect("encode");
        let mut decoder = FrameDecoder::new();

        let (head, tail) = frame.split_at(3);
        decoder.push(head);
        assert_eq!(decoder.next_frame(), Ok(None));
        decoder.push(tail);
        assert_eq!(decoder.next_frame(), Ok(Some(b"PONG".to_vec())));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn decoder_splits_back_to_back_frames() {
        let mut bytes = encode(b"one").expect("encode");
        bytes.extend(encode(b"").expect("encode"));
        bytes.extend(encode(b"three").expect("encode"));
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);

        assert_eq!(decoder.next_frame(), Ok(Some(b"one".to_vec())));
        assert_eq!(decoder.next_frame(), Ok(Some(Vec::new())));
        assert_eq!(decoder.next_frame(), Ok(Some(b"three".to_vec())));
        assert_eq!(decoder.next_frame(), Ok(None));
    }

    #[test]
    fn decoder_rejects_oversized_headers() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&u32::MAX.to_be_bytes());
        assert!(matches!(
            decoder.next_frame(),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn read_frame_reports_clean_end_of_stream() {
        let mut empty = Cursor::new(Vec::new());
        assert!(read_frame(&mut empty).expect("clean eof").is_none());

        let mut truncated = Cursor::new(vec![0, 0]);
        let error = read_frame(&mut truncated).expect_err("truncated header");
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn write_then_read_preserves_payload_bytes() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"multi\nline\0payload").expect("write");
        let frame = read_frame(&mut Cursor::new(wire)).expect("read");
        assert_eq!(frame.as_deref(), Some(&b"multi\nline\0payload"[..]));
    }
}
