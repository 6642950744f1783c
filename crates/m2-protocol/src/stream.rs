//! Frame reassembly for the serial bridge profile
//!
//! The serial bridge forwards whatever bytes it has whenever it has them, so a
//! notification may carry half a frame or several frames. Frames are:
//! - Bytes 0-5: Header fields
//! - Byte 6: Payload length (0-8)
//! - Bytes 7+: Payload
//!
//! There is no sync marker. A length byte outside 0-8 means the stream is
//! corrupt at an unknown position, so everything buffered is thrown away and
//! extraction resumes with the next notification.

use bytes::{Bytes, BytesMut};

use crate::message::MAX_PAYLOAD_LEN;

/// Serial frame header size, length byte included
pub const SERIAL_HEADER_LEN: usize = 7;

/// Offset of the payload length byte
pub const SERIAL_LENGTH_OFFSET: usize = 6;

/// Largest possible serial frame
pub const MAX_SERIAL_FRAME_LEN: usize = SERIAL_HEADER_LEN + MAX_PAYLOAD_LEN;

/// Buffer contents dropped because of a corrupt length byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resync {
    /// The out-of-range length that was read
    pub declared_len: usize,
    /// Bytes discarded from the buffer
    pub dropped: usize,
}

/// Result of draining a buffer
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamOutput {
    /// Complete frames, in stream order
    pub frames: Vec<Bytes>,
    /// Set when the buffer was discarded
    pub resync: Option<Resync>,
}

/// Extract every complete frame from `buffer`, leaving the partial tail
fn drain(buffer: &mut BytesMut) -> StreamOutput {
    let mut output = StreamOutput::default();

    while buffer.len() >= SERIAL_HEADER_LEN {
        let len = buffer[SERIAL_LENGTH_OFFSET] as usize;
        if len > MAX_PAYLOAD_LEN {
            output.resync = Some(Resync {
                declared_len: len,
                dropped: buffer.len(),
            });
            buffer.clear();
            break;
        }

        let total = SERIAL_HEADER_LEN + len;
        if buffer.len() < total {
            break;
        }
        output.frames.push(buffer.split_to(total).freeze());
    }

    output
}

/// Split a byte buffer into complete frames and the unconsumed remainder
///
/// The remainder is empty when the buffer was discarded for resynchronization.
pub fn decode_frame_stream(buffer: &[u8]) -> (Vec<Bytes>, Bytes) {
    let mut buffer = BytesMut::from(buffer);
    let output = drain(&mut buffer);
    (output.frames, buffer.freeze())
}

/// Stateful reassembler fed one notification at a time
///
/// After every [`push`](Self::push) the buffer holds less than one complete
/// frame, so it never grows beyond [`MAX_SERIAL_FRAME_LEN`] between
/// notifications.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buffer: BytesMut,
}

impl FrameReassembler {
    /// Create an empty reassembler
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_SERIAL_FRAME_LEN * 4),
        }
    }

    /// Append a notification and extract every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> StreamOutput {
        self.buffer.extend_from_slice(chunk);
        drain(&mut self.buffer)
    }

    /// Bytes waiting for the rest of their frame
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop buffered bytes (on disconnect)
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
