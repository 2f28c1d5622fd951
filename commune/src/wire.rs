//! Wire framing for the byte stream.
//!
//! Frame format: `[length:4][payload:N]`
//!
//! - **length**: payload size in bytes (big-endian u32)
//! - **payload**: codec-encoded application data
//!
//! There is no handshake, no version byte, and no checksum; a reliable
//! local stream socket carries the frames and both ends agree on the codec
//! out of band. The framer enforces no payload ceiling of its own beyond
//! what the 32-bit prefix can express; practical limits belong to callers
//! and codecs.

/// Size of the length prefix preceding every payload.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Wire format error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    /// Payload cannot be represented by the 32-bit length prefix.
    #[error("payload too large for a 32-bit frame: {size} bytes")]
    OversizedPayload {
        /// Actual payload size in bytes.
        size: usize,
    },
}

/// Encode one payload as a length-prefixed frame.
///
/// # Errors
///
/// Returns `OversizedPayload` when the payload length does not fit in u32.
///
/// # Examples
///
/// ```
/// use commune::wire::{encode_frame, FrameDecoder};
///
/// let frame = encode_frame(b"hello").expect("encode");
/// assert_eq!(&frame[..4], &5u32.to_be_bytes());
///
/// let mut decoder = FrameDecoder::new();
/// assert_eq!(decoder.feed(&frame), vec![b"hello".to_vec()]);
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let length = u32::try_from(payload.len()).map_err(|_| WireError::OversizedPayload {
        size: payload.len(),
    })?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Streaming frame reassembler.
///
/// Chunk-size-agnostic: bytes may arrive split anywhere, including through
/// the middle of a length prefix, and several frames may share one chunk.
/// Each completed payload is yielded exactly once, in arrival order.
///
/// State is exactly an accumulation buffer plus the number of payload bytes
/// still owed to the frame in progress (`0` meaning a new length prefix is
/// expected next).
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    pending: usize,
}

impl FrameDecoder {
    /// Create a decoder expecting a length prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one chunk and return every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            if self.pending == 0 {
                if self.buffer.len() < LENGTH_PREFIX_SIZE {
                    break;
                }
                let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
                prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_SIZE]);
                self.buffer.drain(..LENGTH_PREFIX_SIZE);

                let declared = u32::from_be_bytes(prefix) as usize;
                if declared == 0 {
                    frames.push(Vec::new());
                    continue;
                }
                self.pending = declared;
            }

            if self.buffer.len() < self.pending {
                break;
            }

            let frame: Vec<u8> = self.buffer.drain(..self.pending).collect();
            self.pending = 0;
            frames.push(frame);
        }
        frames
    }

    /// Payload bytes still owed to the frame in progress.
    pub fn pending_bytes(&self) -> usize {
        self.pending
    }

    /// Bytes currently buffered but not yet yielded.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
