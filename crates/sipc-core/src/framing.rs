//! Length-prefixed framing for stream transports.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;

/// Maximum frame size for channel messages (64KB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX: usize = 4;

/// Framing error
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("Frame too large: {0} bytes (max: {1})")]
    TooLarge(usize, usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Length-prefixed frame codec
#[derive(Debug, Clone, Copy)]
pub struct LengthCodec {
    max_frame_size: usize,
}

impl Default for LengthCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl LengthCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Format: length (4 bytes BE) || data
    pub fn encode(&self, data: &[u8], dst: &mut BytesMut) -> Result<(), FramingError> {
        if data.len() > self.max_frame_size {
            return Err(FramingError::TooLarge(data.len(), self.max_frame_size));
        }
        dst.reserve(LENGTH_PREFIX + data.len());
        dst.put_u32(data.len() as u32);
        dst.extend_from_slice(data);
        Ok(())
    }

    /// Streaming decoder for partial reads.
    /// Returns Some(frame) when a complete frame is buffered, None if more data is needed.
    pub fn decode_stream(&self, buf: &mut BytesMut) -> Result<Option<Bytes>, FramingError> {
        if buf.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let len = {
            let mut len_buf = &buf[..LENGTH_PREFIX];
            len_buf.get_u32() as usize
        };

        if len > self.max_frame_size {
            return Err(FramingError::TooLarge(len, self.max_frame_size));
        }

        if buf.len() < LENGTH_PREFIX + len {
            buf.reserve(LENGTH_PREFIX + len - buf.len());
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX);
        Ok(Some(buf.split_to(len).freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_too_large() {
        let codec = LengthCodec::default();
        let data = vec![0u8; MAX_FRAME_SIZE + 1];
        let mut out = BytesMut::new();
        assert!(matches!(
            codec.encode(&data, &mut out),
            Err(FramingError::TooLarge(n, MAX_FRAME_SIZE)) if n == MAX_FRAME_SIZE + 1
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_oversized_prefix_rejected_before_body_arrives() {
        let codec = LengthCodec::new(16);
        let mut buf = BytesMut::new();
        buf.put_u32(17);
        assert!(codec.decode_stream(&mut buf).is_err());
    }

    #[test]
    fn test_streaming_decoder() {
        let codec = LengthCodec::default();
        let mut encoded = BytesMut::new();
        codec.encode(b"hello", &mut encoded).unwrap();

        // Partial read
        let mut buf = BytesMut::from(&encoded[..2]);
        assert!(codec.decode_stream(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&encoded[2..6]);
        assert!(codec.decode_stream(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[6..]);
        let frame = codec.decode_stream(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_back_to_back_frames() {
        let codec = LengthCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(b"one", &mut buf).unwrap();
        codec.encode(b"", &mut buf).unwrap();
        codec.encode(b"three", &mut buf).unwrap();

        assert_eq!(codec.decode_stream(&mut buf).unwrap().unwrap().as_ref(), b"one");
        assert_eq!(codec.decode_stream(&mut buf).unwrap().unwrap().as_ref(), b"");
        assert_eq!(codec.decode_stream(&mut buf).unwrap().unwrap().as_ref(), b"three");
        assert!(codec.decode_stream(&mut buf).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn prop_any_split_point_reassembles(
            data in prop::collection::vec(any::<u8>(), 0..512),
            split in any::<prop::sample::Index>(),
        ) {
            let codec = LengthCodec::default();
            let mut encoded = BytesMut::new();
            codec.encode(&data, &mut encoded).unwrap();
            let cut = split.index(encoded.len() + 1);

            let mut buf = BytesMut::from(&encoded[..cut]);
            let early = codec.decode_stream(&mut buf).unwrap();
            if cut < encoded.len() {
                prop_assert!(early.is_none());
                buf.extend_from_slice(&encoded[cut..]);
                let frame = codec.decode_stream(&mut buf).unwrap().unwrap();
                prop_assert_eq!(frame.as_ref(), data.as_slice());
            } else {
                let frame = early.unwrap();
                prop_assert_eq!(frame.as_ref(), data.as_slice());
            }
        }
    }
}
