use bytes::BytesMut;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use std::io;

const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

fn calculate_buffer_size(payload_size: usize) -> usize {
    if payload_size <= 4096 {
        4096 // 4 KB for small payloads
    } else if payload_size <= 65536 {
        16384 // 16 KB for medium payloads
    } else {
        65536 // 64 KB for large payloads
    }
}

/// Inflates permessage-deflate payloads. The context is reset for every
/// frame; see DESIGN.md on context takeover.
pub(crate) struct Inflater {
    decompressor: Decompress,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            decompressor: Decompress::new(false),
        }
    }

    pub fn decompress(&mut self, payload: &[u8]) -> Result<Vec<u8>, io::Error> {
        // A lone zero byte is how an empty compressed payload arrives on
        // the wire.
        if matches!(payload, [] | [0x00]) {
            return Ok(Vec::new());
        }

        // The sender strips the sync-flush tail before framing; put it back
        // so the stream terminates.
        let mut input = BytesMut::from(payload);
        input.extend_from_slice(&DEFLATE_TRAILER);

        self.decompressor.reset(false);

        let buffer_size = calculate_buffer_size(input.len());
        let mut decompressed = BytesMut::with_capacity(buffer_size);
        let mut buffer = Vec::with_capacity(buffer_size);

        let before_in = self.decompressor.total_in();
        while self.decompressor.total_in() - before_in < input.len() as u64 {
            let i = (self.decompressor.total_in() - before_in) as usize;
            let status =
                self.decompressor
                    .decompress_vec(&input[i..], &mut buffer, FlushDecompress::Sync)?;
            let progressed = !buffer.is_empty()
                || (self.decompressor.total_in() - before_in) as usize != i;
            decompressed.extend_from_slice(&buffer);
            buffer.clear();

            match status {
                Status::StreamEnd => break,
                _ if progressed => {}
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "corrupt deflate stream",
                    ))
                }
            }
        }

        Ok(decompressed.to_vec())
    }
}

/// Deflates outgoing payloads, one independent stream per frame.
pub(crate) struct Deflater {
    compressor: Compress,
}

impl Deflater {
    pub fn new() -> Self {
        Self {
            compressor: Compress::new(Compression::default(), false),
        }
    }

    pub fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>, io::Error> {
        if payload.is_empty() {
            return Ok(Vec::new());
        }

        self.compressor.reset();

        let buffer_size = calculate_buffer_size(payload.len());
        let mut compressed = Vec::with_capacity(buffer_size);
        let mut buffer = Vec::with_capacity(buffer_size);

        let before_in = self.compressor.total_in();
        loop {
            let consumed = (self.compressor.total_in() - before_in) as usize;
            let before_out = self.compressor.total_out();
            let status =
                self.compressor
                    .compress_vec(&payload[consumed..], &mut buffer, FlushCompress::Sync)?;
            compressed.extend_from_slice(&buffer);
            buffer.clear();

            let all_consumed = (self.compressor.total_in() - before_in) as usize == payload.len();
            let flushed = self.compressor.total_out() == before_out;
            if status == Status::StreamEnd || (all_consumed && flushed) {
                break;
            }
        }

        // The sync flush ends on an empty stored block; the receiver appends
        // it again before inflating.
        if compressed.ends_with(&DEFLATE_TRAILER) {
            compressed.truncate(compressed.len() - DEFLATE_TRAILER.len());
        }

        Ok(compressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut deflater = Deflater::new();
        let mut inflater = Inflater::new();

        let payload = b"a payload that deflate can actually shrink shrink shrink shrink";
        let compressed = deflater.compress(payload).unwrap();
        assert!(!compressed.ends_with(&DEFLATE_TRAILER));

        let restored = inflater.decompress(&compressed).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_contexts_reset_between_frames() {
        let mut deflater = Deflater::new();
        let mut inflater = Inflater::new();

        for _ in 0..3 {
            let compressed = deflater.compress(b"same frame twice").unwrap();
            // Every frame is a self-contained stream, so a fresh inflater
            // must be able to read it too.
            let mut fresh = Inflater::new();
            assert_eq!(fresh.decompress(&compressed).unwrap(), b"same frame twice");
            assert_eq!(inflater.decompress(&compressed).unwrap(), b"same frame twice");
        }
    }

    #[test]
    fn test_lone_zero_byte_is_empty() {
        let mut inflater = Inflater::new();
        assert!(inflater.decompress(&[0x00]).unwrap().is_empty());
        assert!(inflater.decompress(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_large_payload() {
        let mut deflater = Deflater::new();
        let mut inflater = Inflater::new();

        let payload = vec![0x42u8; 200_000];
        let compressed = deflater.compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());
        assert_eq!(inflater.decompress(&compressed).unwrap(), payload);
    }
}
