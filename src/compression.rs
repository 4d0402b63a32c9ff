//! Payload compression handling
//!
//! Stacks declare how their payload bytes are stored on disk. This reader
//! never writes, so only decompression is implemented. Decompression is
//! bounded by the sample count the header declares, which keeps a
//! mislabeled or hostile payload from allocating past its stated size.

use std::cmp::Ordering;
use std::io::Read;

use flate2::read::ZlibDecoder;
use serde::{Deserialize, Serialize};

/// Compression methods a stack can declare.
///
/// Discriminants are the codes stored in the stack header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum Compression {
    /// Payload bytes are the raw samples
    None = 0,
    /// Payload is one zlib stream
    Zlib = 1,
}

impl Compression {
    /// Parse a header code, `None` for codes this reader does not know.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Compression::None),
            1 => Some(Compression::Zlib),
            _ => None,
        }
    }

    /// The header code of this compression method
    pub fn code(&self) -> u32 {
        *self as u32
    }
}

/// Decode a stack payload to exactly `expected` bytes.
///
/// Reads at most `expected + 1` bytes out of a zlib stream so an
/// overlong stream is detected without decoding it in full. Error strings
/// become `CorruptPayload` reasons at the call site.
pub(crate) fn decompress_payload(
    method: Compression,
    data: Vec<u8>,
    expected: usize,
) -> Result<Vec<u8>, String> {
    match method {
        Compression::None => {
            if data.len() != expected {
                return Err(format!(
                    "payload holds {} bytes, shape and data type require {}",
                    data.len(),
                    expected
                ));
            }
            Ok(data)
        }
        Compression::Zlib => {
            let mut decompressed = Vec::new();
            let limit = (expected as u64).saturating_add(1);
            let mut decoder = ZlibDecoder::new(data.as_slice()).take(limit);
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| format!("zlib stream error: {}", e))?;
            match decompressed.len().cmp(&expected) {
                Ordering::Equal => Ok(decompressed),
                Ordering::Less => Err(format!(
                    "payload decompressed to {} bytes, shape and data type require {}",
                    decompressed.len(),
                    expected
                )),
                Ordering::Greater => Err(format!(
                    "payload decompresses past the {} bytes shape and data type require",
                    expected
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression as FlateCompression;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), FlateCompression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_compression_codes() {
        assert_eq!(Compression::from_code(0), Some(Compression::None));
        assert_eq!(Compression::from_code(1), Some(Compression::Zlib));
        assert_eq!(Compression::from_code(2), None);
        assert_eq!(Compression::Zlib.code(), 1);
    }

    #[test]
    fn test_raw_passthrough() {
        let data = b"Hello, world!".to_vec();
        let out = decompress_payload(Compression::None, data.clone(), data.len()).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_raw_size_mismatch() {
        let err = decompress_payload(Compression::None, vec![0u8; 10], 12).unwrap_err();
        assert!(err.contains("10 bytes"));
    }

    #[test]
    fn test_zlib_round_trip() {
        let data = b"stack payload ".repeat(64);
        let compressed = zlib(&data);
        assert!(compressed.len() < data.len());
        let out = decompress_payload(Compression::Zlib, compressed, data.len()).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_zlib_truncated_stream() {
        let data = b"stack payload ".repeat(64);
        let mut compressed = zlib(&data);
        compressed.truncate(compressed.len() - 1);
        assert!(decompress_payload(Compression::Zlib, compressed, data.len()).is_err());
    }

    #[test]
    fn test_zlib_short_stream() {
        let compressed = zlib(&[7u8; 16]);
        let err = decompress_payload(Compression::Zlib, compressed, 32).unwrap_err();
        assert!(err.contains("16 bytes"));
    }

    #[test]
    fn test_zlib_expected_size_at_usize_max() {
        let compressed = zlib(&[7u8; 8]);
        let err = decompress_payload(Compression::Zlib, compressed, usize::MAX).unwrap_err();
        assert!(err.contains("8 bytes"));
    }

    #[test]
    fn test_zlib_overlong_stream() {
        let compressed = zlib(&[7u8; 64]);
        let err = decompress_payload(Compression::Zlib, compressed, 32).unwrap_err();
        assert!(err.contains("past"));
    }

    #[test]
    fn test_zlib_garbage_stream() {
        assert!(decompress_payload(Compression::Zlib, vec![0xDE, 0xAD, 0xBE, 0xEF], 4).is_err());
    }
}
