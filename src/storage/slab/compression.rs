//! Transparent value compression for slab storage

use super::error::{SlabError, SlabResult};
use serde::{Deserialize, Serialize};
use std::io::Write;

const ZSTD_LEVEL: i32 = 3;

/// Compression applied to every value before it is written to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    #[default]
    Zstd,
}

pub fn compress(data: &[u8], algorithm: CompressionAlgorithm) -> SlabResult<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Zstd => {
            let mut encoder = zstd::Encoder::new(Vec::new(), ZSTD_LEVEL)
                .map_err(|e| SlabError::io("failed to create zstd encoder", e))?;
            encoder
                .write_all(data)
                .map_err(|e| SlabError::io("failed to compress", e))?;
            encoder
                .finish()
                .map_err(|e| SlabError::io("failed to finish compression", e))
        }
    }
}

pub fn decompress(data: &[u8], algorithm: CompressionAlgorithm) -> SlabResult<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Zstd => zstd::decode_all(data)
            .map_err(|e| SlabError::Corrupt(format!("failed to decompress value: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_none_is_identity() -> SlabResult<()> {
        let data = b"Hello, World!";
        assert_eq!(compress(data, CompressionAlgorithm::None)?, data);
        assert_eq!(decompress(data, CompressionAlgorithm::None)?, data);
        Ok(())
    }

    #[test]
    fn test_compression_zstd_shrinks_repetitive_data() -> SlabResult<()> {
        let data = b"{\"name\":\"Alice\",\"role\":\"admin\"}".repeat(20);
        let compressed = compress(&data, CompressionAlgorithm::Zstd)?;
        assert!(compressed.len() < data.len());

        assert_eq!(decompress(&compressed, CompressionAlgorithm::Zstd)?, data);
        Ok(())
    }

    #[test]
    fn test_decompress_garbage_is_corrupt() {
        let err = decompress(b"not zstd", CompressionAlgorithm::Zstd).unwrap_err();
        assert!(matches!(err, SlabError::Corrupt(_)));
    }

    #[test]
    fn test_algorithm_serde_names() {
        let json = serde_json::to_string(&CompressionAlgorithm::Zstd).unwrap();
        assert_eq!(json, "\"zstd\"");
        let parsed: CompressionAlgorithm = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(parsed, CompressionAlgorithm::None);
    }
}
