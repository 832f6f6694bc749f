//! Chunk compression.

use gs_config::CodecConfig;
use std::sync::Arc;
use zarrs::array::codec::{BytesToBytesCodecTraits, ZstdCodec};

/// Bytes-to-bytes codecs applied to every serialized chunk.
pub fn bytes_codecs(codec: CodecConfig) -> Vec<Arc<dyn BytesToBytesCodecTraits>> {
    match codec {
        CodecConfig::None => Vec::new(),
        CodecConfig::Zstd { level } => vec![Arc::new(ZstdCodec::new(level, false))],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_chain_length() {
        assert!(bytes_codecs(CodecConfig::None).is_empty());
        assert_eq!(bytes_codecs(CodecConfig::Zstd { level: 3 }).len(), 1);
    }
}
