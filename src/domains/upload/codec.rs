//! Storable encodings for attachment content.

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::errors::{DomainError, DomainResult};

/// Turns raw attachment bytes into what the persistent store holds, and back.
pub trait FileCodec: Send + Sync {
    /// Name recorded in `FileDescriptor::encoding`
    fn name(&self) -> &'static str;

    fn encode(&self, raw: &[u8]) -> Vec<u8>;

    fn decode(&self, stored: &[u8]) -> DomainResult<Vec<u8>>;
}

/// Standard base64. About a third larger than the input; safe for text-only stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl FileCodec for Base64Codec {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn encode(&self, raw: &[u8]) -> Vec<u8> {
        base64::engine::general_purpose::STANDARD.encode(raw).into_bytes()
    }

    fn decode(&self, stored: &[u8]) -> DomainResult<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(stored)
            .map_err(|e| DomainError::File(format!("Invalid base64 blob: {}", e)))
    }
}

/// Identity encoding for stores that hold binary values.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBytesCodec;

impl FileCodec for RawBytesCodec {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn encode(&self, raw: &[u8]) -> Vec<u8> {
        raw.to_vec()
    }

    fn decode(&self, stored: &[u8]) -> DomainResult<Vec<u8>> {
        Ok(stored.to_vec())
    }
}

/// Look up the codec a blob was written with.
pub fn codec_for(encoding: &str) -> DomainResult<Box<dyn FileCodec>> {
    match encoding {
        "base64" => Ok(Box::new(Base64Codec)),
        "raw" => Ok(Box::new(RawBytesCodec)),
        other => Err(DomainError::File(format!("Unknown blob encoding: {}", other))),
    }
}

/// Hex SHA-256 of raw content.
pub fn checksum(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    hex::encode(hasher.finalize())
}

/// Keep the declared type when present, otherwise sniff it from content.
pub fn resolve_mime_type(declared: &str, raw: &[u8]) -> String {
    if !declared.trim().is_empty() {
        return declared.to_string();
    }
    match infer::get(raw) {
        Some(kind) => kind.mime_type().to_string(),
        None => mime::APPLICATION_OCTET_STREAM.essence_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_base64_is_text_and_reversible() {
        let raw = vec![0u8, 255, 1, 254, 7];
        let stored = Base64Codec.encode(&raw);
        assert!(std::str::from_utf8(&stored).is_ok());
        assert_eq!(Base64Codec.decode(&stored).unwrap(), raw);
        assert!(Base64Codec.decode(b"not base64!").is_err());
    }

    #[test]
    fn test_codec_lookup() {
        assert_eq!(codec_for("raw").unwrap().name(), "raw");
        assert_eq!(codec_for("base64").unwrap().name(), "base64");
        assert!(codec_for("gzip").is_err());
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_mime_resolution() {
        assert_eq!(resolve_mime_type("application/pdf", &PNG_HEADER), "application/pdf");
        assert_eq!(resolve_mime_type("", &PNG_HEADER), "image/png");
        assert_eq!(resolve_mime_type("", b"plain words"), "application/octet-stream");
    }
}
