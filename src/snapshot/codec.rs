//! Snapshot payload encoding
//!
//! FULL snapshots store the canonical record array. INCREMENTAL and
//! DIFFERENTIAL snapshots store a serialized [`Delta`]. Either payload is
//! gzip-compressed when compression is requested and the payload is
//! larger than the threshold. The compression flag lives in the metadata,
//! never in the blob.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::types::{Compression, SnapshotType};
use crate::diff::Delta;
use crate::error::{VaultError, VaultResult};
use crate::record::{canonical_bytes, parse_records, sha256_hex, Record};

/// Decoded payload of one snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Full(Vec<Record>),
    Delta(Delta),
}

impl Payload {
    pub fn to_bytes(&self) -> VaultResult<Vec<u8>> {
        match self {
            Payload::Full(records) => canonical_bytes(records),
            Payload::Delta(delta) => serde_json::to_vec(delta).map_err(VaultError::from),
        }
    }

    pub fn from_bytes(bytes: &[u8], snapshot_type: SnapshotType) -> VaultResult<Self> {
        match snapshot_type {
            SnapshotType::Full => Ok(Payload::Full(parse_records(bytes)?)),
            SnapshotType::Incremental | SnapshotType::Differential => serde_json::from_slice(bytes)
                .map(Payload::Delta)
                .map_err(|e| VaultError::integrity(format!("Payload is not a delta: {}", e))),
        }
    }
}

/// Bytes ready for the blob store
#[derive(Debug, Clone)]
pub struct Encoded {
    pub stored: Vec<u8>,
    pub compression: Compression,
    pub original_size: u64,
    /// Hash of the uncompressed payload
    pub payload_hash: String,
}

pub fn encode(raw: Vec<u8>, compress: bool, threshold: usize) -> VaultResult<Encoded> {
    let original_size = raw.len() as u64;
    let payload_hash = sha256_hex(&raw);

    if !compress || raw.len() <= threshold {
        return Ok(Encoded {
            stored: raw,
            compression: Compression::None,
            original_size,
            payload_hash,
        });
    }

    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&raw)?;
    let stored = encoder.finish()?;

    Ok(Encoded {
        stored,
        compression: Compression::Gzip,
        original_size,
        payload_hash,
    })
}

/// Undo [`encode`] and check the payload hash
pub fn decode(stored: &[u8], compression: Compression, payload_hash: &str) -> VaultResult<Vec<u8>> {
    let raw = match compression {
        Compression::None => stored.to_vec(),
        Compression::Gzip => {
            let mut raw = Vec::new();
            GzDecoder::new(stored)
                .read_to_end(&mut raw)
                .map_err(|e| VaultError::integrity(format!("Corrupt gzip payload: {}", e)))?;
            raw
        }
    };

    let actual = sha256_hex(&raw);
    if actual != payload_hash {
        return Err(VaultError::integrity(format!(
            "Payload hash mismatch: expected {}, got {}",
            payload_hash, actual
        )));
    }
    Ok(raw)
}
