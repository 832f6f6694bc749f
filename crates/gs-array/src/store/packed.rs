//! Single-file packing of a finished store.
//!
//! # Layout
//!
//! ```text
//! [magic "GSTORE\0\1"] [blob] [blob] ... [index json] [index offset u64] [index len u64] [magic "GSTOREIX"]
//! ```
//!
//! Every stored key becomes one blob. The index records each blob's range
//! and sha256; a packed file is verified in full when it is read back.

use super::{storage_err, Store};
use gs_common::{Error, Result};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use zarrs::storage::store::MemoryStore;

pub(crate) const HEADER_MAGIC: &[u8; 8] = b"GSTORE\x00\x01";
const INDEX_MAGIC: &[u8; 8] = b"GSTOREIX";
const TRAILER_LEN: usize = 24;
const HEADER_LEN: u64 = HEADER_MAGIC.len() as u64;
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BlobRef {
    key: String,
    offset: u64,
    len: u64,
    sha256: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PackedIndex {
    version: u32,
    entries: Vec<BlobRef>,
}

/// Sizes observed when a staged store is packed into its final file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// Number of blobs (metadata documents and chunks) packed.
    pub blobs: usize,
    /// Bytes of blob data.
    pub live_bytes: u64,
    /// Bytes of the JSON index.
    pub index_bytes: u64,
    /// Size of the packed file.
    pub final_bytes: u64,
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// Write every key of `store` into a packed file at `path`, replacing it.
pub(crate) fn write_packed(store: &Store, path: &Path) -> Result<CompactionReport> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(HEADER_MAGIC)?;

    let mut entries = Vec::new();
    let mut offset = HEADER_LEN;
    for key in store.keys()? {
        let Some(bytes) = store.get(&key)? else {
            continue;
        };
        out.write_all(&bytes)?;
        let len = bytes.len() as u64;
        entries.push(BlobRef {
            key,
            offset,
            len,
            sha256: sha256_hex(&bytes),
        });
        offset += len;
    }

    let blobs = entries.len();
    let index = serde_json::to_vec(&PackedIndex {
        version: INDEX_VERSION,
        entries,
    })?;
    out.write_all(&index)?;
    out.write_all(&offset.to_le_bytes())?;
    out.write_all(&(index.len() as u64).to_le_bytes())?;
    out.write_all(INDEX_MAGIC)?;
    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    let report = CompactionReport {
        blobs,
        live_bytes: offset - HEADER_LEN,
        index_bytes: index.len() as u64,
        final_bytes: offset + index.len() as u64 + TRAILER_LEN as u64,
    };
    debug!(path = %path.display(), ?report, "packed store");
    Ok(report)
}

/// Load a packed file into a sealed in-memory store.
///
/// Every bound is checked before use and every blob against its digest, so
/// a damaged file fails here rather than on first access.
pub fn read_packed(path: &Path) -> Result<Store> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    if file_len < HEADER_LEN + TRAILER_LEN as u64 {
        return Err(Error::Storage(format!(
            "{} is too small ({file_len} bytes) to be a finalized store; was it finalized?",
            path.display()
        )));
    }
    // SAFETY: packed files are written once at finalize and never modified
    // in place; the map is dropped before this function returns.
    let mmap = unsafe { Mmap::map(&file)? };
    let bytes = &mmap[..];

    if &bytes[..HEADER_LEN as usize] != HEADER_MAGIC {
        return Err(Error::Format {
            expected: "genostore store file".to_string(),
            actual: format!("header {:?}", &bytes[..HEADER_LEN as usize]),
        });
    }
    let body_end = file_len - TRAILER_LEN as u64;
    let trailer = &bytes[body_end as usize..];
    if &trailer[16..24] != INDEX_MAGIC {
        return Err(Error::Storage(format!(
            "{} has no index trailer; was the store finalized?",
            path.display()
        )));
    }
    let index_offset = read_u64(&trailer[0..8]);
    let index_len = read_u64(&trailer[8..16]);
    let index_end = index_offset.checked_add(index_len).ok_or_else(|| {
        Error::Storage(format!(
            "corrupted trailer: index range {index_offset}+{index_len} overflows"
        ))
    })?;
    if index_offset < HEADER_LEN || index_end != body_end {
        return Err(Error::Storage(format!(
            "corrupted trailer: index range {index_offset}+{index_len} does not end at {body_end}"
        )));
    }

    let index: PackedIndex =
        serde_json::from_slice(&bytes[index_offset as usize..index_end as usize])
            .map_err(|e| storage_err("store index", e))?;
    if index.version != INDEX_VERSION {
        return Err(Error::Storage(format!(
            "unsupported store index version {}",
            index.version
        )));
    }

    let store = Store::new(Arc::new(MemoryStore::new()));
    for blob in &index.entries {
        let end = blob
            .offset
            .checked_add(blob.len)
            .filter(|end| blob.offset >= HEADER_LEN && *end <= index_offset)
            .ok_or_else(|| {
                Error::Storage(format!(
                    "blob '{}' at {}+{} lies outside the data region",
                    blob.key, blob.offset, blob.len
                ))
            })?;
        let data = &bytes[blob.offset as usize..end as usize];
        let actual = sha256_hex(data);
        if actual != blob.sha256 {
            return Err(Error::Storage(format!(
                "checksum mismatch for '{}': expected {}, got {actual}",
                blob.key, blob.sha256
            )));
        }
        store.put_unsealed(&blob.key, data.to_vec())?;
    }
    store.seal();

    debug!(path = %path.display(), bytes = file_len, blobs = index.entries.len(), "loaded packed store");
    Ok(store)
}
