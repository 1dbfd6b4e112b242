//! Chunking codec for binary payloads stored as table columns.
//!
//! A payload is split into fixed-size chunks under numbered columns `d000`,
//! `d001`, ... so that a raw block or transaction fits the store's per-column
//! bound. Encode and decode are a pure pair; the decoder orders chunks by
//! their parsed index, so payloads wider than the name padding still
//! reassemble intact.

use std::collections::BTreeMap;

use coinledger_core::IndexerError;

/// Chunk size, matching the per-column payload bound of the table store.
pub const CHUNK_BYTES: usize = 64 * 1024;

const CHUNK_PREFIX: char = 'd';

fn chunk_column(index: usize) -> String {
    format!("{CHUNK_PREFIX}{index:03}")
}

/// Split `payload` into numbered chunk columns. Empty payloads produce a
/// single empty chunk so presence is distinguishable from absence.
pub fn encode_chunks(payload: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut columns = BTreeMap::new();
    if payload.is_empty() {
        columns.insert(chunk_column(0), Vec::new());
        return columns;
    }
    for (index, chunk) in payload.chunks(CHUNK_BYTES).enumerate() {
        columns.insert(chunk_column(index), chunk.to_vec());
    }
    columns
}

/// Reassemble a payload from its chunk columns. Non-chunk columns are
/// ignored; a gap in the chunk numbering is a decode error.
pub fn decode_chunks(columns: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, IndexerError> {
    let mut chunks: BTreeMap<usize, &Vec<u8>> = BTreeMap::new();
    for (name, value) in columns {
        let Some(suffix) = name.strip_prefix(CHUNK_PREFIX) else {
            continue;
        };
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let index: usize = suffix
            .parse()
            .map_err(|_| IndexerError::Storage(format!("malformed chunk column {name}")))?;
        if chunks.insert(index, value).is_some() {
            return Err(IndexerError::Storage(format!(
                "duplicate chunk index {index}"
            )));
        }
    }
    if chunks.is_empty() {
        return Err(IndexerError::Storage("no chunk columns present".into()));
    }
    let mut payload = Vec::new();
    for (expected, (index, value)) in chunks.into_iter().enumerate() {
        if index != expected {
            return Err(IndexerError::Storage(format!(
                "chunk column gap: expected {expected}, found {index}"
            )));
        }
        payload.extend_from_slice(value);
    }
    Ok(payload)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
