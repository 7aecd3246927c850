//! Overlapping word-window chunker.
//!
//! Splits document text on whitespace into windows of `chunk_size` words.
//! Consecutive windows share `chunk_overlap` words (stride is
//! `chunk_size - chunk_overlap`). The last window ends at the last word;
//! chunk ids are window indices starting at 0, so they are stable as long
//! as the document text and chunking settings are unchanged.

use sha2::{Digest, Sha256};

/// Split `text` into overlapping word windows.
///
/// Returns no chunks for blank text. `chunk_overlap` must be smaller than
/// `chunk_size` (enforced by config validation); a larger value is
/// clamped so the window always advances.
pub fn chunk_words(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let size = chunk_size.max(1);
    let stride = size - chunk_overlap.min(size - 1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += stride;
    }
    chunks
}

/// Hex SHA-256 of `text`, used to skip unchanged documents.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
