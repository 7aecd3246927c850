//! Citation extraction and verification.
//!
//! Generated answers cite passages with inline markers of the form
//! `[doc_id:chunk_id]`, where `doc_id` is made of word characters, `.`,
//! `/` and `-`, and `chunk_id` is a non-negative integer. The same
//! grammar is used by the generator prompt and by
//! [`DocumentChunk::marker`](crate::models::DocumentChunk::marker).
//!
//! A citation is valid only if its key belongs to the exact set of
//! chunks handed to the generator for the request.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::models::{ChunkKey, Citation, DocumentChunk};

static CITATION_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[([\w./-]+):(\d{1,19})\]").ok());

/// All citation markers in `text`, in order of appearance.
///
/// Duplicates are kept as found. Markers whose chunk id does not fit in a
/// `u64` are not citations and are skipped.
pub fn extract(text: &str) -> Vec<Citation> {
    let Some(re) = CITATION_RE.as_ref() else {
        return Vec::new();
    };

    re.captures_iter(text)
        .filter_map(|caps| {
            let doc_id = caps.get(1)?.as_str();
            let chunk_id = caps.get(2)?.as_str().parse::<u64>().ok()?;
            Some(Citation::new(doc_id, chunk_id))
        })
        .collect()
}

/// True iff every citation key is in `retrieved`.
///
/// An empty citation list is trivially valid.
pub fn validate(citations: &[Citation], retrieved: &HashSet<ChunkKey>) -> bool {
    citations.iter().all(|c| retrieved.contains(&c.key()))
}

/// The key set of the chunks passed to the generator.
pub fn retrieved_keys(contexts: &[DocumentChunk]) -> HashSet<ChunkKey> {
    contexts.iter().map(DocumentChunk::key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_in_order() {
        let text = "See [docA:1] and then [docB:2].";
        assert_eq!(
            extract(text),
            vec![Citation::new("docA", 1), Citation::new("docB", 2)]
        );
    }

    #[test]
    fn test_extract_path_like_doc_ids_and_duplicates() {
        let text = "[policies/it-security.md:3] x [policies/it-security.md:3] [notes_v2.txt:10]";
        let found = extract(text);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0], Citation::new("policies/it-security.md", 3));
        assert_eq!(found[1], found[0]);
        assert_eq!(found[2], Citation::new("notes_v2.txt", 10));
    }

    #[test]
    fn test_extract_ignores_malformed_markers() {
        let text = "[no chunk] [doc:] [:4] [doc:-1] [doc:1a] [Citation: doc:1] [doc with space:2]";
        assert!(extract(text).is_empty());
    }

    #[test]
    fn test_extract_skips_overflowing_chunk_id() {
        assert!(extract("[doc:99999999999999999999]").is_empty());
        assert_eq!(
            extract("[doc:18446744073709551615]"),
            vec![Citation::new("doc", u64::MAX)]
        );
    }

    #[test]
    fn test_validate_requires_every_key() {
        let contexts = vec![
            DocumentChunk::new("docA", 1, "a", 0.9),
            DocumentChunk::new("docB", 2, "b", 0.8),
        ];
        let keys = retrieved_keys(&contexts);

        assert!(validate(&[], &keys));
        assert!(validate(&[Citation::new("docA", 1)], &keys));
        assert!(validate(
            &[Citation::new("docB", 2), Citation::new("docA", 1)],
            &keys
        ));
        assert!(!validate(
            &[Citation::new("docA", 1), Citation::new("docA", 2)],
            &keys
        ));
        assert!(!validate(&[Citation::new("docC", 1)], &keys));
    }

    #[test]
    fn test_marker_round_trips_through_extract() {
        let chunk = DocumentChunk::new("guides/on-boarding.md", 7, "text", 0.0);
        assert_eq!(
            extract(&format!("Answer {}", chunk.marker())),
            vec![Citation::new("guides/on-boarding.md", 7)]
        );
    }
}
