//! Chunk identity normalization and hashing.
//!
//! The chunk hash is a SHA-256 over the normalized form of
//! `(kind, name, signature, documentation, body)`. Normalization trims each
//! line, collapses internal whitespace runs to a single space and drops
//! empty lines, so whitespace-only and line-terminator-only edits never
//! change the hash while any code or documentation edit does.

use sha2::{Digest, Sha256};

use crate::domain::types::ChunkKind;

/// Normalize text for hashing: per-line trim, single-space internal runs,
/// empty lines dropped. Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    text.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compute the content-addressed chunk identity: 64 lowercase hex chars.
pub fn chunk_hash(
    kind: ChunkKind,
    name: &str,
    signature: Option<&str>,
    documentation: Option<&str>,
    body: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(signature.unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize(documentation.unwrap_or_default()).as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize(body).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let input = "  function  f() {\n\n\treturn   1;\n  }  ";
        let once = normalize(input);
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn whitespace_only_edits_share_a_hash() {
        let a = chunk_hash(ChunkKind::Function, "f", None, None, "function f(){\n  return 1;\n}");
        let b = chunk_hash(ChunkKind::Function, "f", None, None, "function f(){\n    return 1;\n}");
        assert_eq!(a, b);
    }

    #[test]
    fn line_terminator_style_is_irrelevant() {
        let a = chunk_hash(ChunkKind::Function, "f", None, None, "function f(){\n  return 1;\n}");
        let b = chunk_hash(ChunkKind::Function, "f", None, None, "function f(){\r\n  return 1;\r\n}");
        assert_eq!(a, b);
    }

    #[test]
    fn documentation_edits_change_the_hash() {
        let a = chunk_hash(ChunkKind::Function, "f", None, Some("v1"), "return 1;");
        let b = chunk_hash(ChunkKind::Function, "f", None, Some("v2"), "return 1;");
        assert_ne!(a, b);
    }

    #[test]
    fn code_edits_change_the_hash() {
        let a = chunk_hash(ChunkKind::Function, "f", None, None, "return 1;");
        let b = chunk_hash(ChunkKind::Function, "f", None, None, "return 2;");
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_64_lowercase_hex() {
        let h = chunk_hash(ChunkKind::Function, "f", None, None, "return 1;");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
