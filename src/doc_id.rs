use std::{collections::BTreeMap, path::Path};

/// A stable document identifier.
///
/// Taken from the front-matter `id` field when present, otherwise derived
/// from the file stem. The stem fallback is only as stable as the file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    /// Resolve the identity of a document.
    ///
    /// A blank front-matter id is ignored and the stem is used instead.
    pub fn resolve(front_matter_id: Option<&str>, path: &Path) -> Self {
        if let Some(id) = front_matter_id.map(str::trim)
            && !id.is_empty()
        {
            return Self(id.to_string());
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled");
        Self(stem.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash everything that ends up in the index for a document.
///
/// Fields are length-prefixed so that moving bytes between fields changes
/// the digest.
pub fn content_hash(
    title: &str,
    text: &str,
    metadata: &BTreeMap<String, String>,
) -> String {
    let mut hasher = blake3::Hasher::new();
    let mut field = |bytes: &[u8]| {
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    };

    field(title.as_bytes());
    field(text.as_bytes());
    for (key, value) in metadata {
        field(key.as_bytes());
        field(value.as_bytes());
    }

    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_matter_id_wins() {
        let id = DocumentId::resolve(Some("abc123"), Path::new("notes/x.md"));
        assert_eq!(id.as_str(), "abc123");
    }

    #[test]
    fn falls_back_to_stem() {
        let id = DocumentId::resolve(None, Path::new("notes/hello-world.md"));
        assert_eq!(id.as_str(), "hello-world");
    }

    #[test]
    fn blank_front_matter_id_is_ignored() {
        let id = DocumentId::resolve(Some("  "), Path::new("a/b.md"));
        assert_eq!(id.as_str(), "b");
    }

    #[test]
    fn deterministic() {
        let a = DocumentId::resolve(None, Path::new("hello.md"));
        let b = DocumentId::resolve(None, Path::new("hello.md"));
        assert_eq!(a, b);
    }

    #[test]
    fn hash_is_stable_and_hex() {
        let meta = BTreeMap::from([("source".to_string(), "web".to_string())]);
        let a = content_hash("T", "body", &meta);
        let b = content_hash("T", "body", &meta);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_changes_with_any_field() {
        let meta = BTreeMap::from([("source".to_string(), "web".to_string())]);
        let base = content_hash("T", "body", &meta);

        assert_ne!(base, content_hash("T2", "body", &meta));
        assert_ne!(base, content_hash("T", "body!", &meta));

        let other = BTreeMap::from([("source".to_string(), "rss".to_string())]);
        assert_ne!(base, content_hash("T", "body", &other));
    }

    #[test]
    fn hash_fields_do_not_bleed() {
        let empty = BTreeMap::new();
        assert_ne!(
            content_hash("ab", "c", &empty),
            content_hash("a", "bc", &empty)
        );
    }
}
