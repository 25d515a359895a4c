use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

use globset::GlobSet;
use rayon::prelude::*;

use crate::{
    doc_id::{self, DocumentId},
    error::{Error, Result},
    frontmatter,
    walker::{self, DiscoveredFile},
};

/// Front-matter keys that are lifted out of the metadata map.
const RESERVED_KEYS: &[&str] = &["id", "title"];

/// A normalised knowledge-base document, ready for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    /// Markdown body without the front-matter block.
    pub text: String,
    /// Flat string metadata; lists and maps are JSON-encoded.
    pub metadata: BTreeMap<String, String>,
    pub content_hash: String,
}

impl Document {
    /// Build a document, computing its content hash.
    pub fn new(
        id: DocumentId,
        title: String,
        text: String,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let content_hash = doc_id::content_hash(&title, &text, &metadata);
        Self {
            id,
            title,
            text,
            metadata,
            content_hash,
        }
    }

    /// Parse one markdown file's content.
    ///
    /// `relative_path` supplies the fallback id and the `filepath` metadata
    /// entry.
    pub fn parse(content: &str, relative_path: &Path) -> Result<Self> {
        let parsed = frontmatter::parse(content, relative_path)?;

        let id = DocumentId::resolve(
            parsed.field_str("id").as_deref(),
            relative_path,
        );
        let title = parsed
            .field_str("title")
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| extract_title(&parsed.body, id.as_str()));

        let mut metadata =
            frontmatter::normalize_fields(&parsed.fields, RESERVED_KEYS);
        metadata
            .entry("filepath".to_string())
            .or_insert_with(|| relative_path.to_string_lossy().to_string());

        Ok(Self::new(id, title, parsed.body, metadata))
    }
}

/// Extract a title from the body.
///
/// Looks for the first markdown heading (line starting with `# `) and falls
/// back to `fallback`.
fn extract_title(content: &str, fallback: &str) -> String {
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("# ") {
            let title = heading.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }

    fallback.to_string()
}

/// Load every markdown document under `root`.
///
/// Unreadable or unparseable files are logged and skipped. When two files
/// resolve to the same id, the first in path order is kept.
pub fn load_documents(
    root: &Path,
    excludes: &GlobSet,
) -> Result<Vec<Document>> {
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "knowledge base directory does not exist: {}",
            root.display()
        )));
    }

    let files = walker::discover_files(root, excludes)?;
    tracing::debug!(
        count = files.len(),
        root = %root.display(),
        "discovered files"
    );

    Ok(load_files(&files))
}

/// Read and parse discovered files, in parallel.
pub fn load_files(files: &[DiscoveredFile]) -> Vec<Document> {
    let loaded: Vec<Option<Document>> = files
        .par_iter()
        .map(|file| match load_file(file) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!(
                    "skipping {}: {e}",
                    file.relative_path.display()
                );
                None
            }
        })
        .collect();

    let mut seen = HashSet::new();
    let mut documents = Vec::with_capacity(loaded.len());
    for (file, doc) in files.iter().zip(loaded) {
        let Some(doc) = doc else { continue };
        if !seen.insert(doc.id.clone()) {
            tracing::warn!(
                id = %doc.id,
                "duplicate document id in {}; keeping the first occurrence",
                file.relative_path.display()
            );
            continue;
        }
        documents.push(doc);
    }

    documents
}

fn load_file(file: &DiscoveredFile) -> Result<Document> {
    let bytes = std::fs::read(&file.absolute_path)?;
    let content =
        String::from_utf8(bytes).map_err(|e| Error::DocumentParse {
            path: file.relative_path.clone(),
            reason: format!("not valid UTF-8: {e}"),
        })?;
    Document::parse(&content, &file.relative_path)
}
