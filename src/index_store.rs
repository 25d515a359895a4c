//! The persistent knowledge index.
//!
//! An index lives in one directory holding a tantivy text index (`tantivy/`)
//! and a redb vector store (`embeddings.redb`). Mutations are staged on a
//! [`KnowledgeIndex`] and only become visible on disk after
//! [`IndexStore::save`].
//!
//! Only one process may write to an index directory at a time. Run indexing
//! as a single job. A second concurrent [`IndexStore::rebuild`] fails on the
//! `<path>.lock` file, and a second incremental writer fails on tantivy's
//! writer lock. Running a rebuild alongside an incremental update of the
//! same index is not detected.

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};

use tantivy::IndexWriter;

use crate::{
    config::Config,
    embedding::{self, Embedder, HashingEmbedder},
    embedding_db::EmbeddingDb,
    error::{Error, Result},
    loader::Document,
    tantivy_index::{IndexHit, SearchIndex},
};

pub const TANTIVY_DIR: &str = "tantivy";
pub const EMBEDDINGS_FILE: &str = "embeddings.redb";

/// Writes staged on an index but not yet saved.
struct PendingWrites {
    writer: IndexWriter,
    /// Final vector state per id: `Some` to store, `None` to delete.
    vectors: BTreeMap<String, Option<Vec<f32>>>,
}

/// The staged writes on `slot`, opening a writer on first use.
fn pending_writes<'a>(
    slot: &'a mut Option<PendingWrites>,
    search: &SearchIndex,
    writer_memory: usize,
) -> Result<&'a mut PendingWrites> {
    let pending = match slot.take() {
        Some(pending) => pending,
        None => PendingWrites {
            writer: search.writer(writer_memory)?,
            vectors: BTreeMap::new(),
        },
    };
    Ok(slot.insert(pending))
}

/// Exclusive claim on an index's staging area, released on drop.
struct RebuildLock {
    path: PathBuf,
}

impl RebuildLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        let created = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path);
        match created {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::IndexLocked(path))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RebuildLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("failed to release {}: {e}", self.path.display());
        }
    }
}

/// A loaded knowledge index.
pub struct KnowledgeIndex {
    root: PathBuf,
    search: SearchIndex,
    embeddings: EmbeddingDb,
    pending: Option<PendingWrites>,
}

impl KnowledgeIndex {
    fn open(root: &Path) -> Result<Self> {
        let search = SearchIndex::open(&root.join(TANTIVY_DIR))?;
        let embeddings = EmbeddingDb::open(&root.join(EMBEDDINGS_FILE))?;
        Ok(Self {
            root: root.to_path_buf(),
            search,
            embeddings,
            pending: None,
        })
    }

    /// Directory holding this index.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn search_index(&self) -> &SearchIndex {
        &self.search
    }

    pub fn embeddings(&self) -> &EmbeddingDb {
        &self.embeddings
    }

    /// Number of saved documents.
    pub fn count(&self) -> Result<u64> {
        self.search.num_docs()
    }

    /// Every saved document id with its content hash.
    pub fn list_ids(&self) -> Result<BTreeMap<String, String>> {
        self.search.stored_hashes()
    }

    /// Fetch one saved document by id.
    pub fn get(&self, doc_id: &str) -> Result<Option<IndexHit>> {
        self.search.get(doc_id)
    }

    /// Whether there are staged writes waiting for [`IndexStore::save`].
    pub fn has_pending_writes(&self) -> bool {
        self.pending.is_some()
    }

    fn stage_documents(
        &mut self,
        writer_memory: usize,
        embedder: &dyn Embedder,
        documents: &[Document],
    ) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let vectors = embedding::embed_documents(embedder, documents);

        let search = &self.search;
        let pending = pending_writes(&mut self.pending, search, writer_memory)?;

        for doc in documents {
            search.add_document(&pending.writer, doc)?;
        }
        for (id, vector) in vectors {
            pending.vectors.insert(id, Some(vector));
        }
        Ok(())
    }

    fn staged_ids(&self) -> HashSet<&str> {
        self.pending
            .iter()
            .flat_map(|p| p.vectors.iter())
            .filter(|(_, v)| v.is_some())
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

impl Drop for KnowledgeIndex {
    fn drop(&mut self) {
        if let Some(pending) = &self.pending {
            tracing::warn!(
                staged = pending.vectors.len(),
                "discarding unsaved index changes at {}",
                self.root.display()
            );
        }
    }
}

impl std::fmt::Debug for KnowledgeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeIndex")
            .field("root", &self.root)
            .field("pending", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}

/// Owner of the on-disk index directory.
pub struct IndexStore {
    path: PathBuf,
    writer_memory: usize,
    embedder: Box<dyn Embedder>,
}

impl IndexStore {
    /// A store at the configured index path using the default embedder.
    pub fn new(config: &Config) -> Self {
        Self::with_embedder(
            config.index.path.clone(),
            config.index.writer_memory_bytes,
            Box::new(config.embedder()),
        )
    }

    pub fn with_embedder(
        path: PathBuf,
        writer_memory: usize,
        embedder: Box<dyn Embedder>,
    ) -> Self {
        Self {
            path,
            writer_memory,
            embedder,
        }
    }

    /// A store with default settings, for callers without a config file.
    pub fn at(path: PathBuf) -> Self {
        Self::with_embedder(
            path,
            50_000_000,
            Box::new(HashingEmbedder::default()),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "index".to_string());
        self.path.with_file_name(format!("{name}.{suffix}"))
    }

    /// Build a fresh index from `documents`, replacing whatever was saved.
    ///
    /// The new index is written to a staging directory and swapped into
    /// place only once complete, so a failed rebuild leaves the previous
    /// index intact. Fails with [`Error::IndexLocked`] while another rebuild
    /// of the same path holds `<path>.lock`.
    pub fn rebuild(&self, documents: &[Document]) -> Result<KnowledgeIndex> {
        let staging = self.sibling("staging");
        if let Some(parent) = staging.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _lock = RebuildLock::acquire(self.sibling("lock"))?;
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }

        {
            let mut index = KnowledgeIndex::open(&staging)?;
            self.stage_all(&mut index, documents)?;
            self.save(&mut index)?;
            tracing::info!(
                documents = index.count()?,
                "built index in {}",
                staging.display()
            );
        }

        self.swap_into_place(&staging)?;
        KnowledgeIndex::open(&self.path)
    }

    fn stage_all(
        &self,
        index: &mut KnowledgeIndex,
        documents: &[Document],
    ) -> Result<()> {
        // An empty document set must still produce a committed index.
        pending_writes(&mut index.pending, &index.search, self.writer_memory)?;
        index.stage_documents(
            self.writer_memory,
            self.embedder.as_ref(),
            documents,
        )
    }

    fn swap_into_place(&self, staging: &Path) -> Result<()> {
        let retired = self.sibling("old");
        if retired.exists() {
            std::fs::remove_dir_all(&retired)?;
        }

        if self.path.exists() {
            std::fs::rename(&self.path, &retired)?;
        }
        std::fs::rename(staging, &self.path)?;
        if retired.exists() {
            std::fs::remove_dir_all(&retired)?;
        }
        Ok(())
    }

    /// Open the saved index.
    ///
    /// Returns `Ok(None)` when nothing has been saved yet. A directory that
    /// exists but cannot be opened is [`Error::IndexCorrupt`]; it is left
    /// on disk for the caller to inspect or rebuild over. An index whose
    /// vectors were written by an embedder of another dimension is
    /// [`Error::EmbeddingDimension`].
    pub fn load(&self) -> Result<Option<KnowledgeIndex>> {
        let tantivy_dir = self.path.join(TANTIVY_DIR);
        let corrupt = |reason: String| Error::IndexCorrupt {
            path: self.path.clone(),
            reason,
        };

        let exists = SearchIndex::exists(&tantivy_dir)
            .map_err(|e| corrupt(e.to_string()))?;
        if !exists {
            tracing::debug!("no index at {}", self.path.display());
            return Ok(None);
        }
        if !self.path.join(EMBEDDINGS_FILE).is_file() {
            return Err(corrupt(format!("{EMBEDDINGS_FILE} is missing")));
        }

        let index = KnowledgeIndex::open(&self.path)
            .map_err(|e| corrupt(e.to_string()))?;

        let configured = self.embedder.dimension();
        if let Some(stored) = index.embeddings.dimension()?
            && stored != configured
        {
            return Err(Error::EmbeddingDimension {
                path: self.path.clone(),
                stored,
                configured,
            });
        }
        Ok(Some(index))
    }

    /// Number of saved documents in `index`.
    pub fn count(&self, index: &KnowledgeIndex) -> Result<u64> {
        index.count()
    }

    /// Every saved document id with its content hash.
    pub fn list_ids(
        &self,
        index: &KnowledgeIndex,
    ) -> Result<BTreeMap<String, String>> {
        index.list_ids()
    }

    /// Stage documents whose id is not already in the index.
    ///
    /// Existing ids are left untouched even if their content differs; use
    /// [`IndexStore::replace`] for that. Returns the number staged.
    pub fn upsert(
        &self,
        index: &mut KnowledgeIndex,
        documents: &[Document],
    ) -> Result<usize> {
        let existing = index.list_ids()?;
        let staged = index.staged_ids();

        let mut seen = HashSet::new();
        let fresh: Vec<Document> = documents
            .iter()
            .filter(|doc| {
                let id = doc.id.as_str();
                !existing.contains_key(id)
                    && !staged.contains(id)
                    && seen.insert(id.to_string())
            })
            .cloned()
            .collect();

        let skipped = documents.len() - fresh.len();
        if skipped > 0 {
            tracing::debug!(skipped, "upsert skipped already-indexed ids");
        }

        index.stage_documents(
            self.writer_memory,
            self.embedder.as_ref(),
            &fresh,
        )?;
        Ok(fresh.len())
    }

    /// Stage documents as wholesale replacements of any entry with the same
    /// id (delete + reinsert). Returns the number staged.
    pub fn replace(
        &self,
        index: &mut KnowledgeIndex,
        documents: &[Document],
    ) -> Result<usize> {
        index.stage_documents(
            self.writer_memory,
            self.embedder.as_ref(),
            documents,
        )?;
        Ok(documents.len())
    }

    /// Stage removal of the given ids. Returns the number staged.
    pub fn remove(
        &self,
        index: &mut KnowledgeIndex,
        ids: &[String],
    ) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let search = &index.search;
        let pending =
            pending_writes(&mut index.pending, search, self.writer_memory)?;
        for id in ids {
            search.delete_document(&pending.writer, id);
            pending.vectors.insert(id.clone(), None);
        }
        Ok(ids.len())
    }

    /// Persist staged writes.
    ///
    /// The text index is committed first, then every vector change goes
    /// into a single redb transaction together with the embedder's
    /// dimension. Each store is atomic on its own, but the pair is not: if
    /// the vector write fails, the committed documents are still searched
    /// and rank behind the reranked ones until they are replaced.
    pub fn save(&self, index: &mut KnowledgeIndex) -> Result<()> {
        let Some(mut pending) = index.pending.take() else {
            return Ok(());
        };

        let mut stores = Vec::new();
        let mut removals = Vec::new();
        for (id, vector) in std::mem::take(&mut pending.vectors) {
            match vector {
                Some(v) => stores.push((id, v)),
                None => removals.push(id),
            }
        }

        pending.writer.commit()?;
        pending.writer.wait_merging_threads()?;
        index.embeddings.write_batch(
            &removals,
            &stores,
            self.embedder.dimension(),
        )?;

        tracing::debug!(
            stored = stores.len(),
            removed = removals.len(),
            "saved index at {}",
            index.root.display()
        );
        Ok(())
    }
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
