//! Incremental re-indexing.
//!
//! Compares the documents on disk against the ids and content hashes stored
//! in the index, so that a periodic job only touches what actually changed.

use std::collections::{BTreeMap, HashSet};

use crate::{
    error::Result,
    index_store::{IndexStore, KnowledgeIndex},
    loader::Document,
};

/// How on-disk documents relate to an existing index.
#[derive(Debug, Default, Clone)]
pub struct SyncPlan {
    /// Documents whose id is not indexed.
    pub new: Vec<Document>,
    /// Documents whose id is indexed with a different content hash.
    pub changed: Vec<Document>,
    /// Number of documents already indexed with identical content.
    pub unchanged: usize,
    /// Indexed ids with no document on disk any more.
    pub removed: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SyncOptions {
    /// Only add new ids; leave changed documents as they are indexed.
    pub append_only: bool,
    /// Drop indexed ids whose source document is gone.
    pub prune: bool,
}

/// Outcome of [`sync`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// No index existed, so a full rebuild ran instead.
    pub rebuilt: bool,
    pub added: usize,
    pub replaced: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Changed documents left untouched because of `append_only`.
    pub stale: usize,
    /// Vanished ids left in the index because `prune` was off.
    pub orphaned: usize,
    /// Documents in the index after the sync.
    pub total: u64,
}

/// Documents whose id is not yet in `index`, in input order.
pub fn find_new_documents(
    documents: &[Document],
    index: &KnowledgeIndex,
) -> Result<Vec<Document>> {
    let existing = index.list_ids()?;
    Ok(documents
        .iter()
        .filter(|doc| !existing.contains_key(doc.id.as_str()))
        .cloned()
        .collect())
}

/// Classify `documents` against what `index` holds.
pub fn plan_sync(
    documents: &[Document],
    index: &KnowledgeIndex,
) -> Result<SyncPlan> {
    let indexed: BTreeMap<String, String> = index.list_ids()?;
    Ok(diff_documents(documents, &indexed))
}

fn diff_documents(
    documents: &[Document],
    indexed: &BTreeMap<String, String>,
) -> SyncPlan {
    let mut plan = SyncPlan::default();
    let mut seen = HashSet::new();

    for doc in documents {
        let id = doc.id.as_str();
        if !seen.insert(id) {
            continue;
        }
        match indexed.get(id) {
            None => plan.new.push(doc.clone()),
            Some(hash) if *hash != doc.content_hash => {
                plan.changed.push(doc.clone());
            }
            Some(_) => plan.unchanged += 1,
        }
    }

    plan.removed = indexed
        .keys()
        .filter(|id| !seen.contains(id.as_str()))
        .cloned()
        .collect();

    plan
}

/// Bring the saved index in line with `documents`.
///
/// Without a saved index this is a full rebuild. Otherwise new documents
/// are upserted, changed ones replaced (unless `append_only`) and vanished
/// ids removed (only with `prune`), then everything is saved at once.
pub fn sync(
    store: &IndexStore,
    documents: &[Document],
    options: SyncOptions,
) -> Result<SyncReport> {
    let Some(mut index) = store.load()? else {
        tracing::info!("no existing index; running a full rebuild");
        let index = store.rebuild(documents)?;
        let total = index.count()?;
        return Ok(SyncReport {
            rebuilt: true,
            added: total as usize,
            total,
            ..SyncReport::default()
        });
    };

    let plan = plan_sync(documents, &index)?;
    tracing::debug!(
        new = plan.new.len(),
        changed = plan.changed.len(),
        unchanged = plan.unchanged,
        removed = plan.removed.len(),
        "sync plan"
    );

    let mut report = SyncReport {
        unchanged: plan.unchanged,
        ..SyncReport::default()
    };

    report.added = store.upsert(&mut index, &plan.new)?;

    if options.append_only {
        report.stale = plan.changed.len();
    } else {
        report.replaced = store.replace(&mut index, &plan.changed)?;
    }

    if options.prune {
        report.removed = store.remove(&mut index, &plan.removed)?;
    } else {
        report.orphaned = plan.removed.len();
    }

    store.save(&mut index)?;
    report.total = index.count()?;

    tracing::info!(
        added = report.added,
        replaced = report.replaced,
        removed = report.removed,
        total = report.total,
        "index updated"
    );
    Ok(report)
}
