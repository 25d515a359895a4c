use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    index_store::KnowledgeIndex,
    reranker::{self, RankedDocument},
    tantivy_index::IndexHit,
    text_util,
};

/// Default size of the BM25 candidate pool.
pub const DEFAULT_CANDIDATE_LIMIT: usize = 100;

/// Parameters for one query.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub limit: usize,
    /// Drop results scoring below this.
    pub min_score: Option<f32>,
    /// Skip the embedding rerank and keep BM25 scores.
    pub bm25_only: bool,
    /// Also match body terms within edit distance 1.
    pub fuzzy: bool,
    pub candidate_limit: usize,
}

impl SearchParams {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            min_score: None,
            bm25_only: false,
            fuzzy: false,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
        }
    }
}

/// A ranked match with everything needed to render it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub rank: usize,
    pub id: String,
    pub score: f32,
    pub title: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl SearchResult {
    fn from_hit(hit: IndexHit, score: f32) -> Self {
        Self {
            rank: 0,
            id: hit.id,
            score,
            title: hit.title,
            text: hit.text,
            metadata: hit.metadata,
        }
    }
}

/// Run `query` against `index` with default parameters.
pub fn search(
    query: &str,
    index: &KnowledgeIndex,
    embedder: &dyn Embedder,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    execute_search(&SearchParams::new(query, limit), Some(index), embedder)
}

/// Execute the full search pipeline.
///
/// 1. BM25 candidate retrieval via Tantivy (`candidate_limit`)
/// 2. Embedding rerank (unless `bm25_only`); candidates without a usable
///    vector follow the reranked ones in BM25 order with a score of 0.0
/// 3. Filter by `min_score`
/// 4. Limit to `limit` results, ranks starting at 1
///
/// A blank query, or `*`, lists documents in id order with a score of 1.0.
pub fn execute_search(
    params: &SearchParams,
    index: Option<&KnowledgeIndex>,
    embedder: &dyn Embedder,
) -> Result<Vec<SearchResult>> {
    if params.limit == 0 {
        return Err(Error::InvalidInput(
            "limit must be greater than zero".into(),
        ));
    }
    let index = index.ok_or(Error::IndexNotLoaded)?;
    let query = params.query.trim();

    // Enumeration mode.
    if query.is_empty() || query == "*" {
        let results = index
            .search_index()
            .all_documents()?
            .into_iter()
            .map(|hit| SearchResult::from_hit(hit, 1.0))
            .collect();
        return Ok(finish(results, params));
    }

    // Stage 1: BM25 retrieval
    let candidate_limit = params.candidate_limit.max(params.limit);
    let hits = index
        .search_index()
        .search(query, candidate_limit, params.fuzzy)?;
    tracing::debug!(candidates = hits.len(), query, "bm25 retrieval");

    if hits.is_empty() {
        return Ok(vec![]);
    }

    // Stage 2: embedding rerank
    let results = if params.bm25_only {
        hits.into_iter()
            .map(|hit| {
                let score = hit.score;
                SearchResult::from_hit(hit, score)
            })
            .collect()
    } else {
        rerank_hits(hits, index, embedder, query)?
    };

    Ok(finish(results, params))
}

/// Stages 3 and 4: score threshold, limit and ranking.
fn finish(
    results: Vec<SearchResult>,
    params: &SearchParams,
) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|r| params.min_score.is_none_or(|min| r.score >= min))
        .take(params.limit)
        .enumerate()
        .map(|(i, mut r)| {
            r.rank = i + 1;
            r
        })
        .collect()
}

fn rerank_hits(
    hits: Vec<IndexHit>,
    index: &KnowledgeIndex,
    embedder: &dyn Embedder,
    query: &str,
) -> Result<Vec<SearchResult>> {
    let query_embedding = embedder.embed(query);

    let candidate_ids: Vec<String> =
        hits.iter().map(|h| h.id.clone()).collect();
    let ranked =
        reranker::rerank(&query_embedding, &candidate_ids, index.embeddings())?;

    let unscored = hits.len() - ranked.len();
    if unscored > 0 {
        tracing::warn!(
            unscored,
            "candidates without a usable vector kept in BM25 order"
        );
    }

    let mut by_id: HashMap<String, IndexHit> =
        hits.into_iter().map(|h| (h.id.clone(), h)).collect();

    let mut results: Vec<SearchResult> = ranked
        .into_iter()
        .filter_map(|RankedDocument { doc_id, score }| {
            by_id
                .remove(&doc_id)
                .map(|hit| SearchResult::from_hit(hit, score))
        })
        .collect();
    for id in &candidate_ids {
        if let Some(hit) = by_id.remove(id) {
            results.push(SearchResult::from_hit(hit, 0.0));
        }
    }
    Ok(results)
}

/// Format results for human-readable terminal output.
pub fn format_human(results: &[SearchResult], query: &str) -> String {
    if results.is_empty() {
        return "No results found.\n".to_string();
    }

    let mut out = String::new();
    for r in results {
        out.push_str(&format!("{:>3}. [{:.3}] {}\n", r.rank, r.score, r.id));
        if !r.title.is_empty() && r.title != r.id {
            out.push_str(&format!("     {}\n", r.title));
        }
        if let Some((snippet, _)) = text_util::extract_snippet(&r.text, query)
        {
            out.push_str(&text_util::indent(&snippet, 5));
            out.push('\n');
        }
    }
    out.push_str(&format!("\n{} result(s)\n", results.len()));
    out
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [SearchResult],
}

/// Format results as JSON output.
pub fn format_json(results: &[SearchResult], query: &str) -> Result<String> {
    let output = JsonOutput {
        query,
        result_count: results.len(),
        results,
    };
    Ok(serde_json::to_string_pretty(&output)?)
}
