use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use tantivy::{
    DocAddress,
    Index,
    IndexReader,
    IndexWriter,
    Searcher,
    TantivyDocument,
    Term,
    collector::{DocSetCollector, TopDocs},
    doc,
    query::{
        AllQuery,
        BooleanQuery,
        FuzzyTermQuery,
        Occur,
        Query,
        QueryParser,
        TermQuery,
    },
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};

use crate::{
    error::{Error, Result},
    loader::Document,
};

/// Field names used in the schema.
pub mod fields {
    pub const DOC_ID: &str = "doc_id";
    pub const TITLE: &str = "title";
    pub const BODY: &str = "body";
    pub const METADATA: &str = "metadata";
    pub const CONTENT_HASH: &str = "content_hash";
}

/// Full-text index over knowledge-base documents.
///
/// Every field needed to reconstruct a search result is stored, so results
/// never touch the source files.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
    /// Directory the index lives in, for error reports.
    location: PathBuf,
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
struct SchemaFields {
    doc_id: Field,
    title: Field,
    body: Field,
    metadata: Field,
    content_hash: Field,
}

/// A stored document as read back from the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub score: f32,
    pub id: String,
    pub title: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    pub content_hash: String,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let doc_id = builder.add_text_field(fields::DOC_ID, STRING | STORED);

    let stemmed = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    let title = builder.add_text_field(fields::TITLE, stemmed.clone());
    let body = builder.add_text_field(fields::BODY, stemmed);

    let metadata = builder.add_text_field(fields::METADATA, STORED);
    let content_hash =
        builder.add_text_field(fields::CONTENT_HASH, STRING | STORED);

    let schema = builder.build();
    let fields = SchemaFields {
        doc_id,
        title,
        body,
        metadata,
        content_hash,
    };

    (schema, fields)
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

fn resolve_fields(schema: &Schema) -> Result<SchemaFields> {
    let f = |name: &str| {
        schema.get_field(name).map_err(|_| {
            Error::Config(format!("index schema is missing field '{name}'"))
        })
    };
    Ok(SchemaFields {
        doc_id: f(fields::DOC_ID)?,
        title: f(fields::TITLE)?,
        body: f(fields::BODY)?,
        metadata: f(fields::METADATA)?,
        content_hash: f(fields::CONTENT_HASH)?,
    })
}

fn open_mmap_dir(dir: &Path) -> Result<tantivy::directory::MmapDirectory> {
    tantivy::directory::MmapDirectory::open(dir).map_err(|e| {
        Error::Tantivy(tantivy::TantivyError::SystemError(e.to_string()))
    })
}

impl SearchIndex {
    /// Whether a committed index exists in `dir`.
    pub fn exists(dir: &Path) -> Result<bool> {
        if !dir.is_dir() {
            return Ok(false);
        }
        let mmap_dir = open_mmap_dir(dir)?;
        Index::exists(&mmap_dir).map_err(|e| {
            Error::Tantivy(tantivy::TantivyError::SystemError(e.to_string()))
        })
    }

    /// Open an existing index, or create one, at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, _) = build_schema();

        let mmap_dir = open_mmap_dir(dir)?;
        let index = if Self::exists(dir)? {
            Index::open(mmap_dir)?
        } else {
            Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
        };

        Self::from_index(index, dir.to_path_buf())
    }

    /// Create an in-memory index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let (schema, _) = build_schema();
        let index = Index::create_in_ram(schema);
        Self::from_index(index, PathBuf::from(":memory:"))
    }

    fn from_index(index: Index, location: PathBuf) -> Result<Self> {
        register_tokenizers(&index);
        let fields = resolve_fields(&index.schema())?;
        let reader = index.reader()?;
        Ok(Self {
            index,
            reader,
            fields,
            location,
        })
    }

    /// Create a writer with the given memory budget (in bytes).
    pub fn writer(&self, memory_budget: usize) -> Result<IndexWriter> {
        Ok(self.index.writer(memory_budget)?)
    }

    /// Add a document via the given writer, replacing any document with the
    /// same id once the writer commits.
    pub fn add_document(
        &self,
        writer: &IndexWriter,
        document: &Document,
    ) -> Result<()> {
        let f = self.fields;
        let id = document.id.as_str();
        let metadata = serde_json::to_string(&document.metadata)?;

        writer.delete_term(Term::from_field_text(f.doc_id, id));
        writer.add_document(doc!(
            f.doc_id => id,
            f.title => document.title.as_str(),
            f.body => document.text.as_str(),
            f.metadata => metadata,
            f.content_hash => document.content_hash.as_str(),
        ))?;

        Ok(())
    }

    /// Delete a single document by id.
    pub fn delete_document(&self, writer: &IndexWriter, doc_id: &str) {
        writer.delete_term(Term::from_field_text(self.fields.doc_id, doc_id));
    }

    fn searcher(&self) -> Result<Searcher> {
        self.reader.reload()?;
        Ok(self.reader.searcher())
    }

    /// Number of live documents.
    pub fn num_docs(&self) -> Result<u64> {
        Ok(self.searcher()?.num_docs())
    }

    /// Search with BM25 scoring. The `title` field is boosted 2x.
    ///
    /// With `fuzzy`, each query term of 3+ characters also matches body
    /// terms within Levenshtein distance 1. Results are ordered by score,
    /// ties by id, including ties that straddle `limit`.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        fuzzy: bool,
    ) -> Result<Vec<IndexHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let f = self.fields;
        let searcher = self.searcher()?;

        let mut parser =
            QueryParser::for_index(&self.index, vec![f.title, f.body]);
        parser.set_field_boost(f.title, 2.0);
        let (bm25_query, _errors) = parser.parse_query_lenient(query_str);

        let query: Box<dyn Query> = if fuzzy {
            let mut clauses: Vec<(Occur, Box<dyn Query>)> =
                vec![(Occur::Should, bm25_query)];
            for term_str in query_str.split_whitespace() {
                if term_str.chars().count() >= 3 {
                    let term =
                        Term::from_field_text(f.body, &term_str.to_lowercase());
                    clauses.push((
                        Occur::Should,
                        Box::new(FuzzyTermQuery::new(term, 1, true)),
                    ));
                }
            }
            Box::new(BooleanQuery::new(clauses))
        } else {
            bm25_query
        };

        // TopDocs cuts ties by doc address, so widen the window until it
        // holds every document scoring the same as the last one kept.
        let mut window = limit;
        let top_docs = loop {
            let top = searcher.search(&query, &TopDocs::with_limit(window))?;
            let boundary_tied = top.len() == window
                && top[limit - 1].0 == top[window - 1].0;
            if !boundary_tied || window == usize::MAX {
                break top;
            }
            window = window.saturating_mul(2);
        };

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            hits.push(self.read_hit(&searcher, address, score)?);
        }
        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    /// Fetch a single document by id.
    pub fn get(&self, doc_id: &str) -> Result<Option<IndexHit>> {
        let searcher = self.searcher()?;
        let query = TermQuery::new(
            Term::from_field_text(self.fields.doc_id, doc_id),
            IndexRecordOption::Basic,
        );
        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        match top.into_iter().next() {
            Some((score, address)) => {
                Ok(Some(self.read_hit(&searcher, address, score)?))
            }
            None => Ok(None),
        }
    }

    /// Every live document, ordered by id, each with a score of 1.0.
    pub fn all_documents(&self) -> Result<Vec<IndexHit>> {
        let searcher = self.searcher()?;
        let addresses = searcher.search(&AllQuery, &DocSetCollector)?;

        let mut hits = Vec::with_capacity(addresses.len());
        for address in addresses {
            hits.push(self.read_hit(&searcher, address, 1.0)?);
        }
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hits)
    }

    /// Map of every live document id to its stored content hash.
    pub fn stored_hashes(&self) -> Result<BTreeMap<String, String>> {
        let f = self.fields;
        let searcher = self.searcher()?;
        let addresses = searcher.search(&AllQuery, &DocSetCollector)?;

        let mut hashes = BTreeMap::new();
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address)?;
            hashes.insert(
                extract_text(&doc, f.doc_id),
                extract_text(&doc, f.content_hash),
            );
        }
        Ok(hashes)
    }

    fn read_hit(
        &self,
        searcher: &Searcher,
        address: DocAddress,
        score: f32,
    ) -> Result<IndexHit> {
        let f = self.fields;
        let doc: TantivyDocument = searcher.doc(address)?;
        let id = extract_text(&doc, f.doc_id);
        let metadata = serde_json::from_str(&extract_text(&doc, f.metadata))
            .map_err(|e| Error::IndexCorrupt {
                path: self.location.clone(),
                reason: format!("stored metadata of '{id}' is not JSON: {e}"),
            })?;

        Ok(IndexHit {
            score,
            id,
            title: extract_text(&doc, f.title),
            text: extract_text(&doc, f.body),
            metadata,
            content_hash: extract_text(&doc, f.content_hash),
        })
    }
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex").finish_non_exhaustive()
    }
}

/// Descending score, ascending id on ties.
pub fn sort_hits(hits: &mut [IndexHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}
