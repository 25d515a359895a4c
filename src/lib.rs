//! archivit - knowledge-base indexing and context export for the ARCHIV-IT
//! archive.
//!
//! archivit reads a directory of markdown files with YAML front-matter,
//! indexes them for keyword search via
//! [Tantivy](https://github.com/quickwit-oss/tantivy) with an embedding
//! rerank on top, and renders the best matches as a markdown report that
//! fits a token budget.
//!
//! Indexing is meant to run as a single periodic job. Two processes writing
//! the same index directory at once is unsupported: concurrent rebuilds are
//! refused through a `<index>.lock` file and concurrent incremental writers
//! through tantivy's writer lock.
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::Path;
//!
//! use archivit::{Config, IndexStore, context, loader, search};
//!
//! let config = Config::load(Path::new("config.json")).unwrap();
//! let excludes = config.excludes().unwrap();
//! let docs =
//!     loader::load_documents(&config.knowledge_base, &excludes).unwrap();
//!
//! let store = IndexStore::new(&config);
//! let index = store.rebuild(&docs).unwrap();
//!
//! let results = search::search("solana mint", &index, store.embedder(), 10)
//!     .unwrap();
//! let report = context::format_context(&results, "solana mint", 50_000, true);
//! println!("{report}");
//! ```

pub mod config;
pub mod context;
pub mod doc_id;
pub mod embedding;
pub mod embedding_db;
pub mod error;
pub mod frontmatter;
pub mod index_store;
pub mod loader;
pub mod reranker;
pub mod search;
pub mod sync;
pub mod tantivy_index;
pub mod text_util;
pub mod walker;

pub use config::Config;
pub use context::{CharEstimator, ContextReport, TokenEstimator};
pub use doc_id::DocumentId;
pub use embedding::{Embedder, HashingEmbedder};
pub use embedding_db::EmbeddingDb;
pub use error::{Error, Result};
pub use index_store::{IndexStore, KnowledgeIndex};
pub use loader::Document;
pub use search::{SearchParams, SearchResult};
pub use tantivy_index::SearchIndex;
