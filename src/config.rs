//! Process configuration.
//!
//! Loaded once at start-up from a JSON file and passed by reference to every
//! component; nothing re-reads it afterwards.
//!
//! ```json
//! {
//!   "knowledge_base": "knowledge_base",
//!   "exclude": ["drafts/**"],
//!   "index": { "path": ".archivit/index" },
//!   "search": { "default_limit": 10 },
//!   "export": { "max_tokens": 50000 }
//! }
//! ```

use std::path::{Path, PathBuf};

use globset::GlobSet;
use serde::{Deserialize, Serialize};

use crate::{
    embedding::{DEFAULT_DIMENSION, HashingEmbedder},
    error::{Error, Result},
    walker,
};

pub const CONFIG_ENV_VAR: &str = "ARCHIVIT_CONFIG";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Smallest writer budget tantivy accepts for a single indexing thread.
const MIN_WRITER_MEMORY: usize = 15_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the markdown knowledge base.
    pub knowledge_base: PathBuf,
    /// Glob patterns, relative to `knowledge_base`, to leave out.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default = "default_writer_memory")]
    pub writer_memory_bytes: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            writer_memory_bytes: default_writer_memory(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from(".archivit/index")
}
fn default_writer_memory() -> usize {
    50_000_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Size of the BM25 candidate pool handed to the reranker.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    #[serde(default = "default_dimension")]
    pub embedding_dimension: usize,
    #[serde(default)]
    pub fuzzy: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            candidate_limit: default_candidate_limit(),
            embedding_dimension: default_dimension(),
            fuzzy: false,
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_candidate_limit() -> usize {
    100
}
fn default_dimension() -> usize {
    DEFAULT_DIMENSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    50_000
}

impl Config {
    /// A configuration with defaults for everything but the two paths.
    pub fn new(knowledge_base: PathBuf, index_path: PathBuf) -> Self {
        Self {
            knowledge_base,
            exclude: Vec::new(),
            index: IndexConfig {
                path: index_path,
                ..IndexConfig::default()
            },
            search: SearchConfig::default(),
            export: ExportConfig::default(),
        }
    }

    /// Load and validate the configuration file at `path`.
    ///
    /// Relative paths inside the file resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ConfigMissing(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let base = path.parent().unwrap_or(Path::new("."));
        let config = Self::from_json(&contents, base)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse configuration JSON, resolving relative paths against `base`.
    pub fn from_json(contents: &str, base: &Path) -> Result<Self> {
        let mut config: Config = serde_json::from_str(contents)
            .map_err(|e| Error::Config(format!("invalid config: {e}")))?;

        if config.knowledge_base.is_relative() {
            config.knowledge_base = base.join(&config.knowledge_base);
        }
        if config.index.path.is_relative() {
            config.index.path = base.join(&config.index.path);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.search.default_limit == 0 {
            return Err(Error::Config(
                "search.default_limit must be greater than zero".into(),
            ));
        }
        if self.search.candidate_limit == 0 {
            return Err(Error::Config(
                "search.candidate_limit must be greater than zero".into(),
            ));
        }
        if self.search.embedding_dimension == 0 {
            return Err(Error::Config(
                "search.embedding_dimension must be greater than zero".into(),
            ));
        }
        if self.index.writer_memory_bytes < MIN_WRITER_MEMORY {
            return Err(Error::Config(format!(
                "index.writer_memory_bytes must be at least {MIN_WRITER_MEMORY}"
            )));
        }
        walker::build_excludes(&self.exclude)?;
        Ok(())
    }

    pub fn excludes(&self) -> Result<GlobSet> {
        walker::build_excludes(&self.exclude)
    }

    pub fn embedder(&self) -> HashingEmbedder {
        HashingEmbedder::new(self.search.embedding_dimension)
    }
}

/// Resolve the configuration file path from, in order of priority:
/// 1. An explicit path (from --config)
/// 2. The ARCHIVIT_CONFIG environment variable
/// 3. The XDG config directory (~/.config/archivit/config.json)
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(val) = std::env::var(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(val));
    }

    let home = xdg::BaseDirectories::with_prefix("archivit")
        .get_config_home()
        .ok_or_else(|| {
            Error::Config(
                "could not determine XDG config home directory".into(),
            )
        })?;
    Ok(home.join(CONFIG_FILE_NAME))
}
