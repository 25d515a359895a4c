use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "archivit",
    version,
    about = "Index a markdown knowledge base and export search context"
)]
pub struct Cli {
    /// Path to the configuration file [env: ARCHIVIT_CONFIG]
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Rebuild the index from the knowledge base (full reindex)
    Rebuild,
    /// Index new and changed documents (rebuilds if there is no index)
    Update(UpdateArgs),
    /// Show index statistics
    Stats(StatsArgs),
    /// Search the index
    Search(SearchArgs),
    /// Export search results as a token-budgeted markdown report
    Export(ExportArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Update --

#[derive(Debug, Parser)]
pub struct UpdateArgs {
    /// Only add new documents; leave changed ones as indexed
    #[arg(long)]
    pub append_only: bool,

    /// Remove indexed documents whose source file is gone
    #[arg(long)]
    pub prune: bool,
}

// -- Stats --

#[derive(Debug, Parser)]
pub struct StatsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query (empty or `*` lists documents)
    pub query: String,

    /// Number of results to return [default: search.default_limit]
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Minimum score threshold
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Skip embedding reranking, return BM25 results directly
    #[arg(long)]
    pub bm25_only: bool,

    /// Tolerate one-letter typos in query terms
    #[arg(long)]
    pub fuzzy: bool,
}

// -- Export --

#[derive(Debug, Parser)]
pub struct ExportArgs {
    /// The search query
    #[arg(long)]
    pub query: String,

    /// Maximum number of results to consider
    #[arg(long, default_value = "10")]
    pub limit: usize,

    /// Token budget for the result blocks [default: export.max_tokens]
    #[arg(long)]
    pub max_tokens: Option<usize>,

    /// Leave out the per-result metadata line
    #[arg(long)]
    pub no_metadata: bool,

    /// Write the report to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Skip embedding reranking
    #[arg(long)]
    pub bm25_only: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "archivit",
            &mut std::io::stdout(),
        );
    }
}
