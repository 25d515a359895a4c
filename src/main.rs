use std::{path::Path, process::ExitCode};

use archivit::{
    Config,
    Error,
    IndexStore,
    config,
    context::{self, CharEstimator},
    loader::{self, Document},
    search::{self, SearchParams},
    sync::{self, SyncOptions, SyncReport},
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("ARCHIVIT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli) -> archivit::Result<()> {
    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let config_path = config::resolve_config_path(cli.config.as_deref())?;
    let config = Config::load(&config_path)?;

    match cli.command {
        Command::Rebuild => cmd_rebuild(&config),
        Command::Update(args) => cmd_update(&config, &args),
        Command::Stats(args) => cmd_stats(&config, args.json),
        Command::Search(args) => cmd_search(&config, &args),
        Command::Export(args) => cmd_export(&config, &args),
        Command::Completions(_) => Ok(()),
    }
}

fn load_documents(config: &Config) -> archivit::Result<Vec<Document>> {
    let docs =
        loader::load_documents(&config.knowledge_base, &config.excludes()?)?;
    eprintln!(
        "Loaded {} documents from {}",
        docs.len(),
        config.knowledge_base.display()
    );
    Ok(docs)
}

fn cmd_rebuild(config: &Config) -> archivit::Result<()> {
    let docs = load_documents(config)?;
    let store = IndexStore::new(config);

    let index = store.rebuild(&docs)?;
    eprintln!(
        "Indexed {} documents into {}",
        index.count()?,
        store.path().display()
    );
    Ok(())
}

fn cmd_update(config: &Config, args: &cli::UpdateArgs) -> archivit::Result<()> {
    let docs = load_documents(config)?;
    let store = IndexStore::new(config);
    let options = SyncOptions {
        append_only: args.append_only,
        prune: args.prune,
    };

    match sync::sync(&store, &docs, options) {
        Ok(report) => {
            print_sync_report(&report);
            Ok(())
        }
        Err(
            e @ (Error::IndexCorrupt { .. } | Error::EmbeddingDimension { .. }),
        ) => {
            tracing::warn!("{e}; rebuilding from scratch");
            let index = store.rebuild(&docs)?;
            eprintln!("Rebuilt index with {} documents", index.count()?);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn print_sync_report(report: &SyncReport) {
    if report.rebuilt {
        eprintln!("No index found; built one with {} documents", report.total);
        return;
    }

    eprintln!(
        "Added {}, replaced {}, removed {}, unchanged {}",
        report.added, report.replaced, report.removed, report.unchanged
    );
    if report.stale > 0 {
        eprintln!(
            "  {} changed document(s) left as indexed (--append-only)",
            report.stale
        );
    }
    if report.orphaned > 0 {
        eprintln!(
            "  {} indexed document(s) no longer on disk (use --prune)",
            report.orphaned
        );
    }
    eprintln!("Total documents: {}", report.total);
}

fn cmd_stats(config: &Config, json: bool) -> archivit::Result<()> {
    let store = IndexStore::new(config);
    let index = store.load()?.ok_or(Error::IndexNotLoaded)?;
    let total = index.count()?;

    if json {
        println!("{}", serde_json::json!({ "total_documents": total }));
    } else {
        println!("Index: {}", store.path().display());
        println!("Knowledge base: {}", config.knowledge_base.display());
        println!("Documents: {total}");
    }
    Ok(())
}

fn cmd_search(config: &Config, args: &cli::SearchArgs) -> archivit::Result<()> {
    let store = IndexStore::new(config);
    let index = store.load()?;

    let params = SearchParams {
        query: args.query.clone(),
        limit: args.count.unwrap_or(config.search.default_limit),
        min_score: args.min_score,
        bm25_only: args.bm25_only,
        fuzzy: args.fuzzy || config.search.fuzzy,
        candidate_limit: config.search.candidate_limit,
    };
    let results =
        search::execute_search(&params, index.as_ref(), store.embedder())?;

    if args.json {
        println!("{}", search::format_json(&results, &args.query)?);
    } else {
        print!("{}", search::format_human(&results, &args.query));
    }
    Ok(())
}

fn cmd_export(config: &Config, args: &cli::ExportArgs) -> archivit::Result<()> {
    let store = IndexStore::new(config);
    let index = store.load()?;

    let params = SearchParams {
        query: args.query.clone(),
        limit: args.limit,
        min_score: None,
        bm25_only: args.bm25_only,
        fuzzy: config.search.fuzzy,
        candidate_limit: config.search.candidate_limit,
    };
    let results =
        search::execute_search(&params, index.as_ref(), store.embedder())?;

    let report = context::build_context(
        &CharEstimator,
        &results,
        &args.query,
        args.max_tokens.unwrap_or(config.export.max_tokens),
        !args.no_metadata,
    );

    match &args.output {
        Some(path) => {
            write_report(path, &report.markdown)?;
            eprintln!(
                "Wrote {} of {} results (~{} tokens) to {}",
                report.included,
                report.total_found,
                report.estimated_tokens,
                path.display()
            );
        }
        None => print!("{}", report.markdown),
    }
    Ok(())
}

fn write_report(path: &Path, markdown: &str) -> archivit::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, markdown)?;
    Ok(())
}
