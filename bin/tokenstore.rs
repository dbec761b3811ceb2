use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokenstore::{IndexConfig, IndexCreator};
use tracing::info;

#[derive(Parser)]
#[command(name = "tokenstore")]
#[command(about = "Positional inverted index with proximity search", long_about = None)]
struct Args {
    /// Index directory (segments, word catalog, document ids)
    #[arg(long, env = "TOKENSTORE_INDEX_DIR", global = true)]
    index_dir: Option<PathBuf>,

    /// JSON configuration file; command-line flags override it
    #[arg(long, env = "TOKENSTORE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index every matching file under a directory
    Index {
        dir: PathBuf,

        /// Comma-separated file extensions to include
        #[arg(long, value_delimiter = ',', default_value = "txt")]
        ext: Vec<String>,

        /// Requested write buffer memory cap in MB
        #[arg(long)]
        memory_mb: Option<usize>,

        /// Number of indexing worker threads
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Search for documents containing the query words in order
    Search {
        query: String,

        /// Other words allowed between consecutive query words
        #[arg(long, default_value = "0")]
        adjacency: u32,

        /// Stop after this many documents
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Remove documents from the index by path
    Delete {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Merge all segments into one
    Merge,
    /// Print the word catalog
    Words,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => IndexConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => IndexConfig::default(),
    };
    if let Some(dir) = &args.index_dir {
        config.index_dir = dir.clone();
    }

    match args.command {
        Command::Index {
            dir,
            ext,
            memory_mb,
            workers,
        } => {
            if let Some(mb) = memory_mb {
                config = config.with_memory_cap_mb(mb);
            }
            if let Some(workers) = workers {
                config = config.with_workers(workers);
            }
            let mut files = Vec::new();
            collect_files(&dir, &ext, &mut files)
                .with_context(|| format!("walking {}", dir.display()))?;
            info!("Indexing {} files from {:?}", files.len(), dir);

            let creator = IndexCreator::open(config)?;
            let summary = creator.run(&files)?;
            println!(
                "indexed {} skipped {} failed {}",
                summary.indexed, summary.skipped, summary.failed
            );
        }
        Command::Search {
            query,
            adjacency,
            limit,
            json,
        } => {
            let creator = IndexCreator::open(config)?;
            let results = creator.index().search(&query, adjacency)?;
            for result in results.take(limit.unwrap_or(usize::MAX)) {
                let result = result?;
                if json {
                    println!("{}", serde_json::to_string(&result)?);
                    continue;
                }
                let path = creator
                    .doc_ids()
                    .path_of(result.doc_id)?
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                println!("{}\t{}\t{}", result.doc_id, path, result.match_count());
            }
        }
        Command::Delete { paths } => {
            let creator = IndexCreator::open(config)?;
            let summary = creator.delete_paths(&paths)?;
            println!(
                "removed {} tokens, {} records",
                summary.removed_tokens, summary.records
            );
        }
        Command::Merge => {
            let creator = IndexCreator::open(config)?;
            match creator.index().merge()? {
                Some(summary) => {
                    for path in &summary.quarantined {
                        println!("quarantined {}", path.display());
                    }
                    if let Some(output) = &summary.output {
                        println!(
                            "merged {} segments into {}",
                            summary.inputs.len(),
                            output.path.display()
                        );
                    }
                }
                None => println!("nothing to merge"),
            }
        }
        Command::Words => {
            let creator = IndexCreator::open(config)?;
            for word in creator.index().words().iter() {
                println!("{}", word);
            }
        }
    }

    Ok(())
}

/// Files under `dir` with one of `exts`, in sorted path order
fn collect_files(dir: &Path, exts: &[String], out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_files(&path, exts, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| exts.iter().any(|x| x.trim_start_matches('.').eq_ignore_ascii_case(e)))
        {
            out.push(path);
        }
    }
    Ok(())
}
