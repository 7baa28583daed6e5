use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use trove_core::analyze::{analyze, AnalyzeOptions};
use trove_core::config::{parse_memory_limit, PipelineConfig, DEFAULT_MAX_N};
use trove_core::dictionary::build_token_cache;
use trove_core::extract::Registry;
use trove_core::ngram::{build_ngram_files, build_ngram_freq, build_ngram_index};
use trove_core::persist::CachePaths;
use trove_core::pipeline::Pipeline;
use trove_core::process::{conversion_status, run_process};
use trove_core::tokenizer::NormalizeMode;
use trove_core::word_index::build_word_index;

#[derive(Parser)]
#[command(name = "tokentrove")]
#[command(about = "Build word and n-gram caches over a document corpus", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct PoolArgs {
    /// Worker count (defaults to available cores)
    #[arg(long)]
    workers: Option<usize>,
    /// Soft memory ceiling, e.g. 2GB or 512MB
    #[arg(long)]
    ram_limit: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and normalize documents into a directory of .txt files
    Process {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// text, token or lowercase
        #[arg(long, default_value = "text")]
        mode: NormalizeMode,
        /// Overwrite outputs that already exist
        #[arg(long, default_value_t = false)]
        replace: bool,
        /// Only report what is left to convert
        #[arg(long, default_value_t = false)]
        status: bool,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Per-extension conversion progress
    Status {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Word table, file table and source pointer
    Tokens {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "./cache")]
        cache: PathBuf,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Word → files index
    Index {
        #[arg(long, default_value = "./cache")]
        cache: PathBuf,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// N-gram tables and n-gram → files membership
    Ngrams {
        #[arg(long, default_value = "./cache")]
        cache: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_N)]
        max_n: usize,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// N-gram frequency tables
    Ngramfreq {
        #[arg(long, default_value = "./cache")]
        cache: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_N)]
        max_n: usize,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// File → n-grams reverse index
    Ngramfiles {
        #[arg(long, default_value = "./cache")]
        cache: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_N)]
        max_n: usize,
    },
    /// tokens, index and ngramfreq in one go
    Analyze {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "./cache")]
        cache: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_N)]
        max_n: usize,
        /// Also build n-gram membership and the reverse index
        #[arg(long, default_value_t = false)]
        membership: bool,
        #[command(flatten)]
        pool: PoolArgs,
    },
}

fn pipeline(pool: &PoolArgs, log_dir: &Path) -> Result<Pipeline> {
    let mut config = PipelineConfig::default().with_log_dir(log_dir);
    if let Some(w) = pool.workers {
        config = config.with_workers(w);
    }
    if let Some(limit) = &pool.ram_limit {
        config = config.with_ram_limit(parse_memory_limit(limit).context("parsing --ram-limit")?);
    }
    config.validate()?;
    Ok(Pipeline::new(config))
}

fn print_status(input: &Path, output: &Path) -> Result<()> {
    let status = conversion_status(input, output)?;
    println!("\n=== Conversion Status ===");
    println!("Input:  {}", input.display());
    println!("Output: {}\n", output.display());
    println!("{:<15} {:>8} {:>10} {:>10}", "Extension", "Total", "Converted", "Remaining");
    println!("{}", "-".repeat(45));
    for (ext, s) in &status.by_extension {
        println!("{:<15} {:>8} {:>10} {:>10}", ext, s.total, s.converted, s.remaining);
    }
    println!("{}", "-".repeat(45));
    let t = &status.total;
    println!("{:<15} {:>8} {:>10} {:>10}\n", "TOTAL", t.total, t.converted, t.remaining);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Process { input, output, mode, replace, status, pool } => {
            if status {
                return print_status(&input, &output);
            }
            let p = pipeline(&pool, &output)?;
            let stats = run_process(&input, &output, mode, replace, Arc::new(Registry::default()), &p)
                .await
                .with_context(|| format!("processing {}", input.display()))?;
            tracing::info!(?stats, "process done");
        }
        Commands::Status { input, output } => print_status(&input, &output)?,
        Commands::Tokens { input, cache, pool } => {
            let p = pipeline(&pool, &cache)?;
            let stats = build_token_cache(&input, &CachePaths::new(&cache), &p).await?;
            tracing::info!(?stats, "tokens done");
        }
        Commands::Index { cache, pool } => {
            let p = pipeline(&pool, &cache)?;
            let stats = build_word_index(&CachePaths::new(&cache), &p).await?;
            tracing::info!(?stats, "index done");
        }
        Commands::Ngrams { cache, max_n, pool } => {
            let p = pipeline(&pool, &cache)?;
            for s in build_ngram_index(&CachePaths::new(&cache), max_n, &p).await? {
                tracing::info!(n = s.n, unique = s.unique, failed = s.run.failed, "ngrams done");
            }
        }
        Commands::Ngramfreq { cache, max_n, pool } => {
            let p = pipeline(&pool, &cache)?;
            for s in build_ngram_freq(&CachePaths::new(&cache), max_n, &p).await? {
                tracing::info!(n = s.n, unique = s.unique, kept = s.written, "ngramfreq done");
            }
        }
        Commands::Ngramfiles { cache, max_n } => {
            for s in build_ngram_files(&CachePaths::new(&cache), max_n)? {
                tracing::info!(n = s.n, ngrams = s.unique, files = s.written, "ngramfiles done");
            }
        }
        Commands::Analyze { input, cache, max_n, membership, pool } => {
            let p = pipeline(&pool, &cache)?;
            let report = analyze(&input, &CachePaths::new(&cache), AnalyzeOptions { max_n, membership }, &p).await?;
            tracing::info!(words = report.tokens.words, files = report.tokens.files, orders = report.freq.len(), "analyze done");
        }
    }
    Ok(())
}
