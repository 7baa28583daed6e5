//! One-shot build of every cache stage in dependency order.

use crate::dictionary::{build_token_cache, DictionaryStats};
use crate::error::Result;
use crate::ngram::{build_ngram_files, build_ngram_freq, build_ngram_index, NgramStats};
use crate::persist::CachePaths;
use crate::pipeline::Pipeline;
use crate::word_index::{build_word_index, WordIndexStats};
use serde::Serialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct AnalyzeOptions {
    pub max_n: usize,
    /// Also build the n-gram membership and reverse indices.
    pub membership: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeReport {
    pub tokens: DictionaryStats,
    pub index: WordIndexStats,
    pub freq: Vec<NgramStats>,
    pub ngrams: Vec<NgramStats>,
    pub files: Vec<NgramStats>,
}

/// tokens → index → ngramfreq, then ngrams → ngramfiles when `membership` is set.
pub async fn analyze(input: &Path, paths: &CachePaths, opts: AnalyzeOptions, pipeline: &Pipeline) -> Result<AnalyzeReport> {
    crate::config::validate_max_n(opts.max_n)?;
    info!(stage = "tokens", "analyze");
    let tokens = build_token_cache(input, paths, pipeline).await?;
    info!(stage = "index", "analyze");
    let index = build_word_index(paths, pipeline).await?;
    info!(stage = "ngramfreq", "analyze");
    let freq = build_ngram_freq(paths, opts.max_n, pipeline).await?;

    let (mut ngrams, mut files) = (Vec::new(), Vec::new());
    if opts.membership {
        info!(stage = "ngrams", "analyze");
        ngrams = build_ngram_index(paths, opts.max_n, pipeline).await?;
        info!(stage = "ngramfiles", "analyze");
        files = build_ngram_files(paths, opts.max_n)?;
    }
    Ok(AnalyzeReport { tokens, index, freq, ngrams, files })
}
