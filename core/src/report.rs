//! Report generation: frequency tables and chain searches written as pretty JSON.

use crate::chain::{clamp_min_files, Chain, ChainIndex, Coverage, LoadOptions};
use crate::error::Result;
use crate::ngram::load_freq;
use crate::persist::create_output;
use crate::query::Corpus;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

pub const TOP_NGRAMS_PER_ORDER: usize = 100;
pub const SEARCH_HITS_PER_ORDER: usize = 50;
pub const PAIRWISE_PER_ORDER: usize = 200;
pub const THREE_HOP_PER_ORDER: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    TopNgrams,
    Search,
    RecurringText,
    LinkedNgrams,
    BestChains,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::TopNgrams => "top_ngrams",
            ReportKind::Search => "search",
            ReportKind::RecurringText => "recurring_text",
            ReportKind::LinkedNgrams => "linked_ngrams",
            ReportKind::BestChains => "best_chains",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ReportKind::TopNgrams => "Top Ngrams",
            ReportKind::Search => "Search",
            ReportKind::RecurringText => "Recurring Text",
            ReportKind::LinkedNgrams => "Linked Ngrams",
            ReportKind::BestChains => "Best Chains",
        }
    }
}

/// Request parameters; zero means "use the default for this kind".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportParams {
    pub query: String,
    pub min_n: usize,
    pub min_files: usize,
    pub skip_numeric: bool,
    pub top_n: usize,
}

impl ReportParams {
    /// Fills in defaults the way the generator will read them.
    pub fn resolved(&self, kind: ReportKind) -> ReportParams {
        let mut p = self.clone();
        match kind {
            ReportKind::RecurringText | ReportKind::LinkedNgrams => {
                if p.min_n < 3 {
                    p.min_n = 5;
                }
                p.min_files = clamp_min_files(p.min_files);
            }
            ReportKind::BestChains => {
                if p.min_n < 2 {
                    p.min_n = 3;
                }
                if p.top_n == 0 {
                    p.top_n = 100;
                }
            }
            ReportKind::TopNgrams | ReportKind::Search => {}
        }
        p
    }

    pub fn describe(&self, kind: ReportKind) -> String {
        let p = self.resolved(kind);
        match kind {
            ReportKind::TopNgrams => format!("Top {TOP_NGRAMS_PER_ORDER} most frequent n-grams for each size"),
            ReportKind::Search => format!("Search results for '{}'", p.query),
            ReportKind::RecurringText => {
                format!("Find text (min {}-grams) appearing in {}+ files", p.min_n, p.min_files)
            }
            ReportKind::LinkedNgrams => format!("Three linked n-grams (min {}-grams) shared by {}+ files", p.min_n, p.min_files),
            ReportKind::BestChains => "Longest recurring chains sorted by (files × length)".to_string(),
        }
    }
}

pub fn report_path(dir: &Path, id: &str) -> PathBuf { dir.join(format!("report_{id}.json")) }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SegmentView {
    phrase: String,
    n: usize,
    count: u64,
    start_idx: usize,
    end_idx: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecurringView {
    segments: Vec<SegmentView>,
    full_text: String,
    overlap: String,
    file_count: u64,
    estimated: bool,
    files: Vec<String>,
    total_length: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkedView {
    chain: Vec<crate::chain::Segment>,
    full_text: String,
    chain_length: usize,
    file_count: u64,
    estimated: bool,
    files: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BestView {
    chain: Vec<crate::chain::Segment>,
    full_text: String,
    word_count: usize,
    file_count: u64,
    score: u64,
    files: Vec<String>,
}

/// Names of the first `cap` shared files, then a marker for the rest.
fn file_names(corpus: &Corpus, coverage: &Coverage, cap: usize, more: impl Fn(usize) -> String) -> Vec<String> {
    let Some(files) = coverage.files() else { return Vec::new() };
    let mut out: Vec<String> = files
        .as_slice()
        .iter()
        .take(cap)
        .filter_map(|&f| corpus.file_name(f).map(str::to_string))
        .collect();
    if files.len() > cap {
        out.push(more(files.len() - cap));
    }
    out
}

fn recurring_view(corpus: &Corpus, chain: &Chain) -> RecurringView {
    let mut start = 0;
    let mut segments = Vec::with_capacity(chain.segments.len());
    for (i, s) in chain.segments.iter().enumerate() {
        let end = if i + 1 == chain.segments.len() { chain.word_count - 1 } else { start + s.n - 1 };
        segments.push(SegmentView { phrase: s.phrase.clone(), n: s.n, count: s.count, start_idx: start, end_idx: end });
        start = end + 1 - crate::chain::OVERLAP;
    }
    RecurringView {
        segments,
        full_text: chain.text.clone(),
        overlap: chain.overlap(0).unwrap_or_default(),
        file_count: chain.file_count(),
        estimated: chain.coverage.files().is_none(),
        files: file_names(corpus, &chain.coverage, 20, |rest| format!("... and {rest} more")),
        total_length: chain.word_count,
    }
}

fn chain_index<F>(corpus: &Corpus, opts: &LoadOptions, progress: &mut F) -> Result<ChainIndex>
where
    F: FnMut(usize, usize, String),
{
    let orders = (opts.max_n + 1).saturating_sub(opts.min_n).max(1);
    let mut done = 0;
    ChainIndex::load(&corpus.paths, &corpus.words, corpus.files.len(), opts, |n, loaded| {
        done += 1;
        progress(done * 40 / orders, 100, format!("Loaded {loaded} {n}-grams"));
    })
}

/// Runs one report and writes `report_<id>.json` into `dir`.
///
/// `progress(done, total, message)` is called as work advances.
pub fn generate<F>(corpus: &Corpus, kind: ReportKind, params: &ReportParams, dir: &Path, id: &str, mut progress: F) -> Result<PathBuf>
where
    F: FnMut(usize, usize, String),
{
    let p = params.resolved(kind);
    let max_n = corpus.max_n;
    info!(kind = kind.as_str(), id, min_n = p.min_n, min_files = p.min_files, "generating report");

    let body: Value = match kind {
        ReportKind::TopNgrams | ReportKind::Search => {
            let (limit, cap) = match kind {
                ReportKind::TopNgrams => (TOP_NGRAMS_PER_ORDER, TOP_NGRAMS_PER_ORDER),
                _ => (0, SEARCH_HITS_PER_ORDER),
            };
            let needle = p.query.to_lowercase();
            let mut orders: BTreeMap<String, Vec<Value>> = BTreeMap::new();
            for n in 2..=max_n {
                progress(n - 2, max_n.saturating_sub(1), format!("Processing {n}-grams"));
                let records = load_freq(&corpus.paths, n, limit, corpus.words.len())?.unwrap_or_default();
                let mut rows = Vec::new();
                for r in records {
                    let phrase = corpus.words_of(&r.ngram)?.join(" ");
                    if kind == ReportKind::Search && !phrase.to_lowercase().contains(&needle) {
                        continue;
                    }
                    rows.push(json!({ "phrase": phrase, "count": r.count }));
                    if rows.len() >= cap {
                        break;
                    }
                }
                orders.insert(format!("{n}grams"), rows);
            }
            json!({ "type": kind.as_str(), "query": p.query, "ngrams": orders })
        }
        ReportKind::RecurringText => {
            let opts = LoadOptions {
                min_n: p.min_n,
                max_n,
                per_order: PAIRWISE_PER_ORDER,
                min_files: p.min_files,
                skip_numeric: p.skip_numeric,
            };
            let index = chain_index(corpus, &opts, &mut progress)?;
            progress(50, 100, format!("Loaded {} n-grams, finding chains", index.len()));
            let chains: Vec<RecurringView> = index.pairwise(p.min_files).iter().map(|c| recurring_view(corpus, c)).collect();
            json!({ "type": kind.as_str(), "minN": p.min_n, "minFiles": p.min_files, "chainCount": chains.len(), "chains": chains })
        }
        ReportKind::LinkedNgrams => {
            let opts = LoadOptions {
                min_n: p.min_n,
                max_n,
                per_order: THREE_HOP_PER_ORDER,
                min_files: p.min_files,
                skip_numeric: p.skip_numeric,
            };
            let index = chain_index(corpus, &opts, &mut progress)?;
            progress(50, 100, format!("Building chains from {} n-grams", index.len()));
            let chains: Vec<LinkedView> = index
                .three_hop(p.min_files)
                .into_iter()
                .map(|c| LinkedView {
                    files: file_names(corpus, &c.coverage, 10, |rest| format!("...+{rest} more")),
                    chain_length: c.segments.len(),
                    file_count: c.file_count(),
                    estimated: c.coverage.files().is_none(),
                    full_text: c.text,
                    chain: c.segments,
                })
                .collect();
            json!({ "type": kind.as_str(), "minN": p.min_n, "minFiles": p.min_files, "chainCount": chains.len(), "chains": chains })
        }
        ReportKind::BestChains => {
            let opts = LoadOptions { min_n: p.min_n, max_n, per_order: p.top_n, min_files: 1, skip_numeric: p.skip_numeric };
            let index = chain_index(corpus, &opts, &mut progress)?;
            progress(50, 100, "Building longest chains".to_string());
            let chains: Vec<BestView> = index
                .best_chains(p.top_n)
                .into_iter()
                .map(|c| BestView {
                    files: file_names(corpus, &c.coverage, 10, |rest| format!("...+{rest} more")),
                    word_count: c.word_count,
                    file_count: c.file_count(),
                    score: c.score(),
                    full_text: c.text,
                    chain: c.segments,
                })
                .collect();
            json!({ "type": kind.as_str(), "minN": p.min_n, "topN": p.top_n, "chainCount": chains.len(), "chains": chains })
        }
    };

    progress(100, 100, "Writing report".to_string());
    let path = report_path(dir, id);
    let mut w = create_output(&path)?;
    serde_json::to_writer_pretty(&mut w, &body)?;
    w.flush()?;
    info!(kind = kind.as_str(), path = %path.display(), "report written");
    Ok(path)
}
