//! Recurring-passage search over boundary-overlapping n-grams.
//!
//! Two n-grams link when the last two words of one equal the first two of the
//! other. A chain's coverage is the intersection of its segments' file sets, or
//! an estimate when some order only has frequency data.

use crate::error::Result;
use crate::index::{FileSet, Ngram, WordId};
use crate::ngram::{load_freq, load_with_files, NgramRecord};
use crate::persist::CachePaths;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Words shared by two linked segments.
pub const OVERLAP: usize = 2;
pub const MAX_HOPS: usize = 10;
pub const PAIRWISE_CANDIDATES: usize = 500;
pub const THREE_HOP_CANDIDATES: usize = 300;
pub const RESULT_CAP: usize = 100;
const NUMERIC_RATIO: f64 = 0.6;

type Boundary = (WordId, WordId);

/// One loaded n-gram, ready to be used as a chain segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub ngram: Ngram,
    pub words: Vec<String>,
    /// File count when `files` is present, occurrence count otherwise.
    pub count: u64,
    pub files: Option<FileSet>,
}

impl ChainEntry {
    pub fn n(&self) -> usize { self.ngram.order() }

    pub fn phrase(&self) -> String { self.words.join(" ") }

    fn head(&self) -> Boundary {
        let ids = self.ngram.ids();
        (ids[0], ids[1])
    }

    fn tail(&self) -> Boundary {
        let ids = self.ngram.ids();
        (ids[ids.len() - 2], ids[ids.len() - 1])
    }
}

/// Files shared by a chain so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    Files(FileSet),
    /// At least one segment had no file data; upper bound from counts.
    Estimated(u64),
}

impl Coverage {
    pub fn of(entry: &ChainEntry) -> Self {
        match &entry.files {
            Some(files) => Coverage::Files(files.clone()),
            None => Coverage::Estimated(entry.count),
        }
    }

    /// Estimates above `files` (the corpus size) are lowered to it.
    pub fn capped(self, files: u64) -> Self {
        match self {
            Coverage::Estimated(c) => Coverage::Estimated(c.min(files)),
            covered => covered,
        }
    }

    pub fn join(&self, next: &ChainEntry) -> Self {
        match (self, &next.files) {
            (Coverage::Files(shared), Some(files)) => Coverage::Files(shared.intersect(files)),
            _ => Coverage::Estimated(self.count().min(next.count)),
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            Coverage::Files(f) => f.len() as u64,
            Coverage::Estimated(c) => *c,
        }
    }

    pub fn files(&self) -> Option<&FileSet> {
        match self {
            Coverage::Files(f) => Some(f),
            Coverage::Estimated(_) => None,
        }
    }

    fn is_dead(&self) -> bool { matches!(self, Coverage::Files(f) if f.is_empty()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub phrase: String,
    pub n: usize,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub segments: Vec<Segment>,
    pub text: String,
    pub word_count: usize,
    pub coverage: Coverage,
}

impl Chain {
    pub fn file_count(&self) -> u64 { self.coverage.count() }

    /// Words times shared files.
    pub fn score(&self) -> u64 { self.word_count as u64 * self.file_count() }

    /// Shared words between segment `i` and `i + 1` (two words).
    pub fn overlap(&self, i: usize) -> Option<String> {
        let seg = self.segments.get(i)?;
        let words: Vec<&str> = seg.phrase.split(' ').collect();
        Some(words[words.len().saturating_sub(OVERLAP)..].join(" "))
    }
}

/// `true` when more than 60% of `words` are numbers or start with a digit.
pub fn is_numeric_noise<S: AsRef<str>>(words: &[S]) -> bool {
    if words.is_empty() {
        return true;
    }
    let numeric = words
        .iter()
        .map(|w| -> &str { w.as_ref() })
        .filter(|w| !w.is_empty())
        .filter(|w| {
            w.chars().all(|c| c.is_ascii_digit() || matches!(c, 'e' | '.' | '-' | '+'))
                || w.chars().next().is_some_and(|c| c.is_ascii_digit())
        })
        .count();
    numeric as f64 / words.len() as f64 > NUMERIC_RATIO
}

/// Minimum shared files; anything below 2 is not recurring.
pub fn clamp_min_files(min_files: usize) -> usize { min_files.max(2) }

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub min_n: usize,
    pub max_n: usize,
    /// Entries kept per order.
    pub per_order: usize,
    /// Entries present in fewer files than this cannot contribute and are skipped.
    pub min_files: usize,
    pub skip_numeric: bool,
}

/// Loads one order, preferring membership data and falling back to frequency data.
fn load_order(paths: &CachePaths, words: &[String], file_count: usize, n: usize, opts: &LoadOptions) -> Result<Vec<ChainEntry>> {
    let records: Vec<NgramRecord> =
        match load_with_files(paths, n, opts.per_order, opts.min_files, words.len(), file_count)? {
            Some(records) => records,
            None => {
                debug!(n, "no membership index, using frequency counts");
                load_freq(paths, n, opts.per_order, words.len())?
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|r| r.count.min(file_count as u64) >= opts.min_files as u64)
                    .collect()
            }
        };
    let mut out = Vec::with_capacity(records.len());
    for r in records {
        if r.ngram.order() < OVERLAP {
            continue;
        }
        // Word IDs were range-checked by the loader.
        let text: Vec<String> = r.ngram.ids().iter().map(|&w| words[w as usize].clone()).collect();
        if opts.skip_numeric && is_numeric_noise(&text) {
            continue;
        }
        out.push(ChainEntry { ngram: r.ngram, words: text, count: r.count, files: r.files });
    }
    Ok(out)
}

/// Loaded entries plus the "starts-with" and "ends-with" boundary maps.
#[derive(Debug, Default)]
pub struct ChainIndex {
    entries: Vec<ChainEntry>,
    starts: BTreeMap<Boundary, Vec<usize>>,
    ends: BTreeMap<Boundary, Vec<usize>>,
    /// Corpus size; bounds every estimated coverage.
    file_cap: Option<u64>,
}

impl ChainIndex {
    pub fn new(entries: Vec<ChainEntry>) -> Self {
        let mut index = ChainIndex::default();
        index.extend(entries);
        index
    }

    pub fn with_file_count(mut self, files: usize) -> Self {
        self.file_cap = Some(files as u64);
        self
    }

    fn coverage_of(&self, i: usize) -> Coverage {
        let coverage = Coverage::of(&self.entries[i]);
        match self.file_cap {
            Some(cap) => coverage.capped(cap),
            None => coverage,
        }
    }

    fn extend(&mut self, entries: Vec<ChainEntry>) {
        for entry in entries {
            if entry.n() < OVERLAP {
                continue;
            }
            let i = self.entries.len();
            self.starts.entry(entry.head()).or_default().push(i);
            self.ends.entry(entry.tail()).or_default().push(i);
            self.entries.push(entry);
        }
    }

    /// Loads every order in `min_n..=max_n`, one thread per order.
    ///
    /// Results are merged in order of `n` once each load has finished;
    /// `progress(n, entries)` is called after each merge.
    pub fn load<F>(paths: &CachePaths, words: &[String], file_count: usize, opts: &LoadOptions, mut progress: F) -> Result<Self>
    where
        F: FnMut(usize, usize),
    {
        let mut index = ChainIndex::default().with_file_count(file_count);
        if opts.min_n > opts.max_n {
            return Ok(index);
        }
        std::thread::scope(|s| -> Result<()> {
            let handles: Vec<_> = (opts.min_n..=opts.max_n)
                .map(|n| (n, s.spawn(move || load_order(paths, words, file_count, n, opts))))
                .collect();
            for (n, handle) in handles {
                let entries = match handle.join() {
                    Ok(loaded) => loaded?,
                    Err(panic) => std::panic::resume_unwind(panic),
                };
                let loaded = entries.len();
                index.extend(entries);
                progress(n, loaded);
            }
            Ok(())
        })?;
        info!(entries = index.entries.len(), boundaries = index.starts.len(), "chain index loaded");
        Ok(index)
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn entries(&self) -> &[ChainEntry] { &self.entries }

    fn assemble(&self, links: &[usize], coverage: Coverage) -> Chain {
        let mut words: Vec<&str> = Vec::new();
        let mut segments = Vec::with_capacity(links.len());
        for (i, &link) in links.iter().enumerate() {
            let e = &self.entries[link];
            let skip = if i == 0 { 0 } else { OVERLAP };
            words.extend(e.words[skip..].iter().map(String::as_str));
            segments.push(Segment { phrase: e.phrase(), n: e.n(), count: e.count });
        }
        Chain { segments, text: words.join(" "), word_count: words.len(), coverage }
    }

    /// Two-segment chains sharing at least `min_files` files.
    pub fn pairwise(&self, min_files: usize) -> Vec<Chain> {
        let min_files = clamp_min_files(min_files) as u64;
        let mut seen: HashSet<String> = HashSet::new();
        let mut chains = Vec::new();

        'search: for (key, enders) in &self.ends {
            let Some(starters) = self.starts.get(key) else { continue };
            for &a in enders {
                for &b in starters {
                    if a == b {
                        continue;
                    }
                    let coverage = self.coverage_of(a).join(&self.entries[b]);
                    if coverage.count() < min_files {
                        continue;
                    }
                    let chain = self.assemble(&[a, b], coverage);
                    if !seen.insert(chain.text.clone()) {
                        continue;
                    }
                    chains.push(chain);
                    if chains.len() >= PAIRWISE_CANDIDATES {
                        break 'search;
                    }
                }
            }
        }
        finish(chains, RESULT_CAP, by_files)
    }

    /// A→B→C chains whose three-way coverage still meets `min_files`.
    pub fn three_hop(&self, min_files: usize) -> Vec<Chain> {
        let min_files = clamp_min_files(min_files) as u64;
        let mut seen: HashSet<String> = HashSet::new();
        let mut chains = Vec::new();

        'search: for (key, enders) in &self.ends {
            let Some(mids) = self.starts.get(key) else { continue };
            for &a in enders {
                for &b in mids {
                    if a == b {
                        continue;
                    }
                    let ab = self.coverage_of(a).join(&self.entries[b]);
                    if ab.count() < min_files {
                        continue;
                    }
                    let Some(lasts) = self.starts.get(&self.entries[b].tail()) else { continue };
                    for &c in lasts {
                        if c == a || c == b {
                            continue;
                        }
                        let abc = ab.join(&self.entries[c]);
                        if abc.count() < min_files {
                            continue;
                        }
                        let chain = self.assemble(&[a, b, c], abc);
                        if !seen.insert(chain.text.clone()) {
                            continue;
                        }
                        chains.push(chain);
                        if chains.len() >= THREE_HOP_CANDIDATES {
                            break 'search;
                        }
                    }
                }
            }
        }
        finish(chains, RESULT_CAP, by_files)
    }

    /// Greedy longest chains from every entry as head, ranked by words × files.
    ///
    /// Each hop takes the continuation with the highest `overlap * 1000 + count`
    /// (first wins ties) and never revisits the choice, so a longer chain behind
    /// a weaker first hop can be missed.
    ///
    /// Once any link lacks file data the chain's coverage stays an estimate for
    /// the rest of the walk; a later file-backed link does not restore a file set.
    pub fn best_chains(&self, top_n: usize) -> Vec<Chain> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut chains = Vec::new();

        for head in 0..self.entries.len() {
            let mut links = vec![head];
            let mut coverage = self.coverage_of(head);
            let mut current = head;
            for _ in 0..MAX_HOPS {
                let Some(candidates) = self.starts.get(&self.entries[current].tail()) else { break };
                let mut best: Option<(u64, usize, Coverage)> = None;
                for &c in candidates {
                    if c == current {
                        continue;
                    }
                    let next = &self.entries[c];
                    let joined = coverage.join(next);
                    if joined.is_dead() {
                        continue;
                    }
                    let overlap = match (&coverage, &next.files) {
                        (Coverage::Files(shared), Some(files)) => shared.intersection_len(files) as u64,
                        _ => 0,
                    };
                    let score = overlap * 1000 + next.count;
                    if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
                        best = Some((score, c, joined));
                    }
                }
                let Some((_, next, joined)) = best else { break };
                links.push(next);
                coverage = joined;
                current = next;
            }
            if links.len() < 2 {
                continue;
            }
            let chain = self.assemble(&links, coverage);
            if seen.insert(chain.text.clone()) {
                chains.push(chain);
            }
        }
        finish(chains, top_n, by_score)
    }
}

fn by_files(a: &Chain, b: &Chain) -> Ordering {
    b.file_count()
        .cmp(&a.file_count())
        .then_with(|| b.word_count.cmp(&a.word_count))
        .then_with(|| a.text.cmp(&b.text))
}

fn by_score(a: &Chain, b: &Chain) -> Ordering {
    b.score()
        .cmp(&a.score())
        .then_with(|| b.word_count.cmp(&a.word_count))
        .then_with(|| a.text.cmp(&b.text))
}

fn finish(mut chains: Vec<Chain>, cap: usize, order: fn(&Chain, &Chain) -> Ordering) -> Vec<Chain> {
    chains.sort_by(order);
    chains.truncate(cap);
    chains
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(words: &[&str], lookup: &[&str], files: Option<&[u32]>, count: u64) -> ChainEntry {
        let ids = words
            .iter()
            .map(|w| lookup.iter().position(|l| l == w).unwrap() as WordId)
            .collect();
        let files = files.map(|f| FileSet::from_unsorted(f.to_vec()));
        let count = files.as_ref().map_or(count, |f| f.len() as u64);
        ChainEntry { ngram: Ngram(ids), words: words.iter().map(|w| w.to_string()).collect(), count, files }
    }

    const WORDS: &[&str] = &["a", "b", "c", "d", "e", "f", "g"];

    #[test]
    fn pairwise_merges_on_two_word_boundary() {
        let index = ChainIndex::new(vec![
            entry(&["a", "b", "c"], WORDS, Some(&[0, 1, 2]), 0),
            entry(&["b", "c", "d"], WORDS, Some(&[1, 2, 3]), 0),
            entry(&["b", "c", "e"], WORDS, Some(&[3]), 0),
        ]);
        let chains = index.pairwise(2);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].text, "a b c d");
        assert_eq!(chains[0].file_count(), 2);
        assert_eq!(chains[0].overlap(0).as_deref(), Some("b c"));
        assert!(index.pairwise(3).is_empty());
    }

    #[test]
    fn estimated_coverage_never_exceeds_segment_counts() {
        let index = ChainIndex::new(vec![
            entry(&["a", "b", "c"], WORDS, None, 7),
            entry(&["b", "c", "d"], WORDS, Some(&[0, 1, 2]), 0),
        ]);
        let chains = index.pairwise(2);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].coverage, Coverage::Estimated(3));
    }

    #[test]
    fn estimates_are_bounded_by_corpus_size() {
        let index = ChainIndex::new(vec![
            entry(&["a", "b", "c"], WORDS, None, 10),
            entry(&["b", "c", "d"], WORDS, None, 10),
        ])
        .with_file_count(2);
        assert!(index.pairwise(5).is_empty());
        let chains = index.pairwise(2);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].coverage, Coverage::Estimated(2));
        assert_eq!(index.best_chains(5)[0].file_count(), 2);
    }

    #[test]
    fn three_hop_narrows_coverage() {
        let index = ChainIndex::new(vec![
            entry(&["a", "b", "c"], WORDS, Some(&[0, 1, 2]), 0),
            entry(&["b", "c", "d"], WORDS, Some(&[0, 1, 2]), 0),
            entry(&["c", "d", "e"], WORDS, Some(&[1, 2, 5]), 0),
        ]);
        let chains = index.three_hop(2);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].text, "a b c d e");
        assert_eq!(chains[0].coverage.files().unwrap().as_slice(), &[1, 2]);
    }

    #[test]
    fn best_chain_prefers_file_agreement_and_skips_dead_ends() {
        let index = ChainIndex::new(vec![
            entry(&["a", "b", "c"], WORDS, Some(&[0, 1]), 0),
            // Higher count but disjoint files: not a valid continuation.
            entry(&["b", "c", "f"], WORDS, Some(&[4, 5, 6]), 0),
            entry(&["b", "c", "d"], WORDS, Some(&[0, 1]), 0),
            entry(&["c", "d", "e"], WORDS, Some(&[1]), 0),
        ]);
        let chains = index.best_chains(10);
        let top = &chains[0];
        assert_eq!(top.text, "a b c d e");
        assert_eq!(top.score(), 5);
        assert!(chains.iter().all(|c| c.text != "a b c f"));
    }

    #[test]
    fn numeric_noise() {
        assert!(is_numeric_noise(&["1990", "2000", "7spouse", "total"]));
        assert!(!is_numeric_noise(&["the", "year", "1990"]));
        assert!(is_numeric_noise::<&str>(&[]));
    }
}
