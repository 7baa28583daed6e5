//! N-gram caches: membership index, frequency table and the file → n-gram reverse index.

use crate::config::validate_max_n;
use crate::dictionary::{read_text, Dictionary};
use crate::error::{Result, TroveError};
use crate::index::{FileId, FileSet, Ngram, NgramId, WordId};
use crate::persist::{
    create_output, format_freq, load_lines, load_postings, open_prerequisite, parse_freq, parse_posting, save_lines,
    save_postings, CachePaths,
};
use crate::pipeline::{ItemError, Outcome, Pipeline, RunSummary};
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct NgramStats {
    pub n: usize,
    /// Distinct n-grams seen.
    pub unique: usize,
    /// Entries written (equal to `unique` except for the pruned frequency table).
    pub written: usize,
    pub run: RunSummary,
}

/// Distinct windows of width `n`, in order of first occurrence.
pub fn distinct_windows(ids: &[WordId], n: usize) -> Vec<Ngram> {
    let mut seen: HashSet<&[WordId]> = HashSet::new();
    ids.windows(n).filter(|w| seen.insert(*w)).map(|w| Ngram(w.to_vec())).collect()
}

pub fn window_counts(ids: &[WordId], n: usize) -> HashMap<Ngram, u64> {
    let mut counts: HashMap<Ngram, u64> = HashMap::new();
    for w in ids.windows(n) {
        *counts.entry(Ngram(w.to_vec())).or_insert(0) += 1;
    }
    counts
}

fn encode_file(dict: &Dictionary, path: &Path) -> std::result::Result<Vec<WordId>, ItemError> {
    let text = read_text(path)?;
    Ok(dict.encode(&text))
}

/// Builds `uniq<n>gram.txt` and `<n>gramindex.txt` for every order in `2..=max_n`.
///
/// IDs are assigned in first-seen order walking files by file ID, whatever order
/// the workers finish in: completions are parked until every lower file ID has
/// been folded in. The parked buffer is not bounded; one slow low-ID file keeps
/// the windows of every file finished after it in memory until it completes.
pub async fn build_ngram_index(paths: &CachePaths, max_n: usize, pipeline: &Pipeline) -> Result<Vec<NgramStats>> {
    validate_max_n(max_n)?;
    let dict = Arc::new(Dictionary::load(paths)?);
    let mut stats = Vec::new();

    for n in 2..=max_n {
        info!(n, files = dict.files.len(), "building n-gram index");
        let mut ids: HashMap<Ngram, NgramId> = HashMap::new();
        let mut table: Vec<Ngram> = Vec::new();
        let mut membership: Vec<Vec<FileId>> = Vec::new();
        let mut parked: BTreeMap<usize, Vec<Ngram>> = BTreeMap::new();
        let mut next_file = 0usize;

        let encoder = dict.clone();
        let run = pipeline
            .run(
                dict.file_jobs(),
                move |path: PathBuf| encode_file(&encoder, &path).map(|seq| distinct_windows(&seq, n)),
                |file, outcome| {
                    parked.insert(file, outcome.into_done().unwrap_or_default());
                    while let Some(grams) = parked.remove(&next_file) {
                        for gram in grams {
                            let id = match ids.get(&gram) {
                                Some(&id) => id,
                                None => {
                                    let id = table.len() as NgramId;
                                    ids.insert(gram.clone(), id);
                                    table.push(gram);
                                    membership.push(Vec::new());
                                    id
                                }
                            };
                            membership[id as usize].push(next_file as FileId);
                        }
                        next_file += 1;
                    }
                },
            )
            .await?;
        debug_assert!(parked.is_empty());
        drop(ids);

        save_lines(&paths.ngram_table(n), table.iter().map(|g| g.to_string()))?;
        save_postings(&paths.ngram_index(n), &membership)?;
        info!(n, unique = table.len(), "n-gram index written");
        stats.push(NgramStats { n, unique: table.len(), written: table.len(), run });
    }
    Ok(stats)
}

/// Builds `<n>gramfreq.txt`: global occurrence counts, only n-grams seen at least twice.
pub async fn build_ngram_freq(paths: &CachePaths, max_n: usize, pipeline: &Pipeline) -> Result<Vec<NgramStats>> {
    validate_max_n(max_n)?;
    let dict = Arc::new(Dictionary::load(paths)?);
    let mut stats = Vec::new();

    for n in 2..=max_n {
        info!(n, files = dict.files.len(), "counting n-grams");
        let mut counts: HashMap<Ngram, u64> = HashMap::new();
        let encoder = dict.clone();
        let run = pipeline
            .run(
                dict.file_jobs(),
                move |path: PathBuf| encode_file(&encoder, &path).map(|seq| window_counts(&seq, n)),
                |_, outcome| {
                    if let Outcome::Done(local) = outcome {
                        for (gram, c) in local {
                            *counts.entry(gram).or_insert(0) += c;
                        }
                    }
                },
            )
            .await?;

        let unique = counts.len();
        let mut kept: Vec<(Ngram, u64)> = counts.into_iter().filter(|(_, c)| *c >= 2).collect();
        kept.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let path = paths.ngram_freq(n);
        let mut w = create_output(&path)?;
        for (gram, count) in &kept {
            writeln!(w, "{}", format_freq(gram, *count))?;
        }
        w.flush()?;
        info!(n, kept = kept.len(), unique, "n-gram frequency written");
        stats.push(NgramStats { n, unique, written: kept.len(), run });
    }
    Ok(stats)
}

/// Inverts `<n>gramindex.txt` into `<n>gramfiles.txt`. Orders without an index are skipped.
pub fn build_ngram_files(paths: &CachePaths, max_n: usize) -> Result<Vec<NgramStats>> {
    validate_max_n(max_n)?;
    let file_count = load_lines(&paths.files(), "tokens")?.len();
    let mut stats = Vec::new();

    for n in 2..=max_n {
        let index_path = paths.ngram_index(n);
        if !index_path.exists() {
            warn!(n, path = %index_path.display(), "no n-gram index for this order, skipping");
            continue;
        }
        let membership = load_postings(&index_path, "ngrams")?;
        let mut by_file: Vec<Vec<NgramId>> = vec![Vec::new(); file_count];
        for (gram, files) in membership.iter().enumerate() {
            for &f in files {
                let slot = by_file
                    .get_mut(f as usize)
                    .ok_or_else(|| TroveError::corrupt(&index_path, format!("n-gram {gram} references file {f}")))?;
                slot.push(gram as NgramId);
            }
        }
        save_postings(&paths.ngram_files(n), &by_file)?;
        info!(n, files = file_count, ngrams = membership.len(), "file to n-gram index written");
        stats.push(NgramStats { n, unique: membership.len(), written: file_count, run: RunSummary::default() });
    }
    Ok(stats)
}

/// One n-gram as read back from a cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NgramRecord {
    /// Present when read from the membership index.
    pub id: Option<NgramId>,
    pub ngram: Ngram,
    /// File count when `files` is present, occurrence count otherwise.
    pub count: u64,
    pub files: Option<FileSet>,
}

struct Ranked(NgramRecord);

impl Ranked {
    fn key(&self) -> (u64, Reverse<NgramId>) { (self.0.count, Reverse(self.0.id.unwrap_or(0))) }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool { self.key() == other.key() }
}
impl Eq for Ranked {}
impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}
impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering { self.key().cmp(&other.key()) }
}

fn check_words(path: &Path, ngram: &Ngram, word_count: usize) -> Result<()> {
    match ngram.ids().iter().find(|&&w| w as usize >= word_count) {
        Some(bad) => Err(TroveError::corrupt(path, format!("n-gram {ngram} references word {bad}"))),
        None => Ok(()),
    }
}

/// Reads the membership index of order `n`, keeping the `limit` n-grams present in
/// the most files (ties by lower ID; `limit == 0` keeps everything in ID order).
///
/// Returns `Ok(None)` when this order has no membership index. Word and file IDs
/// are checked against the table sizes.
pub fn load_with_files(
    paths: &CachePaths,
    n: usize,
    limit: usize,
    min_files: usize,
    word_count: usize,
    file_count: usize,
) -> Result<Option<Vec<NgramRecord>>> {
    let (table_path, index_path) = (paths.ngram_table(n), paths.ngram_index(n));
    if !table_path.exists() || !index_path.exists() {
        return Ok(None);
    }
    let table = open_prerequisite(&table_path, "ngrams")?;
    let index = open_prerequisite(&index_path, "ngrams")?;

    let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::new();
    let mut all: Vec<NgramRecord> = Vec::new();
    let (mut grams, mut postings) = (table.lines(), index.lines());
    for lineno in 0usize.. {
        let (gram_line, files_line) = match (grams.next(), postings.next()) {
            (None, None) => break,
            (Some(gram), Some(files)) => (gram?, files?),
            _ => {
                return Err(TroveError::corrupt(
                    &index_path,
                    format!("line {}: table and index lengths differ", lineno + 1),
                ))
            }
        };
        let ngram = Ngram::parse(&gram_line)
            .ok_or_else(|| TroveError::corrupt(&table_path, format!("line {}: bad n-gram", lineno + 1)))?;
        check_words(&table_path, &ngram, word_count)?;
        let (id, files) = parse_posting(&files_line)
            .ok_or_else(|| TroveError::corrupt(&index_path, format!("line {}: bad posting", lineno + 1)))?;
        if id as usize != lineno {
            return Err(TroveError::corrupt(&index_path, format!("line {} carries id {id}", lineno + 1)));
        }
        if let Some(&bad) = files.iter().find(|&&f| f as usize >= file_count) {
            return Err(TroveError::corrupt(&index_path, format!("n-gram {id} references file {bad}")));
        }
        if files.len() < min_files {
            continue;
        }
        let files = FileSet::from_unsorted(files);
        let record = NgramRecord { id: Some(id), ngram, count: files.len() as u64, files: Some(files) };
        if limit == 0 {
            all.push(record);
            continue;
        }
        heap.push(Reverse(Ranked(record)));
        if heap.len() > limit {
            heap.pop();
        }
    }
    if limit == 0 {
        return Ok(Some(all));
    }
    let mut ranked: Vec<Ranked> = heap.into_iter().map(|Reverse(r)| r).collect();
    ranked.sort_unstable_by(|a, b| b.cmp(a));
    Ok(Some(ranked.into_iter().map(|r| r.0).collect()))
}

/// Reads the first `limit` entries of `<n>gramfreq.txt` (`0` = all). `Ok(None)` if absent.
pub fn load_freq(paths: &CachePaths, n: usize, limit: usize, word_count: usize) -> Result<Option<Vec<NgramRecord>>> {
    let path = paths.ngram_freq(n);
    if !path.exists() {
        return Ok(None);
    }
    let reader = open_prerequisite(&path, "ngramfreq")?;
    let mut out = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        if limit > 0 && out.len() >= limit {
            break;
        }
        let line = line?;
        let (ngram, count) =
            parse_freq(&line).ok_or_else(|| TroveError::corrupt(&path, format!("line {}: bad entry", lineno + 1)))?;
        check_words(&path, &ngram, word_count)?;
        out.push(NgramRecord { id: None, ngram, count, files: None });
    }
    Ok(Some(out))
}

/// N-gram IDs of order `n` contained in `file`, from `<n>gramfiles.txt`.
pub fn load_file_ngrams(paths: &CachePaths, n: usize, file: FileId) -> Result<Option<Vec<NgramId>>> {
    let path = paths.ngram_files(n);
    let reader = open_prerequisite(&path, "ngramfiles")?;
    for (lineno, line) in reader.lines().enumerate() {
        if lineno != file as usize {
            continue;
        }
        let line = line?;
        let (_, ids) =
            parse_posting(&line).ok_or_else(|| TroveError::corrupt(&path, format!("line {}: bad posting", lineno + 1)))?;
        return Ok(Some(ids));
    }
    Ok(None)
}

pub fn load_ngram_table(paths: &CachePaths, n: usize) -> Result<Vec<Ngram>> {
    let path = paths.ngram_table(n);
    load_lines(&path, "ngrams")?
        .iter()
        .enumerate()
        .map(|(i, l)| Ngram::parse(l).ok_or_else(|| TroveError::corrupt(&path, format!("line {}: bad n-gram", i + 1))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_keep_first_occurrence_order() {
        let grams = distinct_windows(&[1, 2, 1, 2, 3], 2);
        assert_eq!(grams, vec![Ngram(vec![1, 2]), Ngram(vec![2, 1]), Ngram(vec![2, 3])]);
        assert!(distinct_windows(&[1], 2).is_empty());
    }

    #[test]
    fn window_counts_count_every_occurrence() {
        let counts = window_counts(&[1, 2, 1, 2], 2);
        assert_eq!(counts[&Ngram(vec![1, 2])], 2);
        assert_eq!(counts[&Ngram(vec![2, 1])], 1);
    }

    #[test]
    fn top_k_by_file_count() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CachePaths::new(dir.path());
        std::fs::write(paths.ngram_table(2), "0|1\n1|2\n2|3\n").unwrap();
        std::fs::write(paths.ngram_index(2), "0,[0]\n1,[0,1,2]\n2,[1,2]\n").unwrap();
        let top = load_with_files(&paths, 2, 2, 1, 4, 3).unwrap().unwrap();
        let ids: Vec<_> = top.iter().map(|r| r.id.unwrap()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(top[0].count, 3);

        let err = load_with_files(&paths, 2, 0, 1, 4, 2).unwrap_err();
        assert!(matches!(err, TroveError::Corrupt { .. }));
        assert!(load_with_files(&paths, 3, 10, 1, 4, 3).unwrap().is_none());
    }

    #[test]
    fn table_and_index_must_line_up() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CachePaths::new(dir.path());
        std::fs::write(paths.ngram_table(2), "0|1\n1|2\n2|3\n").unwrap();
        std::fs::write(paths.ngram_index(2), "0,[0]\n").unwrap();
        let err = load_with_files(&paths, 2, 0, 1, 4, 3).unwrap_err();
        assert!(matches!(err, TroveError::Corrupt { .. }));

        std::fs::write(paths.ngram_table(2), "0|1\n").unwrap();
        std::fs::write(paths.ngram_index(2), "0,[0]\n1,[1]\n").unwrap();
        assert!(matches!(load_with_files(&paths, 2, 5, 1, 4, 3), Err(TroveError::Corrupt { .. })));
    }
}
