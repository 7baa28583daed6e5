//! Read-only views over a built cache.

use crate::error::{Result, TroveError};
use crate::index::{FileId, Ngram};
use crate::ngram::{load_file_ngrams, load_freq, load_ngram_table};
use crate::persist::{count_lines, load_lines, load_meta, load_postings, load_settings, CachePaths, CACHE_VERSION};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

pub const SEARCH_WORD_LIMIT: usize = 20;
/// Only this many of the most frequent n-grams per order are searched.
pub const SEARCH_SCAN_PER_ORDER: usize = 500;
pub const SEARCH_HITS_PER_ORDER: usize = 10;

/// Word and file tables of one cache directory, loaded once.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub paths: CachePaths,
    pub words: Vec<String>,
    pub files: Vec<String>,
    pub source: Option<String>,
    /// When the token stage wrote `meta.json`, if it did.
    pub built_at: Option<String>,
    pub max_n: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub word_count: usize,
    pub file_count: usize,
    pub max_n: usize,
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_at: Option<String>,
    /// `"<n>gram"` → entries in that order's frequency table.
    pub ngram_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NgramRow {
    pub ngram: String,
    pub count: u64,
    pub words: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NgramPage {
    pub n: usize,
    pub total: usize,
    pub offset: usize,
    pub ngrams: Vec<NgramRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WordHit {
    pub index: usize,
    pub word: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhraseHit {
    pub words: Vec<String>,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub query: String,
    pub words: Vec<WordHit>,
    pub ngrams: BTreeMap<usize, Vec<PhraseHit>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePhrase {
    pub phrase: String,
    pub file_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNgrams {
    pub file_id: FileId,
    pub file: String,
    pub n: usize,
    pub phrases: Vec<FilePhrase>,
}

impl Corpus {
    pub fn open(root: impl AsRef<Path>, max_n: usize) -> Result<Self> {
        let paths = CachePaths::new(root);
        let words = load_lines(&paths.words(), "tokens")?;
        let files = load_lines(&paths.files(), "tokens")?;
        let source = load_settings(&paths).ok().map(|p| p.display().to_string());
        let built_at = match load_meta(&paths) {
            Ok(meta) => {
                if meta.version != CACHE_VERSION {
                    warn!(found = meta.version, expected = CACHE_VERSION, "cache written by another version");
                }
                Some(meta.created_at)
            }
            Err(TroveError::MissingPrerequisite { .. }) => None,
            Err(e) => return Err(e),
        };
        debug!(words = words.len(), files = files.len(), "corpus opened");
        Ok(Self { paths, words, files, source, built_at, max_n })
    }

    pub fn stats(&self) -> Stats {
        let ngram_counts = (2..=self.max_n)
            .map(|n| (format!("{n}gram"), count_lines(&self.paths.ngram_freq(n))))
            .collect();
        Stats {
            word_count: self.words.len(),
            file_count: self.files.len(),
            max_n: self.max_n,
            input: self.source.clone(),
            built_at: self.built_at.clone(),
            ngram_counts,
        }
    }

    /// Words of `ngram`; fails on IDs outside the word table.
    pub fn words_of(&self, ngram: &Ngram) -> Result<Vec<String>> {
        ngram
            .ids()
            .iter()
            .map(|&id| {
                self.words
                    .get(id as usize)
                    .cloned()
                    .ok_or_else(|| TroveError::corrupt(self.paths.words(), format!("no word {id}")))
            })
            .collect()
    }

    pub fn file_name(&self, id: FileId) -> Option<&str> { self.files.get(id as usize).map(String::as_str) }

    /// One page of the order-`n` frequency table. A missing table is an empty page.
    pub fn list_ngrams(&self, n: usize, limit: usize, offset: usize) -> Result<NgramPage> {
        let all = load_freq(&self.paths, n, 0, self.words.len())?.unwrap_or_default();
        let total = all.len();
        let mut ngrams = Vec::new();
        for record in all.into_iter().skip(offset).take(limit) {
            let words = self.words_of(&record.ngram)?;
            ngrams.push(NgramRow { ngram: words.join("|"), count: record.count, words });
        }
        Ok(NgramPage { n, total, offset, ngrams })
    }

    /// Case-insensitive substring search over words and frequent phrases.
    pub fn search(&self, query: &str) -> Result<SearchResult> {
        let needle = query.to_lowercase();
        let words = self
            .words
            .iter()
            .enumerate()
            .filter(|(_, w)| w.to_lowercase().contains(&needle))
            .take(SEARCH_WORD_LIMIT)
            .map(|(index, w)| WordHit { index, word: w.clone() })
            .collect();

        let mut ngrams = BTreeMap::new();
        for n in 2..=self.max_n {
            let Some(records) = load_freq(&self.paths, n, SEARCH_SCAN_PER_ORDER, self.words.len())? else { continue };
            let mut hits = Vec::new();
            for r in records {
                let words = self.words_of(&r.ngram)?;
                if words.join(" ").to_lowercase().contains(&needle) {
                    hits.push(PhraseHit { words, count: r.count });
                    if hits.len() >= SEARCH_HITS_PER_ORDER {
                        break;
                    }
                }
            }
            if !hits.is_empty() {
                ngrams.insert(n, hits);
            }
        }
        Ok(SearchResult { query: query.to_string(), words, ngrams })
    }

    /// Order-`n` phrases of `file` present in at least `min_files` files, most shared first.
    ///
    /// `Ok(None)` when the file ID is outside the file table.
    pub fn file_ngrams(&self, file: FileId, n: usize, min_files: usize) -> Result<Option<FileNgrams>> {
        let Some(name) = self.file_name(file) else { return Ok(None) };
        let Some(ids) = load_file_ngrams(&self.paths, n, file)? else { return Ok(None) };
        let table = load_ngram_table(&self.paths, n)?;
        let membership = load_postings(&self.paths.ngram_index(n), "ngrams")?;

        let mut phrases = Vec::new();
        for id in ids {
            let (Some(ngram), Some(files)) = (table.get(id as usize), membership.get(id as usize)) else {
                return Err(TroveError::corrupt(self.paths.ngram_files(n), format!("no n-gram {id}")));
            };
            if files.len() < min_files {
                continue;
            }
            phrases.push(FilePhrase { phrase: self.words_of(ngram)?.join(" "), file_count: files.len() });
        }
        phrases.sort_by(|a, b| b.file_count.cmp(&a.file_count).then_with(|| a.phrase.cmp(&b.phrase)));
        Ok(Some(FileNgrams { file_id: file, file: name.to_string(), n, phrases }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn corpus() -> (tempfile::TempDir, Corpus) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("uniq.txt"), "alpha\nbeta\ngamma\n").unwrap();
        fs::write(root.join("files.txt"), "a.txt\nb.txt\n").unwrap();
        fs::write(root.join("2gramfreq.txt"), "0|1,5\n1|2,3\n2|0,2\n").unwrap();
        let corpus = Corpus::open(root, 3).unwrap();
        (dir, corpus)
    }

    #[test]
    fn stats_count_frequency_lines() {
        let (_dir, c) = corpus();
        let s = c.stats();
        assert_eq!((s.word_count, s.file_count), (3, 2));
        assert_eq!(s.ngram_counts["2gram"], 3);
        assert_eq!(s.ngram_counts["3gram"], 0);
    }

    #[test]
    fn pages_and_search() {
        let (_dir, c) = corpus();
        let page = c.list_ngrams(2, 2, 1).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.ngrams[0].ngram, "beta|gamma");
        assert_eq!(page.ngrams.len(), 2);
        assert!(c.list_ngrams(3, 10, 0).unwrap().ngrams.is_empty());

        let hits = c.search("GAM").unwrap();
        assert_eq!(hits.words.len(), 1);
        assert_eq!(hits.ngrams[&2].len(), 2);
    }

    #[test]
    fn out_of_range_word_is_malformed() {
        let (dir, c) = corpus();
        fs::write(dir.path().join("2gramfreq.txt"), "0|9,5\n").unwrap();
        assert!(matches!(c.list_ngrams(2, 10, 0), Err(TroveError::Corrupt { .. })));
    }
}
