//! Token cache: the word table and file table every later stage keys off.

use crate::error::{Result, TroveError};
use crate::index::{FileId, WordId};
use crate::persist::{load_lines, load_settings, save_lines, save_meta, save_settings, CachePaths, MetaFile, CACHE_VERSION};
use crate::pipeline::{ItemError, Job, Outcome, Pipeline, RunSummary};
use crate::tokenizer::words;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};
use walkdir::{DirEntry, WalkDir};

/// Word table, file table and the directory the file table is relative to.
#[derive(Debug, Clone)]
pub struct Dictionary {
    pub words: Vec<String>,
    pub files: Vec<String>,
    pub source: PathBuf,
    lookup: HashMap<String, WordId>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DictionaryStats {
    pub words: usize,
    pub files: usize,
    pub run: RunSummary,
}

impl Dictionary {
    pub fn new(words: Vec<String>, files: Vec<String>, source: PathBuf) -> Self {
        let lookup = words.iter().enumerate().map(|(i, w)| (w.clone(), i as WordId)).collect();
        Self { words, files, source, lookup }
    }

    pub fn load(paths: &CachePaths) -> Result<Self> {
        let source = load_settings(paths)?;
        let words = load_lines(&paths.words(), "tokens")?;
        let files = load_lines(&paths.files(), "tokens")?;
        info!(words = words.len(), files = files.len(), source = %source.display(), "loaded dictionary");
        Ok(Self::new(words, files, source))
    }

    pub fn word_id(&self, word: &str) -> Option<WordId> { self.lookup.get(word).copied() }

    pub fn word(&self, id: WordId) -> Option<&str> { self.words.get(id as usize).map(String::as_str) }

    pub fn file(&self, id: FileId) -> Option<&str> { self.files.get(id as usize).map(String::as_str) }

    /// Word IDs of `text` in order; words outside the dictionary are dropped.
    pub fn encode(&self, text: &str) -> Vec<WordId> {
        words(text).filter_map(|w| self.word_id(w)).collect()
    }

    /// One job per file in the file table, carrying its absolute path.
    pub fn file_jobs(&self) -> Vec<Job<PathBuf>> {
        self.files
            .iter()
            .enumerate()
            .map(|(i, rel)| Job::new(i, rel.clone(), self.source.join(rel)))
            .collect()
    }
}

/// Reads a file as text, replacing invalid UTF-8 rather than failing.
pub fn read_text(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

/// Relative, `/`-separated paths of every non-hidden file under `root`, sorted by name per directory.
pub fn scan_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if rel.contains('\n') {
            warn!(path = %entry.path().display(), "skipping file with newline in its name");
            continue;
        }
        files.push(rel);
    }
    Ok(files)
}

fn unique_words(path: &Path) -> std::result::Result<HashSet<String>, ItemError> {
    let text = read_text(path)?;
    Ok(words(&text).map(str::to_string).collect())
}

/// Scans `input`, then writes `uniq.txt`, `files.txt`, `settings.txt` and `meta.json`.
///
/// Files that cannot be read keep their file ID and are logged; the stage carries on.
pub async fn build_token_cache(input: &Path, paths: &CachePaths, pipeline: &Pipeline) -> Result<DictionaryStats> {
    if !input.is_dir() {
        return Err(TroveError::InvalidConfig(format!("input {} is not a directory", input.display())));
    }
    create_dir_all(&paths.root)?;
    let source = input.canonicalize()?;
    save_settings(paths, &source)?;

    let files = scan_files(&source)?;
    info!(files = files.len(), input = %source.display(), "building token cache");

    let jobs: Vec<Job<PathBuf>> = files
        .iter()
        .enumerate()
        .map(|(i, rel)| Job::new(i, rel.clone(), source.join(rel)))
        .collect();
    let mut unique: HashSet<String> = HashSet::new();
    let run = pipeline
        .run(jobs, |path: PathBuf| unique_words(&path), |_, outcome| {
            if let Outcome::Done(set) = outcome {
                unique.extend(set);
            }
        })
        .await?;

    let mut sorted: Vec<String> = unique.into_iter().collect();
    sorted.sort_unstable();
    save_lines(&paths.words(), &sorted)?;
    save_lines(&paths.files(), &files)?;
    let meta = MetaFile {
        version: CACHE_VERSION,
        created_at: time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        word_count: sorted.len(),
        file_count: files.len(),
        source: source.display().to_string(),
    };
    save_meta(paths, &meta)?;

    info!(words = sorted.len(), files = files.len(), failed = run.failed, "token cache written");
    Ok(DictionaryStats { words: sorted.len(), files: files.len(), run })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_skips_hidden_entries_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/.git")).unwrap();
        fs::write(root.join("b/.git/HEAD"), "ref").unwrap();
        fs::write(root.join("b/z.txt"), "z").unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join(".DS_Store"), "junk").unwrap();
        let files = scan_files(root).unwrap();
        assert_eq!(files, vec!["a.txt".to_string(), "b/z.txt".to_string()]);
    }

    #[test]
    fn encode_drops_unknown_words() {
        let dict = Dictionary::new(vec!["a".into(), "c".into()], vec![], PathBuf::new());
        assert_eq!(dict.encode("a b c a"), vec![0, 1, 0]);
        assert_eq!(dict.word(1), Some("c"));
        assert_eq!(dict.word(2), None);
    }
}
