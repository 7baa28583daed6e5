use crate::dictionary::{read_text, Dictionary};
use crate::error::{Result, TroveError};
use crate::index::{FileId, FileSet, WordId};
use crate::persist::{load_postings, save_postings, CachePaths};
use crate::pipeline::{ItemError, Outcome, Pipeline, RunSummary};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct WordIndexStats {
    pub words: usize,
    /// Words that matched at least one file.
    pub mapped: usize,
    pub run: RunSummary,
}

/// Rebuilds `fileuniqindex.txt`: for every word ID, the sorted IDs of files containing it.
pub async fn build_word_index(paths: &CachePaths, pipeline: &Pipeline) -> Result<WordIndexStats> {
    let dict = Arc::new(Dictionary::load(paths)?);
    info!(files = dict.files.len(), "scanning files for word occurrences");

    let mut postings: Vec<Vec<FileId>> = vec![Vec::new(); dict.words.len()];
    let encoder = dict.clone();
    let run = pipeline
        .run(
            dict.file_jobs(),
            move |path: PathBuf| -> std::result::Result<Vec<WordId>, ItemError> {
                let text = read_text(&path)?;
                let mut ids = encoder.encode(&text);
                ids.sort_unstable();
                ids.dedup();
                Ok(ids)
            },
            |file, outcome| {
                if let Outcome::Done(ids) = outcome {
                    for id in ids {
                        postings[id as usize].push(file as FileId);
                    }
                }
            },
        )
        .await?;

    let mut mapped = 0;
    for list in postings.iter_mut() {
        list.sort_unstable();
        if !list.is_empty() {
            mapped += 1;
        }
    }
    save_postings(&paths.word_index(), &postings)?;
    info!(words = postings.len(), mapped, path = %paths.word_index().display(), "word index written");
    Ok(WordIndexStats { words: postings.len(), mapped, run })
}

/// Reads `fileuniqindex.txt`, checking every file ID against the file table size.
pub fn load_word_index(paths: &CachePaths, file_count: usize) -> Result<Vec<FileSet>> {
    let path = paths.word_index();
    let lists = load_postings(&path, "index")?;
    lists
        .into_iter()
        .enumerate()
        .map(|(word, ids)| {
            if let Some(&bad) = ids.iter().find(|&&f| f as usize >= file_count) {
                return Err(TroveError::corrupt(&path, format!("word {word} references file {bad}")));
            }
            Ok(FileSet::from_unsorted(ids))
        })
        .collect()
}
