use serde::{Deserialize, Serialize};
use std::fmt;

pub type WordId = u32;
pub type FileId = u32;
pub type NgramId = u32;

/// Ordered tuple of word IDs. Persisted as `a|b|c`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ngram(pub Vec<WordId>);

impl Ngram {
    pub fn order(&self) -> usize { self.0.len() }

    pub fn ids(&self) -> &[WordId] { &self.0 }

    pub fn parse(s: &str) -> Option<Ngram> {
        let ids = s
            .split('|')
            .map(|part| part.trim().parse::<WordId>().ok())
            .collect::<Option<Vec<_>>>()?;
        if ids.is_empty() { None } else { Some(Ngram(ids)) }
    }
}

impl fmt::Display for Ngram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 { f.write_str("|")?; }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// Sorted, deduplicated set of file IDs. Persisted as `[1,2,3]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSet(Vec<FileId>);

impl FileSet {
    pub fn from_unsorted(mut ids: Vec<FileId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        FileSet(ids)
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn as_slice(&self) -> &[FileId] { &self.0 }

    /// Merge-style intersection of two sorted sets.
    pub fn intersect(&self, other: &FileSet) -> FileSet {
        let (a, b) = (&self.0, &other.0);
        let mut out = Vec::with_capacity(a.len().min(b.len()));
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    out.push(a[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        FileSet(out)
    }

    pub fn intersection_len(&self, other: &FileSet) -> usize {
        let (a, b) = (&self.0, &other.0);
        let (mut i, mut j, mut n) = (0, 0, 0);
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    n += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        n
    }
}

impl fmt::Display for FileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_id_list(&self.0))
    }
}

/// `[1,2,3]`, the bracketed list used by every posting-style cache file.
pub fn format_id_list(ids: &[u32]) -> String {
    let mut s = String::with_capacity(ids.len() * 4 + 2);
    s.push('[');
    for (i, id) in ids.iter().enumerate() {
        if i > 0 { s.push(','); }
        s.push_str(&id.to_string());
    }
    s.push(']');
    s
}

pub fn parse_id_list(s: &str) -> Option<Vec<u32>> {
    let inner = s.trim().strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    inner.split(',').map(|p| p.trim().parse::<u32>().ok()).collect()
}
