use crate::error::{Result, TroveError};
use crate::index::{format_id_list, parse_id_list, Ngram};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u32,
    pub created_at: String,
    pub word_count: usize,
    pub file_count: usize,
    pub source: String,
}

/// Locations of every artifact inside a cache directory.
#[derive(Debug, Clone)]
pub struct CachePaths {
    pub root: PathBuf,
}

impl CachePaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn words(&self) -> PathBuf { self.root.join("uniq.txt") }
    pub fn files(&self) -> PathBuf { self.root.join("files.txt") }
    pub fn settings(&self) -> PathBuf { self.root.join("settings.txt") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn word_index(&self) -> PathBuf { self.root.join("fileuniqindex.txt") }
    pub fn ngram_table(&self, n: usize) -> PathBuf { self.root.join(format!("uniq{n}gram.txt")) }
    pub fn ngram_index(&self, n: usize) -> PathBuf { self.root.join(format!("{n}gramindex.txt")) }
    pub fn ngram_freq(&self, n: usize) -> PathBuf { self.root.join(format!("{n}gramfreq.txt")) }
    pub fn ngram_files(&self, n: usize) -> PathBuf { self.root.join(format!("{n}gramfiles.txt")) }
}

/// Opens a file another stage is expected to have produced.
pub fn open_prerequisite(path: &Path, stage: &'static str) -> Result<BufReader<File>> {
    match File::open(path) {
        Ok(f) => Ok(BufReader::new(f)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(TroveError::MissingPrerequisite { path: path.to_path_buf(), stage })
        }
        Err(e) => Err(e.into()),
    }
}

pub fn create_output(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

pub fn save_settings(paths: &CachePaths, input: &Path) -> Result<()> {
    create_dir_all(&paths.root)?;
    std::fs::write(paths.settings(), format!("input={}\n", input.display()))?;
    Ok(())
}

pub fn load_settings(paths: &CachePaths) -> Result<PathBuf> {
    let path = paths.settings();
    let reader = open_prerequisite(&path, "tokens")?;
    for line in reader.lines() {
        let line = line?;
        if let Some(input) = line.strip_prefix("input=") {
            return Ok(PathBuf::from(input));
        }
    }
    Err(TroveError::corrupt(path, "no input= line"))
}

pub fn save_meta(paths: &CachePaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let json = serde_json::to_string_pretty(meta)?;
    std::fs::write(paths.meta(), json)?;
    Ok(())
}

pub fn load_meta(paths: &CachePaths) -> Result<MetaFile> {
    let reader = open_prerequisite(&paths.meta(), "tokens")?;
    Ok(serde_json::from_reader(reader)?)
}

/// One entry per line, line number = ID.
pub fn save_lines<I, S>(path: &Path, lines: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut w = create_output(path)?;
    for line in lines {
        w.write_all(line.as_ref().as_bytes())?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

pub fn load_lines(path: &Path, stage: &'static str) -> Result<Vec<String>> {
    let reader = open_prerequisite(path, stage)?;
    reader.lines().collect::<std::io::Result<Vec<_>>>().map_err(Into::into)
}

pub fn count_lines(path: &Path) -> usize {
    match File::open(path) {
        Ok(f) => BufReader::new(f).lines().count(),
        Err(_) => 0,
    }
}

/// `<id>,[a,b,c]`
pub fn format_posting(id: u32, ids: &[u32]) -> String {
    format!("{id},{}", format_id_list(ids))
}

pub fn parse_posting(line: &str) -> Option<(u32, Vec<u32>)> {
    let (head, list) = line.split_once(',')?;
    Some((head.trim().parse().ok()?, parse_id_list(list)?))
}

/// `a|b|c,<count>`
pub fn format_freq(ngram: &Ngram, count: u64) -> String {
    format!("{ngram},{count}")
}

pub fn parse_freq(line: &str) -> Option<(Ngram, u64)> {
    let (key, count) = line.rsplit_once(',')?;
    Some((Ngram::parse(key)?, count.trim().parse().ok()?))
}

/// Writes posting lines for IDs `0..lists.len()` in order.
pub fn save_postings(path: &Path, lists: &[Vec<u32>]) -> Result<()> {
    let mut w = create_output(path)?;
    for (id, ids) in lists.iter().enumerate() {
        writeln!(w, "{}", format_posting(id as u32, ids))?;
    }
    w.flush()?;
    Ok(())
}

/// Reads a posting file back, checking that line `i` carries ID `i`.
pub fn load_postings(path: &Path, stage: &'static str) -> Result<Vec<Vec<u32>>> {
    let reader = open_prerequisite(path, stage)?;
    let mut out = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let (id, ids) = parse_posting(&line)
            .ok_or_else(|| TroveError::corrupt(path, format!("line {}: unparsable posting", lineno + 1)))?;
        if id as usize != lineno {
            return Err(TroveError::corrupt(path, format!("line {} carries id {id}", lineno + 1)));
        }
        out.push(ids);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posting_lines() {
        assert_eq!(format_posting(3, &[0, 4]), "3,[0,4]");
        assert_eq!(parse_posting("3,[0,4]"), Some((3, vec![0, 4])));
        assert_eq!(parse_posting("7,[]"), Some((7, vec![])));
        assert_eq!(parse_posting("garbage"), None);
    }

    #[test]
    fn freq_lines() {
        let ng = Ngram(vec![5, 23]);
        assert_eq!(format_freq(&ng, 1547), "5|23,1547");
        assert_eq!(parse_freq("5|23,1547"), Some((ng, 1547)));
    }

    #[test]
    fn settings_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CachePaths::new(dir.path().join("cache"));
        match load_settings(&paths) {
            Err(TroveError::MissingPrerequisite { stage, .. }) => assert_eq!(stage, "tokens"),
            other => panic!("expected missing prerequisite, got {other:?}"),
        }
        save_settings(&paths, Path::new("/data/normalized")).unwrap();
        assert_eq!(load_settings(&paths).unwrap(), PathBuf::from("/data/normalized"));
    }

    #[test]
    fn postings_reject_out_of_order_ids() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.txt");
        std::fs::write(&p, "0,[1]\n2,[3]\n").unwrap();
        assert!(matches!(load_postings(&p, "index"), Err(TroveError::Corrupt { .. })));
    }
}
