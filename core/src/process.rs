//! Raw documents → normalized `.txt` tree, the input of the token cache.

use crate::dictionary::scan_files;
use crate::error::{Result, TroveError};
use crate::extract::{extension_of, ExtractError, Registry};
use crate::pipeline::{ItemError, Job, Outcome, Pipeline, RunSummary};
use crate::tokenizer::{normalize, NormalizeMode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProcessStats {
    pub converted: usize,
    /// Outputs that already existed and were left alone.
    pub skipped: usize,
    pub run: RunSummary,
}

enum Converted {
    Written,
    Skipped,
}

pub fn output_path(output: &Path, rel: &str) -> PathBuf { output.join(format!("{rel}.txt")) }

fn convert(
    registry: &Registry,
    src: &Path,
    dst: &Path,
    mode: NormalizeMode,
    replace: bool,
) -> std::result::Result<Converted, ItemError> {
    if !replace && dst.exists() {
        return Ok(Converted::Skipped);
    }
    let text = match registry.extract(src) {
        Ok(t) => t,
        Err(ExtractError::Unsupported(_)) => return Err(ItemError::Ignored("unsupported extension".into())),
        Err(e) => return Err(ItemError::Failed(format!("extraction error: {e}"))),
    };
    let out = normalize(&text, mode);
    if let Some(parent) = dst.parent() {
        create_dir_all(parent).map_err(|e| ItemError::Failed(format!("mkdir error: {e}")))?;
    }
    std::fs::write(dst, out).map_err(|e| ItemError::Failed(format!("write error: {e}")))?;
    Ok(Converted::Written)
}

/// Extracts and normalizes every non-hidden file under `input` into `output`.
///
/// Unsupported formats land in the pipeline's `ignored.txt`, everything else
/// that goes wrong in `errors.txt`; neither stops the run.
pub async fn run_process(
    input: &Path,
    output: &Path,
    mode: NormalizeMode,
    replace: bool,
    registry: Arc<Registry>,
    pipeline: &Pipeline,
) -> Result<ProcessStats> {
    if !input.is_dir() {
        return Err(TroveError::InvalidConfig(format!("input {} is not a directory", input.display())));
    }
    create_dir_all(output)?;
    let files = scan_files(input)?;
    info!(files = files.len(), input = %input.display(), output = %output.display(), ?mode, "processing documents");

    let jobs: Vec<Job<(PathBuf, PathBuf)>> = files
        .iter()
        .enumerate()
        .map(|(i, rel)| Job::new(i, input.join(rel).display().to_string(), (input.join(rel), output_path(output, rel))))
        .collect();

    let (mut converted, mut skipped) = (0, 0);
    let run = pipeline
        .run(
            jobs,
            move |(src, dst): (PathBuf, PathBuf)| convert(&registry, &src, &dst, mode, replace),
            |_, outcome| match outcome {
                Outcome::Done(Converted::Written) => converted += 1,
                Outcome::Done(Converted::Skipped) => skipped += 1,
                _ => {}
            },
        )
        .await?;
    let stats = ProcessStats { converted, skipped, run };

    info!(
        converted = stats.converted,
        skipped = stats.skipped,
        ignored = stats.run.ignored,
        failed = stats.run.failed,
        output = %output.display(),
        "processing finished"
    );
    Ok(stats)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionStatus {
    pub total: usize,
    pub converted: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStatus {
    /// Keyed by `.ext`, or `(no extension)`.
    pub by_extension: BTreeMap<String, ExtensionStatus>,
    pub total: ExtensionStatus,
}

/// Counts, per input extension, how many files already have an output.
pub fn conversion_status(input: &Path, output: &Path) -> Result<ConversionStatus> {
    if !input.is_dir() {
        return Err(TroveError::InvalidConfig(format!("input {} is not a directory", input.display())));
    }
    let mut status = ConversionStatus::default();
    for rel in scan_files(input)? {
        let ext = extension_of(Path::new(&rel));
        let key = if ext.is_empty() { "(no extension)".to_string() } else { format!(".{ext}") };
        let done = output_path(output, &rel).is_file();
        for slot in [status.by_extension.entry(key).or_default(), &mut status.total] {
            slot.total += 1;
            if done {
                slot.converted += 1;
            } else {
                slot.remaining += 1;
            }
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use std::fs;

    #[tokio::test]
    async fn converts_skips_and_ignores() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("raw"), dir.path().join("norm"));
        fs::create_dir_all(input.join("sub")).unwrap();
        fs::write(input.join("a.txt"), "Hello, World!").unwrap();
        fs::write(input.join("sub/b.html"), "<body><p>Café  menu</p></body>").unwrap();
        fs::write(input.join("c.pdf"), "%PDF-1.4").unwrap();

        let pipeline = Pipeline::new(PipelineConfig::default().with_workers(2).with_log_dir(&output));
        let registry = Arc::new(Registry::default());
        let stats = run_process(&input, &output, NormalizeMode::Lowercase, false, registry.clone(), &pipeline)
            .await
            .unwrap();
        assert_eq!(stats.converted, 2);
        assert_eq!(stats.run.ignored, 1);
        assert_eq!(fs::read_to_string(output.join("a.txt.txt")).unwrap(), "hello world");
        assert_eq!(fs::read_to_string(output.join("sub/b.html.txt")).unwrap(), "café menu");
        assert!(fs::read_to_string(output.join("ignored.txt")).unwrap().contains("c.pdf: unsupported extension"));

        let again = run_process(&input, &output, NormalizeMode::Lowercase, false, registry, &pipeline)
            .await
            .unwrap();
        assert_eq!(again.skipped, 2);
        assert_eq!(again.converted, 0);

        let status = conversion_status(&input, &output).unwrap();
        assert_eq!(status.total, ExtensionStatus { total: 3, converted: 2, remaining: 1 });
        assert_eq!(status.by_extension[".pdf"].remaining, 1);
    }
}
