//! Document text extraction adapters.

use crate::dictionary::read_text;
use scraper::{Html, Node, Selector};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file extension: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait Extractor: Send + Sync {
    /// Lowercase extensions this adapter handles, without the dot.
    fn extensions(&self) -> &[&'static str];

    fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

/// Formats that are already text.
pub struct PlainText;

impl Extractor for PlainText {
    fn extensions(&self) -> &[&'static str] { &["txt", "md", "csv", "tsv", "log", "json", "xml"] }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> { Ok(read_text(path)?) }
}

/// Visible body text of an HTML page; script and style contents are dropped.
pub struct HtmlText;

impl HtmlText {
    pub fn text_of(html: &str) -> Result<String, ExtractError> {
        let doc = Html::parse_document(html);
        let body = Selector::parse("body").map_err(|e| ExtractError::Failed(format!("selector: {e}")))?;
        let root = doc.select(&body).next().unwrap_or_else(|| doc.root_element());
        let mut out = String::new();
        for node in root.descendants() {
            let Node::Text(text) = node.value() else { continue };
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| matches!(e.name(), "script" | "style" | "noscript")))
                .unwrap_or(false);
            if hidden {
                continue;
            }
            let t = text.trim();
            if !t.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(t);
            }
        }
        Ok(out)
    }
}

impl Extractor for HtmlText {
    fn extensions(&self) -> &[&'static str] { &["html", "htm"] }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> { Self::text_of(&read_text(path)?) }
}

/// Dispatches on file extension.
pub struct Registry {
    adapters: Vec<Box<dyn Extractor>>,
}

impl Default for Registry {
    fn default() -> Self { Self::empty().with(Box::new(PlainText)).with(Box::new(HtmlText)) }
}

impl Registry {
    pub fn empty() -> Self { Self { adapters: Vec::new() } }

    pub fn with(mut self, adapter: Box<dyn Extractor>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn supports(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.adapters.iter().any(|a| a.extensions().contains(&ext.as_str()))
    }

    pub fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let ext = extension_of(path);
        let adapter = self
            .adapters
            .iter()
            .find(|a| a.extensions().contains(&ext.as_str()))
            .ok_or_else(|| ExtractError::Unsupported(if ext.is_empty() { "(none)".into() } else { format!(".{ext}") }))?;
        adapter.extract(path)
    }
}

/// Lowercased extension without the dot, empty if none.
pub fn extension_of(path: &Path) -> String {
    path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_body_text_without_scripts() {
        let html = "<html><head><title>T</title><style>p{}</style></head>\
                    <body><p>Hello <b>there</b></p><script>var x = 1;</script><div>world</div></body></html>";
        assert_eq!(HtmlText::text_of(html).unwrap(), "Hello there world");
    }

    #[test]
    fn registry_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("a.TXT");
        std::fs::write(&txt, "plain words").unwrap();
        let reg = Registry::default();
        assert_eq!(reg.extract(&txt).unwrap(), "plain words");
        assert!(reg.supports("htm"));

        let pdf = dir.path().join("b.pdf");
        std::fs::write(&pdf, "%PDF").unwrap();
        match reg.extract(&pdf) {
            Err(ExtractError::Unsupported(ext)) => assert_eq!(ext, ".pdf"),
            other => panic!("expected unsupported, got {other:?}"),
        }
    }
}
