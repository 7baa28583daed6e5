use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\p{L}\p{N}\s]+").expect("valid regex");
    static ref SPACES: Regex = Regex::new(r"\s+").expect("valid regex");
}

/// How extracted text is rewritten before it lands in the normalized tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeMode {
    /// Extracted text as-is.
    #[default]
    Text,
    /// Letters, digits and single spaces only.
    Token,
    /// `Token`, lowercased.
    Lowercase,
}

impl std::str::FromStr for NormalizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(NormalizeMode::Text),
            "token" | "tokens" => Ok(NormalizeMode::Token),
            "lowercase" | "lower" => Ok(NormalizeMode::Lowercase),
            other => Err(format!("unknown normalize mode '{other}' (text, token, lowercase)")),
        }
    }
}

pub fn normalize(text: &str, mode: NormalizeMode) -> String {
    match mode {
        NormalizeMode::Text => text.to_string(),
        NormalizeMode::Token => clean_to_tokens(text),
        NormalizeMode::Lowercase => clean_to_tokens(text).to_lowercase(),
    }
}

/// NFKC, strip everything that is not a letter, digit or whitespace, collapse runs of whitespace.
fn clean_to_tokens(text: &str) -> String {
    let nfkc = text.nfkc().collect::<String>();
    let stripped = NON_WORD.replace_all(&nfkc, " ");
    SPACES.replace_all(&stripped, " ").trim().to_string()
}

/// The token stream every cache stage sees: whitespace-delimited, non-empty.
pub fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split_whitespace()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_mode_strips_punctuation() {
        let t = normalize("Hello,\tworld!\n\n  It's 2024.", NormalizeMode::Token);
        assert_eq!(t, "Hello world It s 2024");
    }

    #[test]
    fn text_mode_is_identity() {
        assert_eq!(normalize("a, b", NormalizeMode::Text), "a, b");
    }
}
