pub mod analyze;
pub mod chain;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod extract;
pub mod index;
pub mod monitor;
pub mod ngram;
pub mod persist;
pub mod pipeline;
pub mod process;
pub mod query;
pub mod report;
pub mod tokenizer;
pub mod word_index;

pub use error::{Result, TroveError};
pub use index::{FileId, FileSet, Ngram, NgramId, WordId};
