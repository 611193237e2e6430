/// Context Searcher - phrase search over timed video subtitles
///
/// Parses SRT transcripts into sentences that remember which subtitle entries
/// they came from, keeps a search index of those sentences in step with the
/// video store, and maps search hits back onto highlighted subtitle entries.

pub mod config;
pub mod models;
pub mod subtitles;
pub mod store;
pub mod engine;
pub mod indexing;
pub mod search;

// Re-export main types for easy access
pub use crate::config::Config;
pub use crate::models::{
    EnglishVariety, IndexingInfo, IndexingStatus, SubtitleEntry, SubtitleSentence, TimeFrame,
    VideoFragment, VideoFragmentDocument, VideoFragmentPage, VideoRecord,
};
pub use crate::subtitles::{
    highlight, parse_srt, RangeMap, RegexSentenceDetector, SentenceDetector, SentenceExtractor,
};
pub use crate::store::{InMemoryVideoStore, SqliteVideoStore, VideoStore};
pub use crate::engine::{ElasticsearchEngine, InMemorySearchEngine, SearchEngine};
pub use crate::indexing::VideoIndexer;
pub use crate::search::VideoSearcher;

/// Result type for context searcher operations
pub type Result<T> = std::result::Result<T, ContextSearchError>;

/// Error types for context searcher operations
#[derive(thiserror::Error, Debug)]
pub enum ContextSearchError {
    #[error("Subtitle parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Indexing conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Highlighting error: {0}")]
    Highlighting(String),

    #[error("Bulk indexing failed: {0}")]
    BulkIndexing(String),

    #[error("Reindex job panicked: {0}")]
    JobPanicked(String),

    #[error("Search engine error: {0}")]
    SearchEngine(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ContextSearchError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Only an indexing conflict goes away by itself; everything else needs a fix first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
