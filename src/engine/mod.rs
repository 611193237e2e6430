pub mod elastic;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::models::{EnglishVariety, VideoFragmentDocument};
use crate::Result;

pub use elastic::ElasticsearchEngine;
pub use memory::InMemorySearchEngine;

pub const YOUTUBE_VIDEO_ID_FIELD: &str = "youtube_video_id";
pub const SENTENCE_FIELD: &str = "sentence";
pub const VARIETY_FIELD: &str = "variety";
pub const ENTRY_RANGE_MAP_FIELD: &str = "entry_range_map";
pub const SENTENCE_POSITION_FIELD: &str = "sentence_position";

/// How a document field is indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Exact-match term
    Keyword,
    /// Analyzed full text
    Text,
    /// Kept in the source document only
    Stored,
    /// Stored number, not searchable
    StoredInteger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub fields: Vec<(String, FieldKind)>,
}

impl IndexSchema {
    /// Fields of a sentence document
    pub fn video_fragments() -> Self {
        Self {
            fields: vec![
                (YOUTUBE_VIDEO_ID_FIELD.to_string(), FieldKind::Keyword),
                (SENTENCE_FIELD.to_string(), FieldKind::Text),
                (VARIETY_FIELD.to_string(), FieldKind::Keyword),
                (ENTRY_RANGE_MAP_FIELD.to_string(), FieldKind::Stored),
                (SENTENCE_POSITION_FIELD.to_string(), FieldKind::StoredInteger),
            ],
        }
    }

    pub fn kind_of(&self, field: &str) -> Option<FieldKind> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, kind)| *kind)
    }
}

/// Outcome of one bulk request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub took_ms: u64,
    pub items: usize,
    /// Reasons for the documents that were rejected
    pub failures: Vec<String>,
}

impl BulkResponse {
    pub fn has_errors(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// A phrase query over sentence documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentQuery {
    pub phrase: String,
    pub variety: EnglishVariety,
    pub from: usize,
    pub size: usize,
}

impl FragmentQuery {
    pub fn new(phrase: impl Into<String>, variety: EnglishVariety, from: usize, size: usize) -> Self {
        Self {
            phrase: phrase.into(),
            variety,
            from,
            size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: VideoFragmentDocument,
    /// The whole sentence with matches wrapped in `<em>`/`</em>`
    pub highlight: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

/// Search index holding sentence documents.
///
/// Index arguments accept either a physical index name or an alias.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool>;

    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<()>;

    /// Deleting a missing index is not an error
    async fn delete_index(&self, index: &str) -> Result<()>;

    async fn bulk_write(
        &self,
        index: &str,
        documents: &[VideoFragmentDocument],
    ) -> Result<BulkResponse>;

    /// Returns the number of deleted documents
    async fn delete_by_field(&self, index: &str, field: &str, value: &str) -> Result<u64>;

    /// Points `alias` at `index`, detaching it from any other index in the same step
    async fn put_alias(&self, index: &str, alias: &str) -> Result<()>;

    async fn aliased_index_name(&self, alias: &str) -> Result<Option<String>>;

    async fn index_metadata(&self, index: &str) -> Result<HashMap<String, Value>>;

    async fn set_index_metadata(&self, index: &str, metadata: HashMap<String, Value>) -> Result<()>;

    async fn search(&self, index: &str, query: &FragmentQuery) -> Result<SearchResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_fragment_schema() {
        let schema = IndexSchema::video_fragments();

        assert_eq!(schema.kind_of(SENTENCE_FIELD), Some(FieldKind::Text));
        assert_eq!(schema.kind_of(VARIETY_FIELD), Some(FieldKind::Keyword));
        assert_eq!(schema.kind_of(YOUTUBE_VIDEO_ID_FIELD), Some(FieldKind::Keyword));
        assert_eq!(schema.kind_of(ENTRY_RANGE_MAP_FIELD), Some(FieldKind::Stored));
        assert_eq!(schema.kind_of("unknown"), None);
    }

    #[test]
    fn test_bulk_errors() {
        assert!(!BulkResponse::default().has_errors());
        let failed = BulkResponse {
            failures: vec!["mapper_parsing_exception".to_string()],
            ..Default::default()
        };
        assert!(failed.has_errors());
    }
}
