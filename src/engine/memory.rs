use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    BulkResponse, FieldKind, FragmentQuery, IndexSchema, SearchEngine, SearchHit, SearchResponse,
    SENTENCE_FIELD, VARIETY_FIELD, YOUTUBE_VIDEO_ID_FIELD,
};
use crate::models::VideoFragmentDocument;
use crate::{ContextSearchError, Result};

struct MemoryIndex {
    schema: IndexSchema,
    documents: Vec<VideoFragmentDocument>,
    metadata: HashMap<String, Value>,
}

#[derive(Default)]
struct EngineState {
    indices: BTreeMap<String, MemoryIndex>,
    aliases: HashMap<String, String>,
    /// Size of every accepted bulk request, in order
    batches: Vec<usize>,
    /// Reject bulk requests once this many have been accepted
    fail_bulk_after: Option<usize>,
}

impl EngineState {
    fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    fn index(&self, name: &str) -> Result<&MemoryIndex> {
        self.indices
            .get(self.resolve(name))
            .ok_or_else(|| ContextSearchError::SearchEngine(format!("no such index [{}]", name)))
    }

    fn index_mut(&mut self, name: &str) -> Result<&mut MemoryIndex> {
        let resolved = self.resolve(name).to_string();
        self.indices
            .get_mut(&resolved)
            .ok_or_else(|| ContextSearchError::SearchEngine(format!("no such index [{}]", name)))
    }
}

/// Search engine that keeps indices in process memory.
///
/// Phrase matching works on lowercase word tokens, which is close enough to
/// what a standard analyzer does for tests and small embedded setups.
#[derive(Default)]
pub struct InMemorySearchEngine {
    state: RwLock<EngineState>,
}

impl InMemorySearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every bulk request after the first `accepted` ones report failures
    pub async fn fail_bulk_after(&self, accepted: usize) {
        self.state.write().await.fail_bulk_after = Some(accepted);
    }

    pub async fn documents(&self, index: &str) -> Vec<VideoFragmentDocument> {
        let state = self.state.read().await;
        state
            .index(index)
            .map(|index| index.documents.clone())
            .unwrap_or_default()
    }

    pub async fn index_names(&self) -> Vec<String> {
        self.state.read().await.indices.keys().cloned().collect()
    }

    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.state.read().await.batches.clone()
    }
}

fn field_value<'a>(document: &'a VideoFragmentDocument, field: &str) -> Option<&'a str> {
    match field {
        YOUTUBE_VIDEO_ID_FIELD => Some(&document.youtube_video_id),
        VARIETY_FIELD => Some(document.variety.as_str()),
        SENTENCE_FIELD => Some(&document.sentence),
        _ => None,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

/// Lowercase word tokens with their char spans
fn tokenize(text: &str) -> Vec<(String, Range<usize>)> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if !is_word_char(chars[i]) {
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() {
            let inner_apostrophe = matches!(chars[i], '\'' | '’')
                && chars.get(i + 1).copied().is_some_and(is_word_char);
            if !is_word_char(chars[i]) && !inner_apostrophe {
                break;
            }
            i += 1;
        }

        let token: String = chars[start..i].iter().collect();
        tokens.push((token.to_lowercase(), start..i));
    }

    tokens
}

/// Wrap every token of every phrase occurrence in `<em>` tags
fn highlight_phrase(sentence: &str, phrase: &[String]) -> Option<String> {
    if phrase.is_empty() {
        return None;
    }

    let tokens = tokenize(sentence);
    if tokens.len() < phrase.len() {
        return None;
    }

    let mut matched = vec![false; tokens.len()];
    for start in 0..=tokens.len() - phrase.len() {
        let window = &tokens[start..start + phrase.len()];
        if window.iter().zip(phrase).all(|((token, _), word)| token == word) {
            matched[start..start + phrase.len()].fill(true);
        }
    }
    if !matched.contains(&true) {
        return None;
    }

    let mut starts = vec![false; sentence.chars().count() + 1];
    let mut ends = starts.clone();
    for ((_, span), _) in tokens.iter().zip(&matched).filter(|(_, hit)| **hit) {
        starts[span.start] = true;
        ends[span.end] = true;
    }

    let mut highlighted = String::with_capacity(sentence.len() + 16);
    for (offset, c) in sentence.chars().enumerate() {
        if ends[offset] {
            highlighted.push_str("</em>");
        }
        if starts[offset] {
            highlighted.push_str("<em>");
        }
        highlighted.push(c);
    }
    if ends[ends.len() - 1] {
        highlighted.push_str("</em>");
    }

    Some(highlighted)
}

#[async_trait]
impl SearchEngine for InMemorySearchEngine {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.indices.contains_key(state.resolve(index)))
    }

    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<()> {
        let mut state = self.state.write().await;
        if state.indices.contains_key(index) || state.aliases.contains_key(index) {
            return Err(ContextSearchError::SearchEngine(format!(
                "resource_already_exists_exception: [{}]",
                index
            )));
        }

        state.indices.insert(
            index.to_string(),
            MemoryIndex {
                schema: schema.clone(),
                documents: Vec::new(),
                metadata: HashMap::new(),
            },
        );
        debug!("📂 Created in-memory index {}", index);
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let resolved = state.resolve(index).to_string();
        if state.indices.remove(&resolved).is_some() {
            state.aliases.retain(|_, target| *target != resolved);
            debug!("🗑️  Deleted in-memory index {}", resolved);
        }
        Ok(())
    }

    async fn bulk_write(
        &self,
        index: &str,
        documents: &[VideoFragmentDocument],
    ) -> Result<BulkResponse> {
        let started = Instant::now();
        let mut state = self.state.write().await;

        if state
            .fail_bulk_after
            .is_some_and(|accepted| state.batches.len() >= accepted)
        {
            return Ok(BulkResponse {
                took_ms: 0,
                items: documents.len(),
                failures: documents
                    .iter()
                    .map(|document| {
                        format!("rejected document of video {}", document.youtube_video_id)
                    })
                    .collect(),
            });
        }

        let target = state.index_mut(index)?;
        target.documents.extend_from_slice(documents);
        state.batches.push(documents.len());

        Ok(BulkResponse {
            took_ms: started.elapsed().as_millis() as u64,
            items: documents.len(),
            failures: Vec::new(),
        })
    }

    async fn delete_by_field(&self, index: &str, field: &str, value: &str) -> Result<u64> {
        let mut state = self.state.write().await;
        let target = state.index_mut(index)?;
        if !matches!(
            target.schema.kind_of(field),
            Some(FieldKind::Keyword | FieldKind::Text)
        ) {
            return Err(ContextSearchError::SearchEngine(format!(
                "field [{}] is not searchable",
                field
            )));
        }

        let before = target.documents.len();
        target
            .documents
            .retain(|document| field_value(document, field) != Some(value));

        Ok((before - target.documents.len()) as u64)
    }

    async fn put_alias(&self, index: &str, alias: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.indices.contains_key(index) {
            return Err(ContextSearchError::SearchEngine(format!(
                "no such index [{}]",
                index
            )));
        }
        if state.indices.contains_key(alias) {
            return Err(ContextSearchError::SearchEngine(format!(
                "an index exists with the same name as the alias [{}]",
                alias
            )));
        }

        state.aliases.insert(alias.to_string(), index.to_string());
        Ok(())
    }

    async fn aliased_index_name(&self, alias: &str) -> Result<Option<String>> {
        Ok(self.state.read().await.aliases.get(alias).cloned())
    }

    async fn index_metadata(&self, index: &str) -> Result<HashMap<String, Value>> {
        let state = self.state.read().await;
        Ok(state.index(index)?.metadata.clone())
    }

    async fn set_index_metadata(&self, index: &str, metadata: HashMap<String, Value>) -> Result<()> {
        let mut state = self.state.write().await;
        state.index_mut(index)?.metadata.extend(metadata);
        Ok(())
    }

    async fn search(&self, index: &str, query: &FragmentQuery) -> Result<SearchResponse> {
        let state = self.state.read().await;
        let target = state.index(index)?;
        let phrase: Vec<String> = tokenize(&query.phrase)
            .into_iter()
            .map(|(token, _)| token)
            .collect();

        let hits: Vec<SearchHit> = target
            .documents
            .iter()
            .filter(|document| query.variety.is_wildcard() || document.variety == query.variety)
            .filter_map(|document| {
                highlight_phrase(&document.sentence, &phrase).map(|highlight| SearchHit {
                    document: document.clone(),
                    highlight: Some(highlight),
                })
            })
            .collect();

        Ok(SearchResponse {
            total: hits.len() as u64,
            hits: hits.into_iter().skip(query.from).take(query.size).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnglishVariety;
    use crate::subtitles::RangeMap;

    fn document(youtube_video_id: &str, variety: EnglishVariety, sentence: &str) -> VideoFragmentDocument {
        VideoFragmentDocument {
            youtube_video_id: youtube_video_id.to_string(),
            variety,
            sentence: sentence.to_string(),
            entry_range_map: RangeMap::from_iter([(0..sentence.chars().count(), 0)]),
            sentence_position: 0,
        }
    }

    fn phrase(text: &str) -> Vec<String> {
        tokenize(text).into_iter().map(|(token, _)| token).collect()
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("It won't—be “fine”, Ça?");
        let words: Vec<&str> = tokens.iter().map(|(token, _)| token.as_str()).collect();
        assert_eq!(words, vec!["it", "won't", "be", "fine", "ça"]);
        assert_eq!(tokens[4].1, 20..22);
    }

    #[test]
    fn test_highlight_phrase() {
        assert_eq!(
            highlight_phrase("And the left over the end", &phrase("the")).unwrap(),
            "And <em>the</em> left over <em>the</em> end"
        );
        assert_eq!(
            highlight_phrase("The big dog. the big", &phrase("the big")).unwrap(),
            "<em>The</em> <em>big</em> dog. <em>the</em> <em>big</em>"
        );
        assert!(highlight_phrase("nothing here", &phrase("the")).is_none());
        assert!(highlight_phrase("big the", &phrase("the big")).is_none());
    }

    #[tokio::test]
    async fn test_aliases_and_metadata() {
        let engine = InMemorySearchEngine::new();
        let schema = IndexSchema::video_fragments();
        engine.create_index("videos_1", &schema).await.unwrap();
        engine.create_index("videos_2", &schema).await.unwrap();
        assert!(engine.create_index("videos_1", &schema).await.is_err());

        assert!(!engine.index_exists("videos").await.unwrap());
        engine.put_alias("videos_1", "videos").await.unwrap();
        assert!(engine.index_exists("videos").await.unwrap());
        engine.put_alias("videos_2", "videos").await.unwrap();
        assert_eq!(
            engine.aliased_index_name("videos").await.unwrap().as_deref(),
            Some("videos_2")
        );

        let metadata = HashMap::from([("start_time".to_string(), Value::from("now"))]);
        engine.set_index_metadata("videos", metadata.clone()).await.unwrap();
        assert_eq!(engine.index_metadata("videos_2").await.unwrap(), metadata);

        engine.delete_index("videos_2").await.unwrap();
        assert_eq!(engine.aliased_index_name("videos").await.unwrap(), None);
        engine.delete_index("videos_2").await.unwrap();
        assert_eq!(engine.index_names().await, vec!["videos_1"]);
    }

    #[tokio::test]
    async fn test_search_filters_and_pages() {
        let engine = InMemorySearchEngine::new();
        engine
            .create_index("videos_1", &IndexSchema::video_fragments())
            .await
            .unwrap();
        engine
            .bulk_write(
                "videos_1",
                &[
                    document("a", EnglishVariety::Uk, "Over the moon."),
                    document("b", EnglishVariety::Us, "Over the hill."),
                    document("c", EnglishVariety::Uk, "Under the sea."),
                    document("d", EnglishVariety::Uk, "Over and out."),
                ],
            )
            .await
            .unwrap();

        let all = engine
            .search("videos_1", &FragmentQuery::new("over THE", EnglishVariety::All, 0, 10))
            .await
            .unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(
            all.hits[0].highlight.as_deref(),
            Some("<em>Over</em> <em>the</em> moon.")
        );

        let uk = engine
            .search("videos_1", &FragmentQuery::new("the", EnglishVariety::Uk, 1, 1))
            .await
            .unwrap();
        assert_eq!(uk.total, 2);
        assert_eq!(uk.hits.len(), 1);
        assert_eq!(uk.hits[0].document.youtube_video_id, "c");
    }

    #[tokio::test]
    async fn test_delete_by_field() {
        let engine = InMemorySearchEngine::new();
        engine
            .create_index("videos_1", &IndexSchema::video_fragments())
            .await
            .unwrap();
        engine
            .bulk_write(
                "videos_1",
                &[
                    document("a", EnglishVariety::Uk, "One."),
                    document("a", EnglishVariety::Uk, "Two."),
                    document("b", EnglishVariety::Uk, "Three."),
                ],
            )
            .await
            .unwrap();

        let deleted = engine
            .delete_by_field("videos_1", YOUTUBE_VIDEO_ID_FIELD, "a")
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(engine.documents("videos_1").await.len(), 1);
        assert!(engine
            .delete_by_field("videos_1", "entry_range_map", "x")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_injected_bulk_failure() {
        let engine = InMemorySearchEngine::new();
        engine
            .create_index("videos_1", &IndexSchema::video_fragments())
            .await
            .unwrap();
        engine.fail_bulk_after(1).await;

        let first = engine
            .bulk_write("videos_1", &[document("a", EnglishVariety::Uk, "One.")])
            .await
            .unwrap();
        assert!(!first.has_errors());

        let second = engine
            .bulk_write("videos_1", &[document("b", EnglishVariety::Uk, "Two.")])
            .await
            .unwrap();
        assert!(second.has_errors());
        assert_eq!(engine.documents("videos_1").await.len(), 1);
        assert_eq!(engine.batch_sizes().await, vec![1]);
    }
}
