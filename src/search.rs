use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::engine::{FragmentQuery, SearchEngine, SearchHit};
use crate::models::{EnglishVariety, VideoFragment, VideoFragmentPage};
use crate::store::VideoStore;
use crate::subtitles::{highlight, split_highlight};
use crate::{ContextSearchError, Result};

/// Runs phrase queries against the live index and resolves every hit to the
/// highlighted subtitle entries it came from
#[derive(Clone)]
pub struct VideoSearcher {
    store: Arc<dyn VideoStore>,
    engine: Arc<dyn SearchEngine>,
    alias: String,
}

impl VideoSearcher {
    pub fn new(store: Arc<dyn VideoStore>, engine: Arc<dyn SearchEngine>, config: &IndexConfig) -> Self {
        Self {
            store,
            engine,
            alias: config.alias.clone(),
        }
    }

    /// Search for `phrase`, optionally limited to one variety, returning hits
    /// `from..from + size` together with the total hit count
    pub async fn search(
        &self,
        phrase: &str,
        variety: EnglishVariety,
        from: usize,
        size: usize,
    ) -> Result<VideoFragmentPage> {
        if phrase.trim().is_empty() {
            return Err(ContextSearchError::InvalidInput(
                "search phrase must not be empty".to_string(),
            ));
        }

        let query = FragmentQuery::new(phrase, variety, from, size);
        let response = self.engine.search(&self.alias, &query).await?;
        debug!(
            "🔍 '{}' ({}) matched {} sentences, resolving {}",
            phrase,
            variety,
            response.total,
            response.hits.len()
        );

        let videos = try_join_all(response.hits.into_iter().map(|hit| self.resolve(hit))).await?;
        info!("🔍 Search '{}' returned {} of {} hits", phrase, videos.len(), response.total);

        Ok(VideoFragmentPage {
            count: response.total,
            videos,
        })
    }

    async fn resolve(&self, hit: SearchHit) -> Result<VideoFragment> {
        let document = hit.document;
        let parts = split_highlight(hit.highlight.as_deref().unwrap_or(&document.sentence));
        let map = &document.entry_range_map;
        let sentence_len = document.sentence.chars().count();

        let inconsistent = || {
            ContextSearchError::Highlighting(format!(
                "entry range map of a sentence in {} does not cover '{}'",
                document.youtube_video_id, document.sentence
            ))
        };
        let first = *map.get(0).ok_or_else(inconsistent)?;
        let last = *map
            .get(sentence_len.saturating_sub(1))
            .ok_or_else(inconsistent)?;

        let entries = self
            .store
            .find_subtitle_entry_range(&document.youtube_video_id, first, last)
            .await?;
        let subtitle_entries = highlight(&parts, document.sentence_position, &entries)?;

        let match_start = parts.first().map_or(0, |plain| plain.chars().count());
        let match_entry_index = map.get(match_start).copied().unwrap_or(first);

        Ok(VideoFragment {
            youtube_video_id: document.youtube_video_id,
            variety: document.variety,
            match_entry_index,
            subtitle_entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{IndexSchema, InMemorySearchEngine};
    use crate::models::{NewVideo, VideoFragmentDocument};
    use crate::store::InMemoryVideoStore;
    use crate::subtitles::RangeMap;

    const LORENTZ: &str = "1
00:00:00,000 --> 00:00:03,000
your Lorentz factor by now is 650. And the

2
00:00:03,000 --> 00:00:06,000
left over radiation from the Big Bang, the Cosmic Microwave Background, has now

3
00:00:06,000 --> 00:00:09,000
blue shifted all the way from the microwave to visible red light. Over the
";

    async fn searcher_with(document: VideoFragmentDocument) -> VideoSearcher {
        let store = Arc::new(InMemoryVideoStore::new());
        store
            .save(NewVideo {
                youtube_video_id: "lorentz".to_string(),
                variety: EnglishVariety::Uk,
                raw_subtitle_text: LORENTZ.to_string(),
            })
            .await
            .unwrap();

        let engine = Arc::new(InMemorySearchEngine::new());
        engine
            .create_index("videos_1", &IndexSchema::video_fragments())
            .await
            .unwrap();
        engine.put_alias("videos_1", "videos").await.unwrap();
        engine.bulk_write("videos", &[document]).await.unwrap();

        VideoSearcher::new(store, engine, &IndexConfig::default())
    }

    fn document(sentence: &str, entry_range_map: RangeMap<usize>, sentence_position: usize) -> VideoFragmentDocument {
        VideoFragmentDocument {
            youtube_video_id: "lorentz".to_string(),
            variety: EnglishVariety::Uk,
            sentence: sentence.to_string(),
            entry_range_map,
            sentence_position,
        }
    }

    #[tokio::test]
    async fn test_hit_resolves_to_entry_subrange() {
        let sentence = "left over radiation from the Big Bang";
        let searcher = searcher_with(document(
            sentence,
            RangeMap::from_iter([(0..sentence.chars().count(), 1)]),
            0,
        ))
        .await;

        let page = searcher
            .search("big bang", EnglishVariety::All, 0, 10)
            .await
            .unwrap();

        assert_eq!(page.count, 1);
        let fragment = &page.videos[0];
        assert_eq!(fragment.match_entry_index, 1);
        assert_eq!(fragment.subtitle_entries.len(), 1);
        assert_eq!(fragment.subtitle_entries[0].id, 2);
        assert_eq!(
            fragment.subtitle_entries[0].lines,
            vec![
                "left over radiation from the ",
                "Big",
                " ",
                "Bang",
                ", the Cosmic Microwave Background, has now"
            ]
        );
    }

    #[tokio::test]
    async fn test_variety_filter_and_empty_phrase() {
        let sentence = "left over radiation from the Big Bang";
        let searcher = searcher_with(document(
            sentence,
            RangeMap::from_iter([(0..sentence.chars().count(), 1)]),
            0,
        ))
        .await;

        let page = searcher.search("big bang", EnglishVariety::Us, 0, 10).await.unwrap();
        assert_eq!(page.count, 0);
        assert!(page.videos.is_empty());

        assert!(matches!(
            searcher.search("  ", EnglishVariety::All, 0, 10).await,
            Err(ContextSearchError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_range_map_is_a_highlighting_error() {
        let searcher = searcher_with(document("the Big Bang", RangeMap::new(), 0)).await;

        assert!(matches!(
            searcher.search("big", EnglishVariety::All, 0, 10).await,
            Err(ContextSearchError::Highlighting(_))
        ));
    }
}
