use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

use super::{PageRequest, VideoFilter, VideoPage, VideoStore};
use crate::models::{NewVideo, SubtitleEntry, VideoRecord};
use crate::subtitles::parse_srt;
use crate::{ContextSearchError, Result};

struct StoredVideo {
    record: VideoRecord,
    entries: Vec<SubtitleEntry>,
}

#[derive(Default)]
struct Videos {
    last_id: i64,
    by_id: BTreeMap<i64, StoredVideo>,
}

impl Videos {
    fn find_by_youtube_id(&self, youtube_video_id: &str) -> Option<&StoredVideo> {
        self.by_id
            .values()
            .find(|video| video.record.youtube_video_id == youtube_video_id)
    }
}

/// Video store kept in process memory
#[derive(Default)]
pub struct InMemoryVideoStore {
    videos: RwLock<Videos>,
}

impl InMemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.videos.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl VideoStore for InMemoryVideoStore {
    async fn save(&self, video: NewVideo) -> Result<i64> {
        let entries = parse_srt(&video.raw_subtitle_text)?;
        let mut videos = self.videos.write().await;

        if videos.find_by_youtube_id(&video.youtube_video_id).is_some() {
            return Err(ContextSearchError::AlreadyExists(format!(
                "video with youtube id {}",
                video.youtube_video_id
            )));
        }

        videos.last_id += 1;
        let id = videos.last_id;
        let record = VideoRecord {
            id,
            youtube_video_id: video.youtube_video_id,
            variety: video.variety,
            raw_subtitle_text: video.raw_subtitle_text,
        };
        debug!("💾 Stored video {} with {} subtitle entries", id, entries.len());
        videos.by_id.insert(id, StoredVideo { record, entries });

        Ok(id)
    }

    async fn update(&self, video: VideoRecord) -> Result<()> {
        let entries = parse_srt(&video.raw_subtitle_text)?;
        let mut videos = self.videos.write().await;

        if !videos.by_id.contains_key(&video.id) {
            return Err(ContextSearchError::NotFound(format!("video {}", video.id)));
        }
        if let Some(other) = videos.find_by_youtube_id(&video.youtube_video_id) {
            if other.record.id != video.id {
                return Err(ContextSearchError::AlreadyExists(format!(
                    "video with youtube id {}",
                    video.youtube_video_id
                )));
            }
        }

        videos.by_id.insert(
            video.id,
            StoredVideo {
                record: video,
                entries,
            },
        );
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<VideoRecord>> {
        let videos = self.videos.read().await;
        Ok(videos.by_id.get(&id).map(|video| video.record.clone()))
    }

    async fn find_by_youtube_id(&self, youtube_video_id: &str) -> Result<Option<VideoRecord>> {
        let videos = self.videos.read().await;
        Ok(videos
            .find_by_youtube_id(youtube_video_id)
            .map(|video| video.record.clone()))
    }

    async fn delete_by_id(&self, id: i64) -> Result<()> {
        let mut videos = self.videos.write().await;
        videos
            .by_id
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ContextSearchError::NotFound(format!("video {}", id)))
    }

    async fn find_all(&self) -> Result<Vec<VideoRecord>> {
        let videos = self.videos.read().await;
        Ok(videos.by_id.values().map(|video| video.record.clone()).collect())
    }

    async fn find_page(&self, filter: &VideoFilter, page: PageRequest) -> Result<VideoPage> {
        let videos = self.videos.read().await;
        let matching: Vec<&VideoRecord> = videos
            .by_id
            .values()
            .map(|video| &video.record)
            .filter(|record| filter.matches(record))
            .collect();

        Ok(VideoPage {
            total: matching.len() as u64,
            videos: matching
                .into_iter()
                .skip(page.offset())
                .take(page.size)
                .cloned()
                .collect(),
            page: page.page,
            size: page.size,
        })
    }

    async fn find_subtitle_entries(&self, youtube_video_id: &str) -> Result<Vec<SubtitleEntry>> {
        let videos = self.videos.read().await;
        videos
            .find_by_youtube_id(youtube_video_id)
            .map(|video| video.entries.clone())
            .ok_or_else(|| ContextSearchError::NotFound(format!("video {}", youtube_video_id)))
    }

    async fn find_subtitles(
        &self,
        youtube_video_ids: &HashSet<String>,
    ) -> Result<HashMap<String, Vec<SubtitleEntry>>> {
        let videos = self.videos.read().await;
        Ok(videos
            .by_id
            .values()
            .filter(|video| youtube_video_ids.contains(&video.record.youtube_video_id))
            .map(|video| (video.record.youtube_video_id.clone(), video.entries.clone()))
            .collect())
    }

    async fn find_subtitle_entry_range(
        &self,
        youtube_video_id: &str,
        first: usize,
        last: usize,
    ) -> Result<Vec<SubtitleEntry>> {
        let videos = self.videos.read().await;
        let video = videos
            .find_by_youtube_id(youtube_video_id)
            .ok_or_else(|| ContextSearchError::NotFound(format!("video {}", youtube_video_id)))?;

        if first > last {
            return Ok(Vec::new());
        }
        Ok(video
            .entries
            .iter()
            .skip(first)
            .take(last.saturating_sub(first).saturating_add(1))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnglishVariety;

    const SRT: &str = "1
00:00:00,000 --> 00:00:01,000
First.

2
00:00:01,000 --> 00:00:02,000
Second.

3
00:00:02,000 --> 00:00:03,000
Third.
";

    fn new_video(youtube_video_id: &str, variety: EnglishVariety) -> NewVideo {
        NewVideo {
            youtube_video_id: youtube_video_id.to_string(),
            variety,
            raw_subtitle_text: SRT.to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let store = InMemoryVideoStore::new();
        let id = store.save(new_video("abc", EnglishVariety::Uk)).await.unwrap();

        let found = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.youtube_video_id, "abc");
        assert_eq!(store.find_by_youtube_id("abc").await.unwrap(), Some(found));
        assert_eq!(store.find_by_id(id + 1).await.unwrap(), None);
        assert_eq!(store.find_subtitle_entries("abc").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_youtube_id_is_rejected() {
        let store = InMemoryVideoStore::new();
        store.save(new_video("abc", EnglishVariety::Uk)).await.unwrap();

        let result = store.save(new_video("abc", EnglishVariety::Us)).await;
        assert!(matches!(result, Err(ContextSearchError::AlreadyExists(_))));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_malformed_subtitles_are_not_stored() {
        let store = InMemoryVideoStore::new();
        let mut video = new_video("abc", EnglishVariety::Uk);
        video.raw_subtitle_text = "oops".to_string();

        assert!(matches!(
            store.save(video).await,
            Err(ContextSearchError::Parse { .. })
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = InMemoryVideoStore::new();
        let first = store.save(new_video("abc", EnglishVariety::Uk)).await.unwrap();
        let second = store.save(new_video("def", EnglishVariety::Uk)).await.unwrap();

        let mut record = store.find_by_id(first).await.unwrap().unwrap();
        record.youtube_video_id = "def".to_string();
        assert!(matches!(
            store.update(record.clone()).await,
            Err(ContextSearchError::AlreadyExists(_))
        ));

        record.youtube_video_id = "xyz".to_string();
        record.raw_subtitle_text = "1\n00:00:00,000 --> 00:00:01,000\nOnly.\n".to_string();
        store.update(record).await.unwrap();
        assert_eq!(store.find_subtitle_entries("xyz").await.unwrap().len(), 1);
        assert!(store.find_by_youtube_id("abc").await.unwrap().is_none());

        store.delete_by_id(second).await.unwrap();
        assert!(matches!(
            store.delete_by_id(second).await,
            Err(ContextSearchError::NotFound(_))
        ));
        assert_eq!(store.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_paged_listing() {
        let store = InMemoryVideoStore::new();
        for (i, variety) in [EnglishVariety::Uk, EnglishVariety::Us, EnglishVariety::Uk]
            .into_iter()
            .enumerate()
        {
            store.save(new_video(&format!("v{}", i), variety)).await.unwrap();
        }

        let filter = VideoFilter {
            variety: Some(EnglishVariety::Uk),
            ..Default::default()
        };
        let page = store.find_page(&filter, PageRequest::new(0, 1)).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.videos[0].youtube_video_id, "v0");

        let page = store.find_page(&filter, PageRequest::new(1, 1)).await.unwrap();
        assert_eq!(page.videos[0].youtube_video_id, "v2");

        let all = store
            .find_page(&VideoFilter::default(), PageRequest::new(5, 10))
            .await
            .unwrap();
        assert_eq!(all.total, 3);
        assert!(all.videos.is_empty());
    }

    #[tokio::test]
    async fn test_entry_ranges() {
        let store = InMemoryVideoStore::new();
        store.save(new_video("abc", EnglishVariety::Aus)).await.unwrap();

        let range = store.find_subtitle_entry_range("abc", 1, 2).await.unwrap();
        assert_eq!(range.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(store.find_subtitle_entry_range("abc", 2, 9).await.unwrap().len(), 1);
        assert!(store.find_subtitle_entry_range("abc", 2, 1).await.unwrap().is_empty());
        assert!(store.find_subtitle_entry_range("nope", 0, 1).await.is_err());

        let ids = HashSet::from(["abc".to_string(), "nope".to_string()]);
        let subtitles = store.find_subtitles(&ids).await.unwrap();
        assert_eq!(subtitles.len(), 1);
        assert_eq!(subtitles["abc"].len(), 3);
    }
}
