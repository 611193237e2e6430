pub mod state;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::IndexConfig;
use crate::engine::{IndexSchema, SearchEngine, YOUTUBE_VIDEO_ID_FIELD};
use crate::models::{
    EnglishVariety, IndexingInfo, NewVideo, VideoFragmentDocument, VideoIndexMetadata, VideoRecord,
};
use crate::store::VideoStore;
use crate::subtitles::SentenceExtractor;
use crate::{ContextSearchError, Result};

pub use state::{ChangeGuard, JobSlot, JobState};

/// Keeps the search index in step with the video store.
///
/// Single videos are indexed straight into the live index behind the alias.
/// A full reindex builds a fresh index in the background and swaps the alias
/// over once every batch has been accepted. A full reindex and single video
/// changes exclude each other: whichever starts second gets `Conflict`.
#[derive(Clone)]
pub struct VideoIndexer {
    store: Arc<dyn VideoStore>,
    engine: Arc<dyn SearchEngine>,
    extractor: SentenceExtractor,
    alias: String,
    bulk_size: usize,
    state: JobState,
    last_index_stamp: Arc<AtomicI64>,
}

impl VideoIndexer {
    pub fn new(store: Arc<dyn VideoStore>, engine: Arc<dyn SearchEngine>, config: &IndexConfig) -> Self {
        Self {
            store,
            engine,
            extractor: SentenceExtractor::default(),
            alias: config.alias.clone(),
            bulk_size: config.bulk_size.max(1),
            state: JobState::new(),
            last_index_stamp: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Use a different sentence extractor
    pub fn with_extractor(mut self, extractor: SentenceExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Whether a full reindex currently holds the job slot
    pub fn is_indexing(&self) -> bool {
        self.state.is_in_flight()
    }

    /// Register a single video change for as long as the guard lives
    fn begin_change(&self) -> Result<ChangeGuard> {
        self.state.try_begin_change().ok_or_else(|| {
            ContextSearchError::Conflict(
                "a full reindex is in progress, try again once it has finished".to_string(),
            )
        })
    }

    fn ensure_storable(variety: EnglishVariety) -> Result<()> {
        if variety.is_wildcard() {
            return Err(ContextSearchError::InvalidInput(
                "ALL is a search wildcard, not the variety of a video".to_string(),
            ));
        }
        Ok(())
    }

    /// Store a new video and index its sentences.
    ///
    /// The record is kept even if indexing fails afterwards; the error is
    /// returned and the video shows up again with the next full reindex.
    pub async fn add(
        &self,
        youtube_video_id: &str,
        variety: EnglishVariety,
        raw_subtitle_text: &str,
    ) -> Result<VideoRecord> {
        let _change = self.begin_change()?;
        Self::ensure_storable(variety)?;

        if self.store.find_by_youtube_id(youtube_video_id).await?.is_some() {
            return Err(ContextSearchError::AlreadyExists(format!(
                "video with youtube id {}",
                youtube_video_id
            )));
        }

        let id = self
            .store
            .save(NewVideo {
                youtube_video_id: youtube_video_id.to_string(),
                variety,
                raw_subtitle_text: raw_subtitle_text.to_string(),
            })
            .await?;
        let video = VideoRecord {
            id,
            youtube_video_id: youtube_video_id.to_string(),
            variety,
            raw_subtitle_text: raw_subtitle_text.to_string(),
        };
        info!("➕ Added video {} ({})", video.id, video.youtube_video_id);

        if let Err(e) = self.index_video(&video).await {
            warn!(
                "⚠️  Video {} ({}) was saved but could not be indexed: {}",
                video.id, video.youtube_video_id, e
            );
            return Err(e);
        }

        Ok(video)
    }

    /// Replace a stored video and re-index it
    pub async fn update(
        &self,
        id: i64,
        youtube_video_id: &str,
        variety: EnglishVariety,
        raw_subtitle_text: &str,
    ) -> Result<VideoRecord> {
        let _change = self.begin_change()?;
        Self::ensure_storable(variety)?;

        let previous = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ContextSearchError::NotFound(format!("video {}", id)))?;

        let video = VideoRecord {
            id,
            youtube_video_id: youtube_video_id.to_string(),
            variety,
            raw_subtitle_text: raw_subtitle_text.to_string(),
        };
        self.store.update(video.clone()).await?;
        info!("✏️  Updated video {} ({})", video.id, video.youtube_video_id);

        if self.engine.index_exists(&self.alias).await? {
            let deleted = self
                .engine
                .delete_by_field(&self.alias, YOUTUBE_VIDEO_ID_FIELD, &previous.youtube_video_id)
                .await?;
            debug!(
                "Removed {} stale sentences of {}",
                deleted, previous.youtube_video_id
            );
            self.index_video(&video).await?;
        }

        Ok(video)
    }

    /// Delete a video and its sentences
    pub async fn remove(&self, id: i64) -> Result<()> {
        let _change = self.begin_change()?;

        let video = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ContextSearchError::NotFound(format!("video {}", id)))?;

        if self.engine.index_exists(&self.alias).await? {
            self.engine
                .delete_by_field(&self.alias, YOUTUBE_VIDEO_ID_FIELD, &video.youtube_video_id)
                .await?;
        }
        self.store.delete_by_id(id).await?;

        info!("➖ Removed video {} ({})", video.id, video.youtube_video_id);
        Ok(())
    }

    /// Write the sentences of one video to the live index, if there is one
    async fn index_video(&self, video: &VideoRecord) -> Result<()> {
        if !self.engine.index_exists(&self.alias).await? {
            debug!(
                "No live index behind alias {}, {} will be indexed by the next full reindex",
                self.alias, video.youtube_video_id
            );
            return Ok(());
        }

        let documents = self.documents_for(video)?;
        for batch in documents.chunks(self.bulk_size) {
            self.write_batch(&self.alias, batch).await?;
        }
        Ok(())
    }

    fn documents_for(&self, video: &VideoRecord) -> Result<Vec<VideoFragmentDocument>> {
        Ok(self
            .extractor
            .extract_srt(&video.raw_subtitle_text)?
            .into_iter()
            .map(|sentence| VideoFragmentDocument::new(video, sentence))
            .collect())
    }

    async fn write_batch(&self, index: &str, batch: &[VideoFragmentDocument]) -> Result<()> {
        let response = self.engine.bulk_write(index, batch).await?;
        if response.has_errors() {
            return Err(ContextSearchError::BulkIndexing(format!(
                "{} of {} documents rejected by {}, first failure: {}",
                response.failures.len(),
                batch.len(),
                index,
                response.failures[0]
            )));
        }

        debug!(
            "📦 Indexed {} documents into {} in {}ms",
            batch.len(),
            index,
            response.took_ms
        );
        Ok(())
    }

    /// Start a full reindex in the background and return its start time.
    ///
    /// Fails with `Conflict` if a reindex or a single video change is
    /// already running. Progress is reported by
    /// [`VideoIndexer::indexing_status`].
    pub async fn start_indexing(&self) -> Result<DateTime<Utc>> {
        let slot = self.state.try_acquire().ok_or_else(|| {
            if self.state.is_in_flight() {
                ContextSearchError::Conflict("a full reindex is already in progress".to_string())
            } else {
                ContextSearchError::Conflict(format!(
                    "{} video changes are in progress, try again once they have finished",
                    self.state.active_changes()
                ))
            }
        })?;

        let start_time = Utc::now();
        self.state.set(&slot, IndexingInfo::started(start_time)).await;
        info!("🚀 Full reindex started");

        let indexer = self.clone();
        tokio::spawn(async move {
            indexer.run_full_reindex(slot, start_time).await;
        });

        Ok(start_time)
    }

    async fn run_full_reindex(&self, slot: JobSlot, start_time: DateTime<Utc>) {
        // the slot is only released after the final state is recorded
        let info = match catch_panic(self.reindex(start_time)).await {
            Ok(finish_time) => {
                info!(
                    "✅ Full reindex completed in {}ms",
                    (finish_time - start_time).num_milliseconds()
                );
                IndexingInfo::completed(start_time, finish_time)
            }
            Err(e) => {
                error!("❌ Full reindex failed: {}", e);
                IndexingInfo::failed(Some(start_time), Utc::now(), e.to_string())
            }
        };
        self.state.set(&slot, info).await;
    }

    /// Build a new index, swap the alias onto it and drop the old one
    async fn reindex(&self, start_time: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let previous_index = self.engine.aliased_index_name(&self.alias).await?;
        let new_index = self.next_index_name();

        self.engine
            .create_index(&new_index, &IndexSchema::video_fragments())
            .await?;
        info!("📂 Created index {}", new_index);

        let finish_time = match catch_panic(self.build_and_promote(&new_index, start_time)).await {
            Ok(finish_time) => finish_time,
            Err(e) => {
                if let Err(cleanup) = self.engine.delete_index(&new_index).await {
                    warn!("Could not delete abandoned index {}: {}", new_index, cleanup);
                }
                return Err(e);
            }
        };

        if let Some(old_index) = previous_index.filter(|old| *old != new_index) {
            match self.engine.delete_index(&old_index).await {
                Ok(()) => info!("🗑️  Deleted previous index {}", old_index),
                Err(e) => warn!("Could not delete previous index {}: {}", old_index, e),
            }
        }

        Ok(finish_time)
    }

    async fn build_and_promote(&self, index: &str, start_time: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let videos = self.store.find_all().await?;
        let mut pending: Vec<VideoFragmentDocument> = Vec::with_capacity(self.bulk_size);
        let mut batches = 0;
        let mut total = 0;

        for video in &videos {
            pending.extend(self.documents_for(video)?);

            while pending.len() >= self.bulk_size {
                let batch: Vec<_> = pending.drain(..self.bulk_size).collect();
                self.write_batch(index, &batch).await?;
                batches += 1;
                total += batch.len();
            }
        }
        if !pending.is_empty() {
            self.write_batch(index, &pending).await?;
            batches += 1;
            total += pending.len();
        }
        info!(
            "📦 Wrote {} sentences of {} videos to {} in {} batches",
            total,
            videos.len(),
            index,
            batches
        );

        let finish_time = Utc::now();
        self.engine
            .set_index_metadata(index, VideoIndexMetadata::new(start_time, finish_time).to_metadata())
            .await?;
        self.engine.put_alias(index, &self.alias).await?;
        info!("🔀 Alias {} now points at {}", self.alias, index);

        Ok(finish_time)
    }

    /// `{alias}_{epoch millis}`, strictly increasing within the process
    fn next_index_name(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_index_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        format!("{}_{}", self.alias, now.max(previous + 1))
    }

    /// Current job status.
    ///
    /// While no job runs, the status is re-read from the metadata stored on
    /// the live index, so it survives restarts.
    pub async fn indexing_status(&self) -> Result<IndexingInfo> {
        if self.state.is_in_flight() {
            return Ok(self.state.info().await);
        }

        let Some(index) = self.engine.aliased_index_name(&self.alias).await? else {
            return Ok(self.state.info().await);
        };
        let metadata = self.engine.index_metadata(&index).await?;
        let Some(metadata) = VideoIndexMetadata::from_metadata(&metadata) else {
            debug!("Index {} carries no job metadata", index);
            return Ok(self.state.info().await);
        };

        Ok(self
            .state
            .refresh(IndexingInfo::completed(metadata.start_time, metadata.finish_time))
            .await)
    }
}

/// Run `future`, turning a panic inside it into `JobPanicked`
async fn catch_panic<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            Err(ContextSearchError::JobPanicked(panic_message(&*payload)))
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemorySearchEngine;
    use crate::models::IndexingStatus;
    use crate::store::InMemoryVideoStore;
    use std::time::Duration;

    const SRT: &str = "1
00:00:00,000 --> 00:00:02,000
Hello world! How are you?

2
00:00:02,000 --> 00:00:04,000
I'm fine.
";

    fn indexer(bulk_size: usize) -> (VideoIndexer, Arc<InMemorySearchEngine>) {
        let engine = Arc::new(InMemorySearchEngine::new());
        let config = IndexConfig {
            alias: "videos".to_string(),
            bulk_size,
        };
        let indexer = VideoIndexer::new(Arc::new(InMemoryVideoStore::new()), engine.clone(), &config);
        (indexer, engine)
    }

    async fn wait_for_job(indexer: &VideoIndexer) -> IndexingInfo {
        for _ in 0..200 {
            if !indexer.is_indexing() {
                return indexer.indexing_status().await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("reindex did not finish");
    }

    #[test]
    fn test_index_names_increase() {
        let (indexer, _) = indexer(10);
        let first = indexer.next_index_name();
        let second = indexer.next_index_name();

        assert!(first.starts_with("videos_"));
        let stamp = |name: &str| name["videos_".len()..].parse::<i64>().unwrap();
        assert!(stamp(&second) > stamp(&first));
    }

    #[tokio::test]
    async fn test_add_without_live_index_only_stores() {
        let (indexer, engine) = indexer(10);

        let video = indexer.add("abc", EnglishVariety::Uk, SRT).await.unwrap();
        assert_eq!(video.id, 1);
        assert!(engine.index_names().await.is_empty());
        assert_eq!(
            indexer.indexing_status().await.unwrap().status,
            IndexingStatus::None
        );
    }

    #[tokio::test]
    async fn test_add_rejects_wildcard_and_duplicates() {
        let (indexer, _) = indexer(10);

        assert!(matches!(
            indexer.add("abc", EnglishVariety::All, SRT).await,
            Err(ContextSearchError::InvalidInput(_))
        ));
        indexer.add("abc", EnglishVariety::Us, SRT).await.unwrap();
        assert!(matches!(
            indexer.add("abc", EnglishVariety::Us, SRT).await,
            Err(ContextSearchError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_full_reindex_builds_and_promotes() {
        let (indexer, engine) = indexer(2);
        indexer.add("abc", EnglishVariety::Uk, SRT).await.unwrap();
        indexer.add("def", EnglishVariety::Us, SRT).await.unwrap();

        indexer.start_indexing().await.unwrap();
        let info = wait_for_job(&indexer).await;

        assert_eq!(info.status, IndexingStatus::Completed);
        assert!(info.finish_time >= info.start_time);
        assert_eq!(engine.documents("videos").await.len(), 6);
        assert_eq!(engine.batch_sizes().await, vec![2, 2, 2]);

        let live = engine.aliased_index_name("videos").await.unwrap().unwrap();
        let metadata = engine.index_metadata(&live).await.unwrap();
        assert!(VideoIndexMetadata::from_metadata(&metadata).is_some());
    }

    #[tokio::test]
    async fn test_second_reindex_replaces_old_index() {
        let (indexer, engine) = indexer(100);
        indexer.add("abc", EnglishVariety::Uk, SRT).await.unwrap();

        indexer.start_indexing().await.unwrap();
        wait_for_job(&indexer).await;
        let first = engine.aliased_index_name("videos").await.unwrap().unwrap();

        indexer.start_indexing().await.unwrap();
        wait_for_job(&indexer).await;
        let second = engine.aliased_index_name("videos").await.unwrap().unwrap();

        assert_ne!(first, second);
        assert_eq!(engine.index_names().await, vec![second]);
    }

    #[tokio::test]
    async fn test_single_video_changes_follow_live_index() {
        let (indexer, engine) = indexer(100);
        let video = indexer.add("abc", EnglishVariety::Uk, SRT).await.unwrap();
        indexer.start_indexing().await.unwrap();
        wait_for_job(&indexer).await;

        indexer.add("def", EnglishVariety::Us, SRT).await.unwrap();
        assert_eq!(engine.documents("videos").await.len(), 6);

        indexer
            .update(video.id, "xyz", EnglishVariety::Aus, "1\n00:00:00,000 --> 00:00:01,000\nOne.\n")
            .await
            .unwrap();
        let documents = engine.documents("videos").await;
        assert_eq!(documents.len(), 4);
        assert!(documents.iter().all(|d| d.youtube_video_id != "abc"));
        assert!(documents
            .iter()
            .any(|d| d.youtube_video_id == "xyz" && d.variety == EnglishVariety::Aus));

        indexer.remove(video.id).await.unwrap();
        assert_eq!(engine.documents("videos").await.len(), 3);
        assert!(matches!(
            indexer.remove(video.id).await,
            Err(ContextSearchError::NotFound(_))
        ));
        assert!(matches!(
            indexer.update(video.id, "xyz", EnglishVariety::Uk, SRT).await,
            Err(ContextSearchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_previous_index() {
        let (indexer, engine) = indexer(1);
        indexer.add("abc", EnglishVariety::Uk, SRT).await.unwrap();
        indexer.start_indexing().await.unwrap();
        wait_for_job(&indexer).await;
        let live = engine.aliased_index_name("videos").await.unwrap().unwrap();

        engine.fail_bulk_after(4).await;
        indexer.start_indexing().await.unwrap();
        let info = wait_for_job(&indexer).await;

        assert_eq!(info.status, IndexingStatus::Failed);
        assert!(info.message.contains("rejected"));
        assert_eq!(engine.aliased_index_name("videos").await.unwrap(), Some(live.clone()));
        assert_eq!(engine.index_names().await, vec![live]);
        assert!(indexer.start_indexing().await.is_ok());
    }
}
