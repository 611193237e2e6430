pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::models::{EnglishVariety, NewVideo, SubtitleEntry, VideoRecord};
use crate::Result;

pub use memory::InMemoryVideoStore;
pub use sqlite::SqliteVideoStore;

/// Optional criteria for paged video listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoFilter {
    pub id: Option<i64>,
    pub youtube_video_id: Option<String>,
    pub variety: Option<EnglishVariety>,
}

impl VideoFilter {
    /// The variety to filter on; `ALL` means no filter
    pub fn effective_variety(&self) -> Option<EnglishVariety> {
        self.variety.filter(|variety| !variety.is_wildcard())
    }

    pub fn matches(&self, video: &VideoRecord) -> bool {
        self.id.map_or(true, |id| video.id == id)
            && self
                .youtube_video_id
                .as_deref()
                .map_or(true, |youtube_video_id| video.youtube_video_id == youtube_video_id)
            && self
                .effective_variety()
                .map_or(true, |variety| video.variety == variety)
    }
}

/// A 0-based page of results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self { page, size }
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}

/// One page of videos, ordered by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoPage {
    pub videos: Vec<VideoRecord>,
    pub total: u64,
    pub page: usize,
    pub size: usize,
}

/// Relational storage of videos and their parsed subtitles.
///
/// Subtitles are parsed when a video is saved or updated, so a malformed
/// transcript is rejected with a parse error and never stored.
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Stores a new video and returns its id. Fails with `AlreadyExists` when
    /// the youtube id is taken.
    async fn save(&self, video: NewVideo) -> Result<i64>;

    /// Replaces a stored video. Fails with `NotFound` for an unknown id and
    /// with `AlreadyExists` when the youtube id belongs to another video.
    async fn update(&self, video: VideoRecord) -> Result<()>;

    async fn find_by_id(&self, id: i64) -> Result<Option<VideoRecord>>;

    async fn find_by_youtube_id(&self, youtube_video_id: &str) -> Result<Option<VideoRecord>>;

    /// Fails with `NotFound` for an unknown id
    async fn delete_by_id(&self, id: i64) -> Result<()>;

    async fn find_all(&self) -> Result<Vec<VideoRecord>>;

    async fn find_page(&self, filter: &VideoFilter, page: PageRequest) -> Result<VideoPage>;

    /// The full ordered entry list of one video
    async fn find_subtitle_entries(&self, youtube_video_id: &str) -> Result<Vec<SubtitleEntry>>;

    /// Entry lists for several videos; unknown ids are left out of the map
    async fn find_subtitles(
        &self,
        youtube_video_ids: &HashSet<String>,
    ) -> Result<HashMap<String, Vec<SubtitleEntry>>>;

    /// Entries `first..=last` (0-based positions) of one video, clipped to the
    /// entries that exist
    async fn find_subtitle_entry_range(
        &self,
        youtube_video_id: &str,
        first: usize,
        last: usize,
    ) -> Result<Vec<SubtitleEntry>>;
}
