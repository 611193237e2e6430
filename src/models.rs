use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::subtitles::RangeMap;
use crate::{ContextSearchError, Result};

/// Start and end of a subtitle entry, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeFrame {
    pub start_time: f64,
    pub end_time: f64,
}

impl TimeFrame {
    pub fn new(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// One timed block of a subtitle file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleEntry {
    /// 1-based sequence number from the subtitle file
    pub id: u32,

    pub time_frame: TimeFrame,

    /// Text lines of the entry. After highlighting, the lines are replaced by
    /// segments where every odd-indexed segment is a highlighted run.
    pub lines: Vec<String>,
}

impl SubtitleEntry {
    pub fn new(id: u32, time_frame: TimeFrame, lines: Vec<String>) -> Self {
        Self {
            id,
            time_frame,
            lines,
        }
    }

    /// The lines joined by single spaces
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    /// A blank cue carries no text but still holds its place in the list
    pub fn is_blank(&self) -> bool {
        self.lines.iter().all(|line| line.trim().is_empty())
    }
}

/// A sentence extracted from a transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleSentence {
    pub text: String,

    /// Maps char offsets within `text` to the 0-based index of the
    /// originating entry in the video's full entry list
    pub entry_range_map: RangeMap<usize>,

    /// Char offset where the sentence starts inside its first entry's text
    pub position: usize,
}

/// Variety of English spoken in a video. `All` only exists as a query wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnglishVariety {
    All,
    Uk,
    Us,
    Aus,
}

impl EnglishVariety {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnglishVariety::All => "ALL",
            EnglishVariety::Uk => "UK",
            EnglishVariety::Us => "US",
            EnglishVariety::Aus => "AUS",
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, EnglishVariety::All)
    }
}

impl fmt::Display for EnglishVariety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnglishVariety {
    type Err = ContextSearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "ALL" => Ok(EnglishVariety::All),
            "UK" => Ok(EnglishVariety::Uk),
            "US" => Ok(EnglishVariety::Us),
            "AUS" => Ok(EnglishVariety::Aus),
            other => Err(ContextSearchError::InvalidInput(format!(
                "Unknown English variety: {}",
                other
            ))),
        }
    }
}

/// A video as kept by the relational store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: i64,
    pub youtube_video_id: String,
    pub variety: EnglishVariety,
    pub raw_subtitle_text: String,
}

/// A video that has not been persisted yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVideo {
    pub youtube_video_id: String,
    pub variety: EnglishVariety,
    pub raw_subtitle_text: String,
}

/// Status of the full reindex job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexingStatus {
    None,
    Started,
    Completed,
    Failed,
}

/// Snapshot of the full reindex job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingInfo {
    pub status: IndexingStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub message: String,
}

impl IndexingInfo {
    pub fn none() -> Self {
        Self {
            status: IndexingStatus::None,
            start_time: None,
            finish_time: None,
            message: "Index is empty".to_string(),
        }
    }

    pub fn started(start_time: DateTime<Utc>) -> Self {
        Self {
            status: IndexingStatus::Started,
            start_time: Some(start_time),
            finish_time: None,
            message: "Indexing is in progress...".to_string(),
        }
    }

    pub fn completed(start_time: DateTime<Utc>, finish_time: DateTime<Utc>) -> Self {
        Self {
            status: IndexingStatus::Completed,
            start_time: Some(start_time),
            finish_time: Some(finish_time),
            message: "Indexing has been completed".to_string(),
        }
    }

    pub fn failed(
        start_time: Option<DateTime<Utc>>,
        finish_time: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: IndexingStatus::Failed,
            start_time,
            finish_time: Some(finish_time),
            message: message.into(),
        }
    }
}

/// Metadata written onto a freshly built index. It outlives the process,
/// so job status can be recovered after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoIndexMetadata {
    pub start_time: DateTime<Utc>,
    pub finish_time: DateTime<Utc>,
}

impl VideoIndexMetadata {
    const START_TIME: &'static str = "start_time";
    const FINISH_TIME: &'static str = "finish_time";

    pub fn new(start_time: DateTime<Utc>, finish_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            finish_time,
        }
    }

    pub fn to_metadata(&self) -> HashMap<String, Value> {
        HashMap::from([
            (
                Self::START_TIME.to_string(),
                Value::String(self.start_time.to_rfc3339()),
            ),
            (
                Self::FINISH_TIME.to_string(),
                Value::String(self.finish_time.to_rfc3339()),
            ),
        ])
    }

    /// Returns `None` when the map lacks either timestamp or one is malformed
    pub fn from_metadata(metadata: &HashMap<String, Value>) -> Option<Self> {
        let read = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|time| time.with_timezone(&Utc))
        };
        Some(Self::new(read(Self::START_TIME)?, read(Self::FINISH_TIME)?))
    }
}

/// One sentence of one video as stored in the search index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFragmentDocument {
    pub youtube_video_id: String,
    pub variety: EnglishVariety,
    pub sentence: String,
    pub entry_range_map: RangeMap<usize>,
    pub sentence_position: usize,
}

impl VideoFragmentDocument {
    pub fn new(video: &VideoRecord, sentence: SubtitleSentence) -> Self {
        Self {
            youtube_video_id: video.youtube_video_id.clone(),
            variety: video.variety,
            sentence: sentence.text,
            entry_range_map: sentence.entry_range_map,
            sentence_position: sentence.position,
        }
    }
}

/// A search hit resolved to the subtitle entries that contain it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFragment {
    pub youtube_video_id: String,
    pub variety: EnglishVariety,

    /// Index of the entry, within the video's full entry list, where the first highlight begins
    pub match_entry_index: usize,

    /// The entries spanned by the matched sentence, with highlight segments applied
    pub subtitle_entries: Vec<SubtitleEntry>,
}

/// A page of search hits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFragmentPage {
    /// Total number of hits across all pages
    pub count: u64,
    pub videos: Vec<VideoFragment>,
}
