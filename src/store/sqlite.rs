use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::{PageRequest, VideoFilter, VideoPage, VideoStore};
use crate::models::{EnglishVariety, NewVideo, SubtitleEntry, TimeFrame, VideoRecord};
use crate::subtitles::parse_srt;
use crate::{ContextSearchError, Result};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS videos (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      youtube_video_id TEXT NOT NULL UNIQUE,
      variety TEXT NOT NULL,
      raw_subtitle_text TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS subtitle_entries (
      video_id INTEGER NOT NULL,
      position INTEGER NOT NULL,
      entry_id INTEGER NOT NULL,
      start_time REAL NOT NULL,
      end_time REAL NOT NULL,
      lines TEXT NOT NULL,
      PRIMARY KEY (video_id, position),
      FOREIGN KEY(video_id) REFERENCES videos(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_videos_variety ON videos(variety, id);
";

const VIDEO_COLUMNS: &str = "id, youtube_video_id, variety, raw_subtitle_text";

/// Video store backed by a SQLite database file.
///
/// Parsed subtitle entries get one row each, keyed by their position in the
/// video, so that a range of entries can be read without loading the rest.
#[derive(Clone)]
pub struct SqliteVideoStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteVideoStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let connection = Connection::open(path)?;
        connection.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
        info!("🗄️  Opened video database at {}", path.display());
        Self::with_schema(connection)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(connection: Connection) -> Result<Self> {
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Run blocking database work off the async runtime
    async fn run<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut connection = connection
                .lock()
                .map_err(|_| ContextSearchError::Storage("database lock poisoned".to_string()))?;
            work(&mut *connection)
        })
        .await
        .map_err(|error| ContextSearchError::Storage(format!("database task failed: {error}")))?
    }
}

fn read_video(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_record((id, youtube_video_id, variety, raw_subtitle_text): (i64, String, String, String)) -> Result<VideoRecord> {
    Ok(VideoRecord {
        id,
        youtube_video_id,
        variety: variety.parse::<EnglishVariety>().map_err(|_| {
            ContextSearchError::Storage(format!("video {id} has unknown variety '{variety}'"))
        })?,
        raw_subtitle_text,
    })
}

fn read_entry(row: &Row<'_>) -> rusqlite::Result<(u32, f64, f64, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_entry((id, start_time, end_time, lines): (u32, f64, f64, String)) -> Result<SubtitleEntry> {
    Ok(SubtitleEntry::new(
        id,
        TimeFrame::new(start_time, end_time),
        serde_json::from_str(&lines)?,
    ))
}

fn video_id_for(connection: &Connection, youtube_video_id: &str) -> Result<Option<i64>> {
    Ok(connection
        .query_row(
            "SELECT id FROM videos WHERE youtube_video_id = ?1",
            params![youtube_video_id],
            |row| row.get(0),
        )
        .optional()?)
}

fn insert_entries(transaction: &Transaction<'_>, video_id: i64, entries: &[SubtitleEntry]) -> Result<()> {
    let mut statement = transaction.prepare(
        "INSERT INTO subtitle_entries (video_id, position, entry_id, start_time, end_time, lines)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (position, entry) in entries.iter().enumerate() {
        statement.execute(params![
            video_id,
            position as i64,
            entry.id,
            entry.time_frame.start_time,
            entry.time_frame.end_time,
            serde_json::to_string(&entry.lines)?,
        ])?;
    }
    Ok(())
}

fn select_entries(connection: &Connection, video_id: i64, first: i64, last: i64) -> Result<Vec<SubtitleEntry>> {
    let mut statement = connection.prepare(
        "SELECT entry_id, start_time, end_time, lines FROM subtitle_entries
         WHERE video_id = ?1 AND position BETWEEN ?2 AND ?3
         ORDER BY position",
    )?;
    let rows = statement.query_map(params![video_id, first, last], read_entry)?;
    rows.map(|row| into_entry(row?)).collect()
}

#[async_trait]
impl VideoStore for SqliteVideoStore {
    async fn save(&self, video: NewVideo) -> Result<i64> {
        let entries = parse_srt(&video.raw_subtitle_text)?;

        self.run(move |connection| {
            let transaction = connection.transaction()?;
            if video_id_for(&transaction, &video.youtube_video_id)?.is_some() {
                return Err(ContextSearchError::AlreadyExists(format!(
                    "video with youtube id {}",
                    video.youtube_video_id
                )));
            }

            transaction.execute(
                "INSERT INTO videos (youtube_video_id, variety, raw_subtitle_text) VALUES (?1, ?2, ?3)",
                params![video.youtube_video_id, video.variety.as_str(), video.raw_subtitle_text],
            )?;
            let id = transaction.last_insert_rowid();
            insert_entries(&transaction, id, &entries)?;
            transaction.commit()?;

            debug!("💾 Stored video {} with {} subtitle entries", id, entries.len());
            Ok(id)
        })
        .await
    }

    async fn update(&self, video: VideoRecord) -> Result<()> {
        let entries = parse_srt(&video.raw_subtitle_text)?;

        self.run(move |connection| {
            let transaction = connection.transaction()?;
            match video_id_for(&transaction, &video.youtube_video_id)? {
                Some(other) if other != video.id => {
                    return Err(ContextSearchError::AlreadyExists(format!(
                        "video with youtube id {}",
                        video.youtube_video_id
                    )));
                }
                _ => {}
            }

            let updated = transaction.execute(
                "UPDATE videos SET youtube_video_id = ?1, variety = ?2, raw_subtitle_text = ?3 WHERE id = ?4",
                params![
                    video.youtube_video_id,
                    video.variety.as_str(),
                    video.raw_subtitle_text,
                    video.id
                ],
            )?;
            if updated == 0 {
                return Err(ContextSearchError::NotFound(format!("video {}", video.id)));
            }

            transaction.execute(
                "DELETE FROM subtitle_entries WHERE video_id = ?1",
                params![video.id],
            )?;
            insert_entries(&transaction, video.id, &entries)?;
            transaction.commit()?;
            Ok(())
        })
        .await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<VideoRecord>> {
        self.run(move |connection| {
            connection
                .query_row(
                    &format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1"),
                    params![id],
                    read_video,
                )
                .optional()?
                .map(into_record)
                .transpose()
        })
        .await
    }

    async fn find_by_youtube_id(&self, youtube_video_id: &str) -> Result<Option<VideoRecord>> {
        let youtube_video_id = youtube_video_id.to_string();
        self.run(move |connection| {
            connection
                .query_row(
                    &format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE youtube_video_id = ?1"),
                    params![youtube_video_id],
                    read_video,
                )
                .optional()?
                .map(into_record)
                .transpose()
        })
        .await
    }

    async fn delete_by_id(&self, id: i64) -> Result<()> {
        self.run(move |connection| {
            let transaction = connection.transaction()?;
            transaction.execute("DELETE FROM subtitle_entries WHERE video_id = ?1", params![id])?;
            let deleted = transaction.execute("DELETE FROM videos WHERE id = ?1", params![id])?;
            if deleted == 0 {
                return Err(ContextSearchError::NotFound(format!("video {}", id)));
            }
            transaction.commit()?;
            Ok(())
        })
        .await
    }

    async fn find_all(&self) -> Result<Vec<VideoRecord>> {
        self.run(|connection| {
            let mut statement =
                connection.prepare(&format!("SELECT {VIDEO_COLUMNS} FROM videos ORDER BY id"))?;
            let rows = statement.query_map([], read_video)?;
            rows.map(|row| into_record(row?)).collect()
        })
        .await
    }

    async fn find_page(&self, filter: &VideoFilter, page: PageRequest) -> Result<VideoPage> {
        let id = filter.id;
        let youtube_video_id = filter.youtube_video_id.clone();
        let variety = filter.effective_variety().map(|variety| variety.as_str());

        self.run(move |connection| {
            const WHERE: &str = "WHERE (?1 IS NULL OR id = ?1)
                 AND (?2 IS NULL OR youtube_video_id = ?2)
                 AND (?3 IS NULL OR variety = ?3)";

            let total: i64 = connection.query_row(
                &format!("SELECT COUNT(*) FROM videos {WHERE}"),
                params![id, youtube_video_id, variety],
                |row| row.get(0),
            )?;

            let mut statement = connection.prepare(&format!(
                "SELECT {VIDEO_COLUMNS} FROM videos {WHERE} ORDER BY id LIMIT ?4 OFFSET ?5"
            ))?;
            let rows = statement.query_map(
                params![
                    id,
                    youtube_video_id,
                    variety,
                    page.size as i64,
                    page.offset() as i64
                ],
                read_video,
            )?;
            let videos = rows
                .map(|row| into_record(row?))
                .collect::<Result<Vec<_>>>()?;

            Ok(VideoPage {
                videos,
                total: total as u64,
                page: page.page,
                size: page.size,
            })
        })
        .await
    }

    async fn find_subtitle_entries(&self, youtube_video_id: &str) -> Result<Vec<SubtitleEntry>> {
        self.find_subtitle_entry_range(youtube_video_id, 0, usize::MAX).await
    }

    async fn find_subtitles(
        &self,
        youtube_video_ids: &HashSet<String>,
    ) -> Result<HashMap<String, Vec<SubtitleEntry>>> {
        let youtube_video_ids: Vec<String> = youtube_video_ids.iter().cloned().collect();

        self.run(move |connection| {
            let mut subtitles = HashMap::new();
            for youtube_video_id in youtube_video_ids {
                if let Some(video_id) = video_id_for(connection, &youtube_video_id)? {
                    let entries = select_entries(connection, video_id, 0, i64::MAX)?;
                    subtitles.insert(youtube_video_id, entries);
                }
            }
            Ok(subtitles)
        })
        .await
    }

    async fn find_subtitle_entry_range(
        &self,
        youtube_video_id: &str,
        first: usize,
        last: usize,
    ) -> Result<Vec<SubtitleEntry>> {
        let youtube_video_id = youtube_video_id.to_string();
        let first = i64::try_from(first).unwrap_or(i64::MAX);
        let last = i64::try_from(last).unwrap_or(i64::MAX);

        self.run(move |connection| {
            let video_id = video_id_for(connection, &youtube_video_id)?.ok_or_else(|| {
                ContextSearchError::NotFound(format!("video {}", youtube_video_id))
            })?;
            select_entries(connection, video_id, first, last)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SRT: &str = "1
00:00:00,000 --> 00:00:01,500
First line,
second line.

2
00:00:01,500 --> 00:00:02,000


3
00:00:02,000 --> 00:00:03,250
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
    async fn test_entries_survive_storage() {
        let store = SqliteVideoStore::open_in_memory().unwrap();
        store.save(new_video("abc", EnglishVariety::Us)).await.unwrap();

        let entries = store.find_subtitle_entries("abc").await.unwrap();
        assert_eq!(entries, parse_srt(SRT).unwrap());
        assert!(entries[1].is_blank());

        let range = store.find_subtitle_entry_range("abc", 1, 2).await.unwrap();
        assert_eq!(range, entries[1..=2].to_vec());
        assert!(matches!(
            store.find_subtitle_entries("missing").await,
            Err(ContextSearchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_records_crud() {
        let store = SqliteVideoStore::open_in_memory().unwrap();
        let id = store.save(new_video("abc", EnglishVariety::Uk)).await.unwrap();
        let other = store.save(new_video("def", EnglishVariety::Aus)).await.unwrap();

        assert!(matches!(
            store.save(new_video("abc", EnglishVariety::Uk)).await,
            Err(ContextSearchError::AlreadyExists(_))
        ));

        let mut record = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.variety, EnglishVariety::Uk);

        record.youtube_video_id = "def".to_string();
        assert!(matches!(
            store.update(record.clone()).await,
            Err(ContextSearchError::AlreadyExists(_))
        ));

        record.youtube_video_id = "ghi".to_string();
        record.raw_subtitle_text = "1\n00:00:00,000 --> 00:00:01,000\nOnly.\n".to_string();
        store.update(record.clone()).await.unwrap();
        assert_eq!(store.find_by_youtube_id("ghi").await.unwrap(), Some(record));
        assert_eq!(store.find_subtitle_entries("ghi").await.unwrap().len(), 1);

        store.delete_by_id(other).await.unwrap();
        assert!(matches!(
            store.delete_by_id(other).await,
            Err(ContextSearchError::NotFound(_))
        ));
        assert_eq!(store.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_of_unknown_video() {
        let store = SqliteVideoStore::open_in_memory().unwrap();
        let record = VideoRecord {
            id: 42,
            youtube_video_id: "abc".to_string(),
            variety: EnglishVariety::Uk,
            raw_subtitle_text: SRT.to_string(),
        };

        assert!(matches!(
            store.update(record).await,
            Err(ContextSearchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_filtered_pages() {
        let store = SqliteVideoStore::open_in_memory().unwrap();
        for (i, variety) in [
            EnglishVariety::Uk,
            EnglishVariety::Us,
            EnglishVariety::Uk,
            EnglishVariety::Uk,
        ]
        .into_iter()
        .enumerate()
        {
            store.save(new_video(&format!("v{}", i), variety)).await.unwrap();
        }

        let uk = VideoFilter {
            variety: Some(EnglishVariety::Uk),
            ..Default::default()
        };
        let page = store.find_page(&uk, PageRequest::new(1, 2)).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.videos.len(), 1);
        assert_eq!(page.videos[0].youtube_video_id, "v3");

        let everything = VideoFilter {
            variety: Some(EnglishVariety::All),
            ..Default::default()
        };
        assert_eq!(store.find_page(&everything, PageRequest::default()).await.unwrap().total, 4);

        let by_youtube_id = VideoFilter {
            youtube_video_id: Some("v1".to_string()),
            ..Default::default()
        };
        let page = store.find_page(&by_youtube_id, PageRequest::default()).await.unwrap();
        assert_eq!(page.videos[0].variety, EnglishVariety::Us);
    }

    #[tokio::test]
    async fn test_database_file_is_reopened() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("videos.sqlite3");

        {
            let store = SqliteVideoStore::open(&path).unwrap();
            store.save(new_video("abc", EnglishVariety::Uk)).await.unwrap();
        }

        let store = SqliteVideoStore::open(&path).unwrap();
        let ids = HashSet::from(["abc".to_string()]);
        let subtitles = store.find_subtitles(&ids).await.unwrap();
        assert_eq!(subtitles["abc"].len(), 3);
    }
}
