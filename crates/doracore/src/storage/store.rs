//! Connection-pooled persistence layer (§4.B).
//!
//! One `r2d2`-pooled `rusqlite` connection pool shared across workers; every
//! public method runs its query on `spawn_blocking`. The pool is `Clone` and
//! cheap to share; serialization happens at SQLite's own connection
//! boundary, which is not a bottleneck at the I/O rates this system sees.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OptionalExtension;

use crate::error::{EngineError, EngineResult};
use crate::types::{DownloadedFile, MediaKind, Transcription, User};

#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open (creating if absent) the database at `path` and run pending
    /// migrations. Migrations run on the opening connection before any
    /// request is accepted (§9 open question: preserve this ordering).
    pub fn open(path: &Path) -> EngineResult<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;"));
        let pool = Pool::builder().max_size(8).build(manager).map_err(EngineError::DatabasePool)?;

        let mut conn = pool.get().map_err(EngineError::DatabasePool)?;
        super::migrations::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| EngineError::Config(format!("migration failed: {e}")))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> EngineResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(EngineError::DatabasePool)?;
        let mut conn = pool.get().map_err(EngineError::DatabasePool)?;
        super::migrations::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| EngineError::Config(format!("migration failed: {e}")))?;
        Ok(Self { pool })
    }

    async fn blocking<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(EngineError::DatabasePool)?;
            f(&conn)
        })
        .await
        .map_err(|e| EngineError::Other(e.into()))?
    }

    /// Insert-ignore on transport id (§4.B).
    pub async fn upsert_user(&self, user: &User) -> EngineResult<()> {
        let user = user.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO users (transport_user_id, username, first_name, last_name, locale, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(transport_user_id) DO NOTHING",
                rusqlite::params![
                    user.transport_user_id,
                    user.username,
                    user.first_name,
                    user.last_name,
                    user.locale,
                    user.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Return `(transport_ids, media_kind)` for a canonical url, parsing
    /// `transport_ids` whether it was serialized as a bare string or a JSON
    /// array (§9: reads either shape, writes only the list form).
    pub async fn get_cache(&self, url: &str) -> EngineResult<Option<(Vec<String>, MediaKind)>> {
        let url = url.to_string();
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT transport_ids, media_kind FROM file_cache WHERE url = ?1",
                    [&url],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            Ok(row.map(|(ids, kind)| (parse_transport_ids(&ids), MediaKind::from_str(&kind))))
        })
        .await
    }

    pub async fn get_cache_by_id(&self, id: i64) -> EngineResult<Option<(Vec<String>, MediaKind)>> {
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT transport_ids, media_kind FROM file_cache WHERE id = ?1",
                    [id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            Ok(row.map(|(ids, kind)| (parse_transport_ids(&ids), MediaKind::from_str(&kind))))
        })
        .await
    }

    /// Upsert by url; if `ids.len() > 1` the kind is coerced to carousel.
    /// Returns the row id.
    pub async fn save_cache(
        &self,
        url: &str,
        ids: &[String],
        kind: MediaKind,
        uploader_id: i64,
    ) -> EngineResult<i64> {
        let url = url.to_string();
        let kind = kind.coerce_for_count(ids.len());
        let ids_json = serde_json::to_string(ids).expect("string vec always serializes");
        let now = Utc::now().to_rfc3339();

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO file_cache (url, transport_ids, media_kind, uploader_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(url) DO UPDATE SET \
                   transport_ids = excluded.transport_ids, \
                   media_kind = excluded.media_kind, \
                   uploader_id = excluded.uploader_id",
                rusqlite::params![url, ids_json, kind.as_str(), uploader_id, now],
            )?;
            conn.query_row("SELECT id FROM file_cache WHERE url = ?1", [&url], |row| row.get(0))
                .map_err(EngineError::from)
        })
        .await
    }

    /// Look up the primary key for a url; used to build deep links (§4.H action menu).
    pub async fn cache_id_of(&self, url: &str) -> EngineResult<Option<i64>> {
        let url = url.to_string();
        self.blocking(move |conn| {
            conn.query_row("SELECT id FROM file_cache WHERE url = ?1", [&url], |row| row.get(0))
                .optional()
                .map_err(EngineError::from)
        })
        .await
    }

    pub async fn save_transcription(&self, source_unique_id: &str, user_id: i64, text: &str) -> EngineResult<()> {
        let source_unique_id = source_unique_id.to_string();
        let text = text.to_string();
        let now = Utc::now().to_rfc3339();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO transcriptions (source_unique_id, user_id, text, created_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(source_unique_id) DO UPDATE SET text = excluded.text",
                rusqlite::params![source_unique_id, user_id, text, now],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_transcription(&self, source_unique_id: &str) -> EngineResult<Option<Transcription>> {
        let source_unique_id = source_unique_id.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, source_unique_id, user_id, text, created_at FROM transcriptions WHERE source_unique_id = ?1",
                [&source_unique_id],
                row_to_transcription,
            )
            .optional()
            .map_err(EngineError::from)
        })
        .await
    }

    pub async fn get_user_transcriptions(&self, user_id: i64) -> EngineResult<Vec<Transcription>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, source_unique_id, user_id, text, created_at FROM transcriptions \
                 WHERE user_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([user_id], row_to_transcription)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(EngineError::from)
        })
        .await
    }

    pub async fn save_downloaded_file(&self, file: &DownloadedFile) -> EngineResult<i64> {
        let file = file.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO downloaded_files \
                 (url, file_path, size, file_type, media_kind, task_dir, downloaded_at, expires_at, cache_ref) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(url) DO UPDATE SET \
                   file_path = excluded.file_path, size = excluded.size, \
                   expires_at = excluded.expires_at, cache_ref = excluded.cache_ref",
                rusqlite::params![
                    file.url,
                    file.file_path.to_string_lossy().to_string(),
                    file.size_bytes as i64,
                    file.file_type,
                    file.media_kind.as_str(),
                    file.task_dir.to_string_lossy().to_string(),
                    file.downloaded_at.to_rfc3339(),
                    file.expires_at.to_rfc3339(),
                    file.cache_ref,
                ],
            )?;
            conn.query_row("SELECT id FROM downloaded_files WHERE url = ?1", [&file.url], |row| row.get(0))
                .map_err(EngineError::from)
        })
        .await
    }

    pub async fn get_downloaded_file(&self, url: &str) -> EngineResult<Option<DownloadedFile>> {
        let url = url.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, url, file_path, size, file_type, media_kind, task_dir, downloaded_at, expires_at, cache_ref \
                 FROM downloaded_files WHERE url = ?1",
                [&url],
                row_to_downloaded_file,
            )
            .optional()
            .map_err(EngineError::from)
        })
        .await
    }

    pub async fn delete_downloaded_file(&self, url: &str) -> EngineResult<()> {
        let url = url.to_string();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM downloaded_files WHERE url = ?1", [&url])?;
            Ok(())
        })
        .await
    }

    /// Purge rows whose `expires_at < now()`, returning the file and task-dir
    /// paths the caller must remove from disk. Returns the purge count.
    pub async fn cleanup_expired_files(&self) -> EngineResult<Vec<(PathBuf, PathBuf)>> {
        let now = Utc::now().to_rfc3339();
        self.blocking(move |conn| {
            let mut stmt =
                conn.prepare("SELECT file_path, task_dir FROM downloaded_files WHERE expires_at < ?1")?;
            let paths: Vec<(PathBuf, PathBuf)> = stmt
                .query_map([&now], |row| {
                    Ok((PathBuf::from(row.get::<_, String>(0)?), PathBuf::from(row.get::<_, String>(1)?)))
                })?
                .collect::<Result<_, _>>()?;

            conn.execute("DELETE FROM downloaded_files WHERE expires_at < ?1", [&now])?;
            Ok(paths)
        })
        .await
    }
}

fn parse_transport_ids(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_else(|_| vec![raw.to_string()])
}

fn row_to_transcription(row: &rusqlite::Row) -> rusqlite::Result<Transcription> {
    let created_at: String = row.get(4)?;
    Ok(Transcription {
        id: row.get(0)?,
        source_unique_id: row.get(1)?,
        user_id: row.get(2)?,
        text: row.get(3)?,
        created_at: parse_rfc3339(&created_at),
    })
}

fn row_to_downloaded_file(row: &rusqlite::Row) -> rusqlite::Result<DownloadedFile> {
    let media_kind: String = row.get(5)?;
    let downloaded_at: String = row.get(7)?;
    let expires_at: String = row.get(8)?;
    Ok(DownloadedFile {
        id: row.get(0)?,
        url: row.get(1)?,
        file_path: PathBuf::from(row.get::<_, String>(2)?),
        size_bytes: row.get::<_, i64>(3)? as u64,
        file_type: row.get(4)?,
        media_kind: MediaKind::from_str(&media_kind),
        task_dir: PathBuf::from(row.get::<_, String>(6)?),
        downloaded_at: parse_rfc3339(&downloaded_at),
        expires_at: parse_rfc3339(&expires_at),
        cache_ref: row.get(9)?,
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: 0,
            transport_user_id: 42,
            username: Some("stan".to_string()),
            first_name: Some("Stan".to_string()),
            last_name: None,
            locale: Some("en".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_user_is_insert_ignore() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_user(&sample_user()).await.unwrap();
        store.upsert_user(&sample_user()).await.unwrap();
    }

    #[tokio::test]
    async fn save_cache_coerces_kind_to_carousel_for_multiple_ids() {
        let store = Store::open_in_memory().unwrap();
        let ids = vec!["p1".to_string(), "p2".to_string(), "p3".to_string()];
        store.save_cache("https://x/reel/ABC", &ids, MediaKind::Photo, 1).await.unwrap();

        let (got_ids, kind) = store.get_cache("https://x/reel/ABC").await.unwrap().unwrap();
        assert_eq!(got_ids, ids);
        assert_eq!(kind, MediaKind::Carousel);
    }

    #[tokio::test]
    async fn save_cache_upsert_converges_on_one_row() {
        let store = Store::open_in_memory().unwrap();
        let id1 = store
            .save_cache("https://x/reel/ABC", &["v1".to_string()], MediaKind::Video, 1)
            .await
            .unwrap();
        let id2 = store
            .save_cache("https://x/reel/ABC", &["v1".to_string()], MediaKind::Video, 2)
            .await
            .unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn get_cache_parses_legacy_bare_string_ids() {
        let store = Store::open_in_memory().unwrap();
        store
            .blocking(|conn| {
                conn.execute(
                    "INSERT INTO file_cache (url, transport_ids, media_kind, uploader_id, created_at) \
                     VALUES ('https://legacy', 'vid-1', 'video', 1, '2024-01-01T00:00:00Z')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let (ids, kind) = store.get_cache("https://legacy").await.unwrap().unwrap();
        assert_eq!(ids, vec!["vid-1".to_string()]);
        assert_eq!(kind, MediaKind::Video);
    }

    #[tokio::test]
    async fn transcription_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.save_transcription("uid-1", 7, "hello world").await.unwrap();
        let got = store.get_transcription("uid-1").await.unwrap().unwrap();
        assert_eq!(got.text, "hello world");
        assert_eq!(got.user_id, 7);
    }

    #[tokio::test]
    async fn cleanup_expired_files_purges_and_reports_paths() {
        let store = Store::open_in_memory().unwrap();
        let file = DownloadedFile {
            id: 0,
            url: "https://x/1".to_string(),
            file_path: PathBuf::from("/tmp/x/1.mp4"),
            size_bytes: 10,
            file_type: "mp4".to_string(),
            media_kind: MediaKind::Video,
            task_dir: PathBuf::from("/tmp/x"),
            downloaded_at: Utc::now() - chrono::Duration::hours(30),
            expires_at: Utc::now() - chrono::Duration::hours(6),
            cache_ref: None,
        };
        store.save_downloaded_file(&file).await.unwrap();

        let purged = store.cleanup_expired_files().await.unwrap();
        assert_eq!(purged.len(), 1);
        assert!(store.get_downloaded_file("https://x/1").await.unwrap().is_none());
    }
}
