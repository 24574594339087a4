use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior,
};
use stagegate_core::{
    ProjectionFold, StageCatalog, StageEvent, StageFlags, StageId, StageStatus, TrackerError,
    TrackerStore, VideoSummary,
};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const TRACKER_SCHEMA_VERSION: i64 = 1;
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

impl From<StorageError> for TrackerError {
    fn from(err: StorageError) -> Self {
        TrackerError::StoreUnavailable(err.to_string())
    }
}

/// SQLite-backed tracker store. Each process opens its own connection; the
/// database file is the only shared state.
pub struct SqliteStore {
    conn: Connection,
    catalog: StageCatalog,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, catalog: StageCatalog) -> Result<Self, StorageError> {
        Self::open_with_timeout(path, catalog, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(
        path: impl AsRef<Path>,
        catalog: StageCatalog,
        busy_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(event = "store_opened", journal_mode = %mode);
        let store = Self { conn, catalog };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory(catalog: StageCatalog) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn, catalog };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    /// Brings the schema up to date and adds a summary column for every
    /// catalog stage that does not have one yet. Runs under a write lock so
    /// processes opening a fresh file at the same time do not collide.
    pub fn migrate(&self) -> Result<(), StorageError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let current: i64 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if current > TRACKER_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: TRACKER_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            tx.execute_batch(include_str!("../migrations/0001_stage_tracker.sql"))?;
            tx.execute("PRAGMA user_version = 1", []).map(|_| ())?;
        }

        let existing = summary_columns(&tx)?;
        for stage in self.catalog.iter() {
            let column = stage.column();
            if existing.contains(&column) {
                continue;
            }
            tx.execute(
                &format!(
                    "ALTER TABLE stage_summary ADD COLUMN {column} INTEGER NOT NULL DEFAULT 0"
                ),
                [],
            )?;
            debug!(event = "summary_column_added", column = %column);
        }

        tx.commit()?;
        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn summary_columns(&self) -> Result<Vec<String>, StorageError> {
        summary_columns(&self.conn)
    }

    pub fn event_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM stage_events", [], |row| row.get(0))?)
    }

    fn try_append_event(
        &self,
        video: &str,
        stage: StageId,
        status: StageStatus,
        changed_at: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        self.conn.execute(
            "
            INSERT INTO stage_events (video_name, stage, status, changed_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![
                video,
                stage.column(),
                status.as_i64(),
                changed_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn try_insert_videos(&self, videos: &[String]) -> Result<usize, StorageError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let mut inserted = 0;
        {
            let mut statement =
                tx.prepare("INSERT OR IGNORE INTO stage_summary (video_name) VALUES (?1)")?;
            for video in videos {
                inserted += statement.execute([video])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn try_project_with(
        &self,
        video: &str,
        fold: ProjectionFold<'_>,
    ) -> Result<StageFlags, StorageError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT OR IGNORE INTO stage_summary (video_name) VALUES (?1)",
            [video],
        )?;
        let history = load_events(&tx, &self.catalog, video)?;
        let flags = fold(&history);

        let assignments = self
            .catalog
            .iter()
            .map(|stage| format!("{} = ?{}", stage.column(), stage.ordinal()))
            .collect::<Vec<String>>()
            .join(", ");
        let sql = format!(
            "UPDATE stage_summary SET {assignments} WHERE video_name = ?{}",
            self.catalog.len() + 1
        );
        let mut values: Vec<Value> = self
            .catalog
            .iter()
            .map(|stage| Value::Integer(i64::from(flags.get(stage))))
            .collect();
        values.push(Value::Text(video.to_string()));
        tx.execute(&sql, params_from_iter(values))?;

        tx.commit()?;
        Ok(flags)
    }

    fn try_stage_flag(&self, video: &str, stage: StageId) -> Result<Option<bool>, StorageError> {
        let sql = format!(
            "SELECT {} FROM stage_summary WHERE video_name = ?1",
            stage.column()
        );
        let flag = self
            .conn
            .query_row(&sql, [video], |row| row.get::<_, i64>(0))
            .optional()?;
        Ok(flag.map(|value| value != 0))
    }

    fn try_summaries(&self, video: Option<&str>) -> Result<Vec<VideoSummary>, StorageError> {
        let columns = self
            .catalog
            .iter()
            .map(StageId::column)
            .collect::<Vec<String>>()
            .join(", ");
        let filter = if video.is_some() {
            "WHERE video_name = ?1"
        } else {
            ""
        };
        let sql = format!(
            "SELECT video_name, {columns} FROM stage_summary {filter} ORDER BY video_name ASC"
        );
        let stage_count = self.catalog.len();
        let mut statement = self.conn.prepare(&sql)?;
        let read_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<VideoSummary> {
            let mut flags = Vec::with_capacity(stage_count);
            for index in 0..stage_count {
                flags.push(row.get::<_, i64>(index + 1)? != 0);
            }
            Ok(VideoSummary {
                video: row.get(0)?,
                flags: StageFlags::from_vec(flags),
            })
        };
        let rows = match video {
            Some(video) => statement.query_map([video], read_row)?,
            None => statement.query_map([], read_row)?,
        };

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }
}

impl TrackerStore for SqliteStore {
    fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    fn append_event(
        &self,
        video: &str,
        stage: StageId,
        status: StageStatus,
        changed_at: DateTime<Utc>,
    ) -> Result<i64, TrackerError> {
        Ok(self.try_append_event(video, stage, status, changed_at)?)
    }

    fn insert_videos(&self, videos: &[String]) -> Result<usize, TrackerError> {
        Ok(self.try_insert_videos(videos)?)
    }

    fn project_with(
        &self,
        video: &str,
        fold: ProjectionFold<'_>,
    ) -> Result<StageFlags, TrackerError> {
        Ok(self.try_project_with(video, fold)?)
    }

    fn stage_flag(&self, video: &str, stage: StageId) -> Result<Option<bool>, TrackerError> {
        Ok(self.try_stage_flag(video, stage)?)
    }

    fn summary(&self, video: &str) -> Result<Option<VideoSummary>, TrackerError> {
        Ok(self.try_summaries(Some(video))?.into_iter().next())
    }

    fn summaries(&self) -> Result<Vec<VideoSummary>, TrackerError> {
        Ok(self.try_summaries(None)?)
    }

    fn events_for_video(&self, video: &str) -> Result<Vec<StageEvent>, TrackerError> {
        Ok(load_events(&self.conn, &self.catalog, video)?)
    }
}

fn summary_columns(conn: &Connection) -> Result<Vec<String>, StorageError> {
    let mut statement = conn.prepare("SELECT name FROM pragma_table_info('stage_summary')")?;
    let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}

/// Rows whose stage is not part of `catalog` (hand edits, a shrunk catalog)
/// are skipped; they cannot contribute to any flag the catalog knows.
fn load_events(
    conn: &Connection,
    catalog: &StageCatalog,
    video: &str,
) -> Result<Vec<StageEvent>, StorageError> {
    let mut statement = conn.prepare(
        "
        SELECT id, video_name, stage, status, changed_at
        FROM stage_events
        WHERE video_name = ?1
        ORDER BY id ASC
        ",
    )?;
    let rows = statement.query_map([video], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let (id, video_name, stage_raw, status_raw, changed_at_raw) = row?;
        let Ok(stage) = catalog.parse(&stage_raw) else {
            warn!(event = "event_stage_skipped", id, stage = %stage_raw);
            continue;
        };
        let status = StageStatus::from_i64(status_raw).ok_or_else(|| {
            StorageError::Corrupt(format!("event {id} has status {status_raw}"))
        })?;
        events.push(StageEvent {
            id,
            video: video_name,
            stage,
            status,
            changed_at: parse_timestamp(&changed_at_raw)?,
        });
    }
    Ok(events)
}

/// RFC 3339, or SQLite's `CURRENT_TIMESTAMP` form for rows written by hand.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|err| StorageError::Timestamp(format!("{value:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagegate_core::Tracker;
    use tempfile::NamedTempFile;

    fn tracker() -> Tracker<SqliteStore> {
        Tracker::new(SqliteStore::open_in_memory(StageCatalog::reference()).expect("open db"))
    }

    #[test]
    fn migration_creates_tracker_tables() {
        let store = SqliteStore::open_in_memory(StageCatalog::reference()).expect("open db");

        for table in ["stage_events", "stage_summary"] {
            assert!(store.table_exists(table).expect("table check"));
        }
        assert_eq!(
            store.schema_version().expect("schema version"),
            TRACKER_SCHEMA_VERSION
        );
        let columns = store.summary_columns().expect("columns");
        assert_eq!(columns.first().map(String::as_str), Some("video_name"));
        assert!(columns.contains(&"step_8".to_string()));
        assert_eq!(columns.len(), 9);
    }

    #[test]
    fn composite_and_batch_gating_on_sqlite() {
        let tracker = tracker();
        tracker.initialize(["rec01", "rec02"]).expect("init");
        assert!(!tracker.is_complete("step_1", &["rec01"]).expect("gate"));

        tracker.complete_stage("rec01", "step_1").expect("complete");
        assert!(tracker.is_complete("step_1", &["rec01"]).expect("gate"));
        assert!(!tracker.is_complete("step_2", &["rec01"]).expect("gate"));
        assert!(!tracker
            .is_complete("step_1", &["rec01", "rec02"])
            .expect("gate"));

        tracker.complete_stage("rec02", "step_1").expect("complete");
        assert!(tracker
            .is_complete("step_1", &["rec01", "rec02"])
            .expect("gate"));
    }

    #[test]
    fn padded_name_is_stored_and_gated_as_one_video() {
        let tracker = tracker();
        tracker.initialize([" rec01 "]).expect("init");
        tracker.complete_stage("rec01\t", "step_1").expect("complete");

        assert!(tracker.is_complete("step_1", &[" rec01 "]).expect("gate"));
        assert_eq!(tracker.summaries().expect("summaries").len(), 1);
        assert_eq!(tracker.history(" rec01").expect("history").len(), 1);
        assert!(tracker.project("  ").is_err());
        assert_eq!(tracker.summaries().expect("summaries").len(), 1);
    }

    #[test]
    fn unknown_video_is_reported() {
        let tracker = tracker();
        assert_eq!(
            tracker
                .is_complete("step_1", &["ghost"])
                .expect_err("ghost unknown"),
            TrackerError::UnknownVideo("ghost".to_string())
        );
    }

    #[test]
    fn incomplete_event_is_logged_without_clearing_flag() {
        let tracker = tracker();
        tracker.initialize(["rec01"]).expect("init");
        tracker.complete_stage("rec01", 3u8).expect("complete");
        tracker
            .record_and_project("rec01", 3u8, StageStatus::Incomplete)
            .expect("record incomplete");

        assert!(tracker.is_complete(3u8, &["rec01"]).expect("gate"));
        let history = tracker.history("rec01").expect("history");
        assert_eq!(history.len(), 2);
        assert!(history[0].id < history[1].id);
        assert_eq!(history[1].status, StageStatus::Incomplete);
        assert_eq!(history[1].stage.column(), "step_3");
    }

    #[test]
    fn reinitialize_keeps_existing_flags() {
        let tracker = tracker();
        let first = tracker.initialize(["rec01"]).expect("init");
        assert_eq!(first.inserted, 1);
        tracker.complete_stage("rec01", 1u8).expect("complete");

        let second = tracker.initialize(["rec01"]).expect("re-init");
        assert_eq!(second.inserted, 0);
        assert!(tracker.is_complete(1u8, &["rec01"]).expect("gate"));
    }

    #[test]
    fn projection_is_idempotent_on_sqlite() {
        let tracker = tracker();
        tracker
            .record_event("rec01", 5u8, StageStatus::Complete)
            .expect("append");
        let first = tracker.project("rec01").expect("first");
        let second = tracker.project("rec01").expect("second");
        assert_eq!(first, second);
        assert_eq!(
            tracker.summary("rec01").expect("summary").flags,
            first
        );
    }

    #[test]
    fn state_survives_reopen() {
        let file = NamedTempFile::new().expect("temp file");
        {
            let tracker = Tracker::new(
                SqliteStore::open(file.path(), StageCatalog::reference()).expect("open db"),
            );
            tracker.initialize(["rec01"]).expect("init");
            tracker.complete_stage("rec01", 2u8).expect("complete");
        }

        let reopened = Tracker::new(
            SqliteStore::open(file.path(), StageCatalog::reference()).expect("reopen db"),
        );
        assert!(reopened.is_complete(2u8, &["rec01"]).expect("gate"));
        assert_eq!(reopened.history("rec01").expect("history").len(), 1);
    }

    #[test]
    fn longer_catalog_adds_columns_and_keeps_flags() {
        let file = NamedTempFile::new().expect("temp file");
        let short = StageCatalog::new(["ingest", "frame_interpolation"]).expect("catalog");
        {
            let tracker =
                Tracker::new(SqliteStore::open(file.path(), short).expect("open short"));
            tracker.initialize(["rec01"]).expect("init");
            tracker.complete_stage("rec01", 2u8).expect("complete");
        }

        let store = SqliteStore::open(file.path(), StageCatalog::reference()).expect("open long");
        assert_eq!(store.summary_columns().expect("columns").len(), 9);
        let tracker = Tracker::new(store);
        assert!(tracker.is_complete(2u8, &["rec01"]).expect("gate"));
        assert!(!tracker.is_complete(8u8, &["rec01"]).expect("gate"));
    }

    #[test]
    fn newer_schema_version_is_rejected() {
        let file = NamedTempFile::new().expect("temp file");
        {
            let conn = Connection::open(file.path()).expect("raw open");
            conn.execute("PRAGMA user_version = 99", []).expect("bump version");
        }
        let err = SqliteStore::open(file.path(), StageCatalog::reference())
            .err()
            .expect("version 99 unsupported");
        assert!(matches!(
            err,
            StorageError::UnsupportedSchemaVersion { found: 99, .. }
        ));
        assert!(TrackerError::from(err).is_store_unavailable());
    }

    #[test]
    fn hand_written_rows_are_replayed() {
        let store = SqliteStore::open_in_memory(StageCatalog::reference()).expect("open db");
        store
            .conn
            .execute_batch(
                "
                INSERT INTO stage_events (video_name, stage, status, changed_at)
                VALUES ('rec01', 'step_4', 1, '2025-01-14 09:30:00');
                INSERT INTO stage_events (video_name, stage, status)
                VALUES ('rec01', 'step_6', 1);
                INSERT INTO stage_events (video_name, stage, status)
                VALUES ('rec01', 'step_42', 1);
                ",
            )
            .expect("manual inserts");
        let tracker = Tracker::new(store);

        let flags = tracker.project("rec01").expect("project");
        assert_eq!(flags.completed_count(), 2);
        assert!(flags.get(tracker.catalog().stage(4).expect("stage 4")));
        assert!(flags.get(tracker.catalog().stage(6).expect("stage 6")));
        assert_eq!(tracker.history("rec01").expect("history").len(), 2);
    }

    #[test]
    fn concurrent_writers_do_not_lose_events() {
        let file = NamedTempFile::new().expect("temp file");
        let path = file.path().to_path_buf();
        Tracker::new(SqliteStore::open(&path, StageCatalog::reference()).expect("open db"))
            .initialize(["rec01", "rec02"])
            .expect("init");

        let workers: Vec<_> = (0..4u8)
            .map(|worker| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let tracker = Tracker::new(
                        SqliteStore::open(&path, StageCatalog::reference()).expect("open db"),
                    );
                    let video = if worker % 2 == 0 { "rec01" } else { "rec02" };
                    for round in 0..10u8 {
                        let stage = (worker + round) % 8 + 1;
                        tracker.complete_stage(video, stage).expect("complete");
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker finished");
        }

        let store = SqliteStore::open(&path, StageCatalog::reference()).expect("reopen db");
        assert_eq!(store.event_count().expect("count"), 40);
        let tracker = Tracker::new(store);
        for video in ["rec01", "rec02"] {
            assert_eq!(
                tracker.summary(video).expect("summary").completed_count(),
                8,
                "{video} should have every stage complete"
            );
        }
    }
}
