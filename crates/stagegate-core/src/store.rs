use crate::error::TrackerError;
use crate::event::{StageEvent, StageStatus};
use crate::stage::{StageCatalog, StageId};
use crate::summary::{StageFlags, VideoSummary};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Pure function from one video's full history to its flags.
pub type ProjectionFold<'a> = &'a dyn Fn(&[StageEvent]) -> StageFlags;

/// Persistence seam for the tracker. Every mutating method is one atomic
/// unit of work against the backing store; implementations report any
/// backend failure as [`TrackerError::StoreUnavailable`].
pub trait TrackerStore {
    fn catalog(&self) -> &StageCatalog;

    /// Appends one event and returns its sequence id.
    fn append_event(
        &self,
        video: &str,
        stage: StageId,
        status: StageStatus,
        changed_at: DateTime<Utc>,
    ) -> Result<i64, TrackerError>;

    /// Insert-if-absent; returns how many rows were new.
    fn insert_videos(&self, videos: &[String]) -> Result<usize, TrackerError>;

    /// In one transaction: ensure the summary row exists, read the complete
    /// history of `video`, run `fold` over it and overwrite every flag.
    fn project_with(&self, video: &str, fold: ProjectionFold<'_>)
        -> Result<StageFlags, TrackerError>;

    /// `None` when the video has no summary row.
    fn stage_flag(&self, video: &str, stage: StageId) -> Result<Option<bool>, TrackerError>;

    fn summary(&self, video: &str) -> Result<Option<VideoSummary>, TrackerError>;

    /// All summary rows ordered by video name.
    fn summaries(&self) -> Result<Vec<VideoSummary>, TrackerError>;

    /// History of one video in sequence-id order.
    fn events_for_video(&self, video: &str) -> Result<Vec<StageEvent>, TrackerError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    events: Vec<StageEvent>,
    summaries: BTreeMap<String, StageFlags>,
}

/// In-process store with the same observable behavior as the SQLite one.
#[derive(Debug)]
pub struct MemoryStore {
    catalog: StageCatalog,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(catalog: StageCatalog) -> Self {
        Self {
            catalog,
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..MemoryState::default()
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, TrackerError> {
        self.state
            .lock()
            .map_err(|_| TrackerError::StoreUnavailable("memory store lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StageCatalog::reference())
    }
}

impl TrackerStore for MemoryStore {
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
        let mut state = self.lock()?;
        let id = state.next_id;
        state.next_id += 1;
        state.events.push(StageEvent {
            id,
            video: video.to_string(),
            stage,
            status,
            changed_at,
        });
        Ok(id)
    }

    fn insert_videos(&self, videos: &[String]) -> Result<usize, TrackerError> {
        let stage_count = self.catalog.len();
        let mut state = self.lock()?;
        let mut inserted = 0;
        for video in videos {
            if !state.summaries.contains_key(video) {
                state
                    .summaries
                    .insert(video.clone(), StageFlags::pending(stage_count));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn project_with(
        &self,
        video: &str,
        fold: ProjectionFold<'_>,
    ) -> Result<StageFlags, TrackerError> {
        let mut state = self.lock()?;
        let history: Vec<StageEvent> = state
            .events
            .iter()
            .filter(|event| event.video == video)
            .cloned()
            .collect();
        let flags = fold(&history);
        state.summaries.insert(video.to_string(), flags.clone());
        Ok(flags)
    }

    fn stage_flag(&self, video: &str, stage: StageId) -> Result<Option<bool>, TrackerError> {
        let state = self.lock()?;
        Ok(state.summaries.get(video).map(|flags| flags.get(stage)))
    }

    fn summary(&self, video: &str) -> Result<Option<VideoSummary>, TrackerError> {
        let state = self.lock()?;
        Ok(state.summaries.get(video).map(|flags| VideoSummary {
            video: video.to_string(),
            flags: flags.clone(),
        }))
    }

    fn summaries(&self) -> Result<Vec<VideoSummary>, TrackerError> {
        let state = self.lock()?;
        Ok(state
            .summaries
            .iter()
            .map(|(video, flags)| VideoSummary {
                video: video.clone(),
                flags: flags.clone(),
            })
            .collect())
    }

    fn events_for_video(&self, video: &str) -> Result<Vec<StageEvent>, TrackerError> {
        let state = self.lock()?;
        Ok(state
            .events
            .iter()
            .filter(|event| event.video == video)
            .cloned()
            .collect())
    }
}
