use crate::error::TrackerError;
use crate::event::{video_key, StageStatus};
use crate::stage::{StageId, StageRef};
use crate::store::TrackerStore;
use chrono::Utc;
use tracing::info;

/// Write side of the log: appends events and registers roster videos.
pub struct EventStore<'a, S: TrackerStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: TrackerStore + ?Sized> EventStore<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn record_event(
        &self,
        video: &str,
        stage: impl StageRef,
        status: StageStatus,
    ) -> Result<(StageId, i64), TrackerError> {
        let stage = stage.resolve(self.store.catalog())?;
        let video = video_key(video)?;
        let id = self.store.append_event(video, stage, status, Utc::now())?;
        info!(
            event = "stage_event_recorded",
            video,
            stage = %stage,
            status = %status,
            id
        );
        Ok((stage, id))
    }

    /// Returns how many of `videos` were not registered before. Names are
    /// trimmed; a blank name fails the whole batch before anything is written.
    pub fn register_videos(&self, videos: &[String]) -> Result<usize, TrackerError> {
        let videos = videos
            .iter()
            .map(|video| video_key(video).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;
        let inserted = self.store.insert_videos(&videos)?;
        info!(
            event = "videos_registered",
            requested = videos.len(),
            inserted
        );
        Ok(inserted)
    }
}
