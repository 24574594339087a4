use crate::error::TrackerError;
use crate::event::video_key;
use crate::stage::{StageId, StageRef};
use crate::store::TrackerStore;
use tracing::debug;

/// Read-only admission checks against the materialized summary. Never
/// touches the event log, so cost is one row lookup per video.
pub struct GateChecker<'a, S: TrackerStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: TrackerStore + ?Sized> GateChecker<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// True iff `stage` is complete for every listed video. An empty list is
    /// vacuously complete.
    pub fn is_complete<V: AsRef<str>>(
        &self,
        stage: impl StageRef,
        videos: &[V],
    ) -> Result<bool, TrackerError> {
        let stage = stage.resolve(self.store.catalog())?;
        Ok(self.first_incomplete(stage, videos)?.is_none())
    }

    /// First listed video whose flag for `stage` is not set. Every video is
    /// still checked for a summary row, so an unknown name fails even when
    /// an earlier video is already incomplete.
    pub fn first_incomplete<V: AsRef<str>>(
        &self,
        stage: impl StageRef,
        videos: &[V],
    ) -> Result<Option<String>, TrackerError> {
        let stage = stage.resolve(self.store.catalog())?;
        let mut first = None;
        for video in videos {
            let video = video_key(video.as_ref())?;
            let complete = self.flag(stage, video)?;
            if !complete && first.is_none() {
                debug!(event = "gate_unmet", video, stage = %stage);
                first = Some(video.to_string());
            }
        }
        Ok(first)
    }

    /// Fails with `UnknownVideo` for the first listed video without a
    /// summary row.
    pub fn require_known<V: AsRef<str>>(&self, videos: &[V]) -> Result<(), TrackerError> {
        let Some(first_stage) = self.store.catalog().iter().next() else {
            return Ok(());
        };
        for video in videos {
            self.flag(first_stage, video.as_ref())?;
        }
        Ok(())
    }

    fn flag(&self, stage: StageId, video: &str) -> Result<bool, TrackerError> {
        let video = video_key(video)?;
        self.store
            .stage_flag(video, stage)?
            .ok_or_else(|| TrackerError::UnknownVideo(video.to_string()))
    }
}
