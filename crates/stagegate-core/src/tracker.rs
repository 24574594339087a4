use crate::error::TrackerError;
use crate::event::{video_key, StageEvent, StageStatus};
use crate::event_store::EventStore;
use crate::gate::GateChecker;
use crate::initializer::{BulkInitializer, InitReport};
use crate::policy::{DependencyTable, GateVerdict, PolicyEvaluator};
use crate::projector::SummaryProjector;
use crate::stage::{StageCatalog, StageId, StageRef};
use crate::store::TrackerStore;
use crate::summary::{StageFlags, VideoSummary};
use std::collections::BTreeSet;
use tracing::info;

/// Owns an injected store and exposes the consumer contract:
/// check gate, do work, record completion, re-project.
pub struct Tracker<S: TrackerStore> {
    store: S,
}

impl<S: TrackerStore> Tracker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn catalog(&self) -> &StageCatalog {
        self.store.catalog()
    }

    pub fn initialize<I, V>(&self, videos: I) -> Result<InitReport, TrackerError>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        BulkInitializer::new(&self.store).initialize(videos)
    }

    pub fn record_event(
        &self,
        video: &str,
        stage: impl StageRef,
        status: StageStatus,
    ) -> Result<(StageId, i64), TrackerError> {
        EventStore::new(&self.store).record_event(video, stage, status)
    }

    pub fn project(&self, video: &str) -> Result<StageFlags, TrackerError> {
        SummaryProjector::new(&self.store).project(video)
    }

    /// Appends one event and immediately re-projects the video. The summary
    /// is only written after the append has committed.
    pub fn record_and_project(
        &self,
        video: &str,
        stage: impl StageRef,
        status: StageStatus,
    ) -> Result<StageFlags, TrackerError> {
        self.record_event(video, stage, status)?;
        self.project(video)
    }

    pub fn complete_stage(
        &self,
        video: &str,
        stage: impl StageRef,
    ) -> Result<StageFlags, TrackerError> {
        self.record_and_project(video, stage, StageStatus::Complete)
    }

    pub fn is_complete<V: AsRef<str>>(
        &self,
        stage: impl StageRef,
        videos: &[V],
    ) -> Result<bool, TrackerError> {
        GateChecker::new(&self.store).is_complete(stage, videos)
    }

    pub fn first_incomplete<V: AsRef<str>>(
        &self,
        stage: impl StageRef,
        videos: &[V],
    ) -> Result<Option<String>, TrackerError> {
        GateChecker::new(&self.store).first_incomplete(stage, videos)
    }

    pub fn evaluate<V: AsRef<str>>(
        &self,
        table: &DependencyTable,
        stage: impl StageRef,
        videos: &[V],
        conditions: &BTreeSet<String>,
    ) -> Result<GateVerdict, TrackerError> {
        PolicyEvaluator::new(&self.store, table).evaluate(stage, videos, conditions)
    }

    /// Re-derives every existing summary row from the log, e.g. after the
    /// log was repaired or replayed. Returns the number of rows rewritten.
    pub fn reproject_all(&self) -> Result<usize, TrackerError> {
        let projector = SummaryProjector::new(&self.store);
        let summaries = self.store.summaries()?;
        for summary in &summaries {
            projector.project(&summary.video)?;
        }
        info!(event = "summaries_reprojected", videos = summaries.len());
        Ok(summaries.len())
    }

    pub fn summary(&self, video: &str) -> Result<VideoSummary, TrackerError> {
        let video = video_key(video)?;
        self.store
            .summary(video)?
            .ok_or_else(|| TrackerError::UnknownVideo(video.to_string()))
    }

    pub fn summaries(&self) -> Result<Vec<VideoSummary>, TrackerError> {
        self.store.summaries()
    }

    pub fn history(&self, video: &str) -> Result<Vec<StageEvent>, TrackerError> {
        self.store.events_for_video(video_key(video)?)
    }
}
