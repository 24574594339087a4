use crate::error::TrackerError;
use crate::event::{video_key, StageEvent};
use crate::summary::StageFlags;
use crate::store::TrackerStore;
use tracing::debug;

/// Re-derives a video's summary row from its full event history.
pub struct SummaryProjector<'a, S: TrackerStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: TrackerStore + ?Sized> SummaryProjector<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn project(&self, video: &str) -> Result<StageFlags, TrackerError> {
        let video = video_key(video)?;
        let stage_count = self.store.catalog().len();
        let fold = |events: &[StageEvent]| StageFlags::from_events(stage_count, events);
        let flags = self.store.project_with(video, &fold)?;
        debug!(
            event = "summary_projected",
            video,
            completed = flags.completed_count(),
            stages = stage_count
        );
        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StageStatus;
    use crate::event_store::EventStore;
    use crate::store::MemoryStore;

    #[test]
    fn project_creates_missing_row_without_events() {
        let store = MemoryStore::default();
        let flags = SummaryProjector::new(&store)
            .project("rec01")
            .expect("project");

        assert_eq!(flags.completed_count(), 0);
        let summary = store.summary("rec01").expect("read").expect("row created");
        assert_eq!(summary.flags.len(), 8);
    }

    #[test]
    fn projecting_twice_is_idempotent() {
        let store = MemoryStore::default();
        let events = EventStore::new(&store);
        events
            .record_event("rec01", 3u8, StageStatus::Complete)
            .expect("append");
        let projector = SummaryProjector::new(&store);

        let first = projector.project("rec01").expect("first");
        let second = projector.project("rec01").expect("second");
        assert_eq!(first, second);
        assert!(first.as_slice()[2]);
    }

    #[test]
    fn blank_name_is_rejected_without_writing_a_row() {
        let store = MemoryStore::default();
        let err = SummaryProjector::new(&store)
            .project("   ")
            .expect_err("blank name");

        assert_eq!(err, TrackerError::UnknownVideo("   ".to_string()));
        assert!(store.summaries().expect("summaries").is_empty());
    }
}
