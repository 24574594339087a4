use crate::event::StageEvent;
use crate::stage::StageId;
use serde::Serialize;

/// Per-stage completion flags for one video, indexed by `StageId::index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StageFlags(Vec<bool>);

impl StageFlags {
    pub fn pending(stage_count: usize) -> Self {
        Self(vec![false; stage_count])
    }

    pub fn from_vec(flags: Vec<bool>) -> Self {
        Self(flags)
    }

    /// A stage is complete iff any event for it carries `Complete`. Later
    /// `Incomplete` events never clear a flag, so the result does not depend
    /// on event order.
    pub fn from_events<'a, I>(stage_count: usize, events: I) -> Self
    where
        I: IntoIterator<Item = &'a StageEvent>,
    {
        let mut flags = Self::pending(stage_count);
        for event in events {
            if !event.status.is_complete() {
                continue;
            }
            if let Some(flag) = slot(event.stage).and_then(|index| flags.0.get_mut(index)) {
                *flag = true;
            }
        }
        flags
    }

    pub fn get(&self, stage: StageId) -> bool {
        slot(stage)
            .and_then(|index| self.0.get(index))
            .copied()
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.0.iter().filter(|flag| **flag).count()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

fn slot(stage: StageId) -> Option<usize> {
    usize::from(stage.ordinal()).checked_sub(1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoSummary {
    pub video: String,
    pub flags: StageFlags,
}

impl VideoSummary {
    pub fn pending(video: impl Into<String>, stage_count: usize) -> Self {
        Self {
            video: video.into(),
            flags: StageFlags::pending(stage_count),
        }
    }

    pub fn is_complete(&self, stage: StageId) -> bool {
        self.flags.get(stage)
    }

    pub fn completed_count(&self) -> usize {
        self.flags.completed_count()
    }
}
