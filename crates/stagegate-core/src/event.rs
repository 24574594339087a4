use crate::error::TrackerError;
use crate::stage::StageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Incomplete,
    Complete,
}

impl StageStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            StageStatus::Incomplete => 0,
            StageStatus::Complete => 1,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(StageStatus::Incomplete),
            1 => Some(StageStatus::Complete),
            _ => None,
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(self, StageStatus::Complete)
    }
}

impl From<bool> for StageStatus {
    fn from(complete: bool) -> Self {
        if complete {
            Self::Complete
        } else {
            Self::Incomplete
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageStatus::Incomplete => "incomplete",
            StageStatus::Complete => "complete",
        })
    }
}

/// Canonical form of a video name as stored and looked up: surrounding
/// whitespace is dropped and a blank name is rejected.
pub fn video_key(video: &str) -> Result<&str, TrackerError> {
    let key = video.trim();
    if key.is_empty() {
        return Err(TrackerError::UnknownVideo(video.to_string()));
    }
    Ok(key)
}

/// One immutable row of the stage-completion log.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StageEvent {
    pub id: i64,
    pub video: String,
    pub stage: StageId,
    pub status: StageStatus,
    pub changed_at: DateTime<Utc>,
}
