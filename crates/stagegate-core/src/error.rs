use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("unknown video: {0:?} has no summary row (was the roster initialized?)")]
    UnknownVideo(String),
    #[error("invalid stage {value:?}: expected step_1..step_{max}")]
    InvalidStage { value: String, max: u8 },
    #[error("invalid dependency policy: {0}")]
    InvalidPolicy(String),
}

impl TrackerError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(err.to_string())
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}
