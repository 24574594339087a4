use crate::error::TrackerError;
use serde::Serialize;
use std::fmt;

pub const STAGE_PREFIX: &str = "step_";

pub const REFERENCE_STAGES: [&str; 8] = [
    "ingest",
    "frame_interpolation",
    "blur_synthesis",
    "depth_alignment",
    "pose_imu_export",
    "response_calibration",
    "mono_depth",
    "dataset_export",
];

/// One-based stage ordinal. Only a [`StageCatalog`] hands these out, so a
/// `StageId` held by a caller is always inside the catalog it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct StageId(pub(crate) u8);

impl StageId {
    pub fn ordinal(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        usize::from(self.0) - 1
    }

    pub fn column(self) -> String {
        format!("{STAGE_PREFIX}{}", self.0)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{STAGE_PREFIX}{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCatalog {
    names: Vec<String>,
}

impl StageCatalog {
    pub fn new<I, N>(names: I) -> Result<Self, TrackerError>
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(|name| name.into().trim().to_lowercase())
            .collect();
        if names.is_empty() {
            return Err(TrackerError::InvalidPolicy(
                "stage catalog must contain at least one stage".to_string(),
            ));
        }
        if names.len() > usize::from(u8::MAX) {
            return Err(TrackerError::InvalidPolicy(format!(
                "stage catalog supports at most {} stages, got {}",
                u8::MAX,
                names.len()
            )));
        }
        for (index, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(TrackerError::InvalidPolicy(format!(
                    "stage {} has an empty name",
                    index + 1
                )));
            }
            if names[..index].contains(name) {
                return Err(TrackerError::InvalidPolicy(format!(
                    "duplicate stage name {name:?}"
                )));
            }
        }
        Ok(Self { names })
    }

    pub fn reference() -> Self {
        Self {
            names: REFERENCE_STAGES.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn max_ordinal(&self) -> u8 {
        self.names.len() as u8
    }

    pub fn stage(&self, ordinal: u8) -> Result<StageId, TrackerError> {
        if ordinal == 0 || ordinal > self.max_ordinal() {
            return Err(self.invalid(ordinal.to_string()));
        }
        Ok(StageId(ordinal))
    }

    pub fn stage_by_name(&self, name: &str) -> Option<StageId> {
        let name = name.trim().to_lowercase();
        self.names
            .iter()
            .position(|candidate| *candidate == name)
            .map(|index| StageId(index as u8 + 1))
    }

    /// Accepts `step_<n>`, a bare ordinal, or a stage name.
    pub fn parse(&self, text: &str) -> Result<StageId, TrackerError> {
        let trimmed = text.trim();
        let ordinal_text = trimmed
            .strip_prefix(STAGE_PREFIX)
            .unwrap_or(trimmed);
        if let Ok(ordinal) = ordinal_text.parse::<u8>() {
            return self.stage(ordinal).map_err(|_| self.invalid(trimmed));
        }
        self.stage_by_name(trimmed)
            .ok_or_else(|| self.invalid(trimmed))
    }

    pub fn name(&self, stage: StageId) -> &str {
        &self.names[stage.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = StageId> + '_ {
        (1..=self.max_ordinal()).map(StageId)
    }

    fn invalid(&self, value: impl Into<String>) -> TrackerError {
        TrackerError::InvalidStage {
            value: value.into(),
            max: self.max_ordinal(),
        }
    }
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::reference()
    }
}

/// Anything a caller may name a stage with: a resolved [`StageId`], a raw
/// ordinal, or the textual forms accepted by [`StageCatalog::parse`].
pub trait StageRef {
    fn resolve(&self, catalog: &StageCatalog) -> Result<StageId, TrackerError>;
}

impl StageRef for StageId {
    fn resolve(&self, catalog: &StageCatalog) -> Result<StageId, TrackerError> {
        catalog.stage(self.0)
    }
}

impl StageRef for u8 {
    fn resolve(&self, catalog: &StageCatalog) -> Result<StageId, TrackerError> {
        catalog.stage(*self)
    }
}

impl StageRef for &str {
    fn resolve(&self, catalog: &StageCatalog) -> Result<StageId, TrackerError> {
        catalog.parse(self)
    }
}

impl StageRef for String {
    fn resolve(&self, catalog: &StageCatalog) -> Result<StageId, TrackerError> {
        catalog.parse(self)
    }
}
