//! Event-sourced stage-completion tracker for a per-video processing
//! pipeline: an append-only log of stage events, a summary projected from it,
//! and gate queries that stage consumers must pass before starting work.

pub mod error;
pub mod event;
pub mod event_store;
pub mod gate;
pub mod initializer;
pub mod policy;
pub mod projector;
pub mod stage;
pub mod store;
pub mod summary;
pub mod tracker;

pub use error::TrackerError;
pub use event::{video_key, StageEvent, StageStatus};
pub use event_store::EventStore;
pub use gate::GateChecker;
pub use initializer::{normalize_roster, BulkInitializer, InitReport};
pub use policy::{
    DependencyTable, GateVerdict, PolicyEvaluator, StageRequirement, UnmetPrerequisite,
    MONO_DEPTH_CONDITION,
};
pub use projector::SummaryProjector;
pub use stage::{StageCatalog, StageId, StageRef, REFERENCE_STAGES, STAGE_PREFIX};
pub use store::{MemoryStore, ProjectionFold, TrackerStore};
pub use summary::{StageFlags, VideoSummary};
pub use tracker::Tracker;
