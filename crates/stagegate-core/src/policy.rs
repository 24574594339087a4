use crate::event::video_key;
use crate::error::TrackerError;
use crate::gate::GateChecker;
use crate::stage::{StageCatalog, StageId, StageRef};
use crate::store::TrackerStore;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub const MONO_DEPTH_CONDITION: &str = "mono_depth";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageRequirement {
    pub always: BTreeSet<StageId>,
    pub when: BTreeMap<String, BTreeSet<StageId>>,
}

/// Declarative `{stage -> prerequisite stages}` table. Prerequisites must
/// precede the stage they gate, which keeps the table acyclic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyTable {
    catalog: StageCatalog,
    requirements: BTreeMap<StageId, StageRequirement>,
}

impl DependencyTable {
    pub fn new(catalog: StageCatalog) -> Self {
        Self {
            catalog,
            requirements: BTreeMap::new(),
        }
    }

    /// Gating used by the reference pipeline's stage consumers.
    pub fn reference() -> Self {
        let always: [(u8, &[u8]); 6] = [
            (2, &[1]),
            (3, &[2]),
            (4, &[1]),
            (5, &[1]),
            (7, &[3]),
            (8, &[1, 2, 3, 4, 5]),
        ];
        let mut requirements: BTreeMap<StageId, StageRequirement> = BTreeMap::new();
        for (stage, prerequisites) in always {
            requirements
                .entry(StageId(stage))
                .or_default()
                .always
                .extend(prerequisites.iter().map(|ordinal| StageId(*ordinal)));
        }
        requirements
            .entry(StageId(8))
            .or_default()
            .when
            .insert(MONO_DEPTH_CONDITION.to_string(), BTreeSet::from([StageId(7)]));
        Self {
            catalog: StageCatalog::reference(),
            requirements,
        }
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    pub fn require(
        &mut self,
        stage: impl StageRef,
        prerequisite: impl StageRef,
    ) -> Result<&mut Self, TrackerError> {
        self.insert(stage, None, prerequisite)?;
        Ok(self)
    }

    pub fn require_when(
        &mut self,
        stage: impl StageRef,
        condition: &str,
        prerequisite: impl StageRef,
    ) -> Result<&mut Self, TrackerError> {
        let condition = condition.trim();
        if condition.is_empty() {
            return Err(TrackerError::InvalidPolicy(
                "condition name cannot be empty".to_string(),
            ));
        }
        self.insert(stage, Some(condition), prerequisite)?;
        Ok(self)
    }

    fn insert(
        &mut self,
        stage: impl StageRef,
        condition: Option<&str>,
        prerequisite: impl StageRef,
    ) -> Result<(), TrackerError> {
        let stage = stage.resolve(&self.catalog)?;
        let prerequisite = prerequisite.resolve(&self.catalog)?;
        if prerequisite >= stage {
            return Err(TrackerError::InvalidPolicy(format!(
                "{stage} cannot require {prerequisite}: prerequisites must come earlier"
            )));
        }
        let requirement = self.requirements.entry(stage).or_default();
        match condition {
            None => {
                requirement.always.insert(prerequisite);
            }
            Some(condition) => {
                requirement
                    .when
                    .entry(condition.to_string())
                    .or_default()
                    .insert(prerequisite);
            }
        }
        Ok(())
    }

    pub fn requirement(&self, stage: StageId) -> Option<&StageRequirement> {
        self.requirements.get(&stage)
    }

    /// Prerequisites of `stage` under the active `conditions`, in stage order.
    pub fn prerequisites(&self, stage: StageId, conditions: &BTreeSet<String>) -> Vec<StageId> {
        let Some(requirement) = self.requirements.get(&stage) else {
            return Vec::new();
        };
        let mut stages = requirement.always.clone();
        for (condition, extra) in &requirement.when {
            if conditions.contains(condition) {
                stages.extend(extra.iter().copied());
            }
        }
        stages.into_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmetPrerequisite {
    pub stage: StageId,
    pub video: String,
}

impl fmt::Display for UnmetPrerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not complete for video {}", self.stage, self.video)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GateVerdict {
    Admitted,
    Blocked { unmet: Vec<UnmetPrerequisite> },
}

impl GateVerdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, GateVerdict::Admitted)
    }
}

/// Composes single-stage gate answers into a stage admission decision.
pub struct PolicyEvaluator<'a, S: TrackerStore + ?Sized> {
    gate: GateChecker<'a, S>,
    table: &'a DependencyTable,
}

impl<'a, S: TrackerStore + ?Sized> PolicyEvaluator<'a, S> {
    pub fn new(store: &'a S, table: &'a DependencyTable) -> Self {
        Self {
            gate: GateChecker::new(store),
            table,
        }
    }

    pub fn evaluate<V: AsRef<str>>(
        &self,
        stage: impl StageRef,
        videos: &[V],
        conditions: &BTreeSet<String>,
    ) -> Result<GateVerdict, TrackerError> {
        let stage = stage.resolve(self.table.catalog())?;
        self.gate.require_known(videos)?;
        let mut unmet = Vec::new();
        for prerequisite in self.table.prerequisites(stage, conditions) {
            for video in videos {
                let video = video_key(video.as_ref())?;
                if !self.gate.is_complete(prerequisite, &[video])? {
                    unmet.push(UnmetPrerequisite {
                        stage: prerequisite,
                        video: video.to_string(),
                    });
                }
            }
        }
        if unmet.is_empty() {
            Ok(GateVerdict::Admitted)
        } else {
            Ok(GateVerdict::Blocked { unmet })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StageStatus;
    use crate::event_store::EventStore;
    use crate::projector::SummaryProjector;
    use crate::store::MemoryStore;

    fn conditions(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn complete_stages(store: &MemoryStore, video: &str, stages: &[u8]) {
        let events = EventStore::new(store);
        for stage in stages {
            events
                .record_event(video, *stage, StageStatus::Complete)
                .expect("append");
        }
        SummaryProjector::new(store).project(video).expect("project");
    }

    #[test]
    fn reference_table_matches_pipeline_gating() {
        let table = DependencyTable::reference();
        let catalog = table.catalog().clone();
        let none = BTreeSet::new();
        let ordinals = |stage: u8, active: &BTreeSet<String>| -> Vec<u8> {
            table
                .prerequisites(catalog.stage(stage).expect("stage"), active)
                .into_iter()
                .map(StageId::ordinal)
                .collect()
        };

        assert!(ordinals(1, &none).is_empty());
        assert_eq!(ordinals(3, &none), vec![2]);
        assert!(ordinals(6, &none).is_empty());
        assert_eq!(ordinals(8, &none), vec![1, 2, 3, 4, 5]);
        assert_eq!(
            ordinals(8, &conditions(&[MONO_DEPTH_CONDITION])),
            vec![1, 2, 3, 4, 5, 7]
        );
    }

    #[test]
    fn table_rejects_forward_or_self_edges() {
        let mut table = DependencyTable::new(StageCatalog::reference());
        assert!(matches!(
            table.require(2u8, 2u8),
            Err(TrackerError::InvalidPolicy(_))
        ));
        assert!(matches!(
            table.require(2u8, 5u8),
            Err(TrackerError::InvalidPolicy(_))
        ));
        assert!(matches!(
            table.require(2u8, 11u8),
            Err(TrackerError::InvalidStage { .. })
        ));
        assert!(table.require_when(4u8, " ", 1u8).is_err());
    }

    #[test]
    fn export_blocked_until_prerequisites_complete() {
        let store = MemoryStore::default();
        store
            .insert_videos(&["rec01".to_string()])
            .expect("register");
        let table = DependencyTable::reference();
        let evaluator = PolicyEvaluator::new(&store, &table);
        let mono = conditions(&[MONO_DEPTH_CONDITION]);

        complete_stages(&store, "rec01", &[1, 2, 3, 4]);
        let verdict = evaluator
            .evaluate("dataset_export", &["rec01"], &BTreeSet::new())
            .expect("evaluate");
        assert_eq!(
            verdict,
            GateVerdict::Blocked {
                unmet: vec![UnmetPrerequisite {
                    stage: table.catalog().stage(5).expect("stage 5"),
                    video: "rec01".to_string(),
                }]
            }
        );

        complete_stages(&store, "rec01", &[5]);
        assert!(evaluator
            .evaluate(8u8, &["rec01"], &BTreeSet::new())
            .expect("evaluate")
            .is_admitted());
        assert!(!evaluator
            .evaluate(8u8, &["rec01"], &mono)
            .expect("evaluate")
            .is_admitted());

        complete_stages(&store, "rec01", &[7]);
        assert!(evaluator
            .evaluate(8u8, &["rec01"], &mono)
            .expect("evaluate")
            .is_admitted());
    }

    #[test]
    fn stage_without_prerequisites_is_admitted_for_known_video() {
        let store = MemoryStore::default();
        store
            .insert_videos(&["rec01".to_string()])
            .expect("register");
        let table = DependencyTable::reference();
        let verdict = PolicyEvaluator::new(&store, &table)
            .evaluate(1u8, &["rec01"], &BTreeSet::new())
            .expect("evaluate");
        assert!(verdict.is_admitted());
    }

    #[test]
    fn stage_without_prerequisites_still_rejects_unknown_video() {
        let store = MemoryStore::default();
        let table = DependencyTable::reference();
        let err = PolicyEvaluator::new(&store, &table)
            .evaluate(1u8, &["ghost"], &BTreeSet::new())
            .expect_err("ghost unknown");
        assert!(matches!(err, TrackerError::UnknownVideo(_)));
    }

    #[test]
    fn unknown_video_propagates_from_gate() {
        let store = MemoryStore::default();
        let table = DependencyTable::reference();
        let err = PolicyEvaluator::new(&store, &table)
            .evaluate(2u8, &["ghost"], &BTreeSet::new())
            .expect_err("ghost unknown");
        assert_eq!(err, TrackerError::UnknownVideo("ghost".to_string()));
    }
}
