use crate::error::TrackerError;
use crate::event_store::EventStore;
use crate::store::TrackerStore;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub requested: usize,
    pub inserted: usize,
}

impl InitReport {
    pub fn already_present(&self) -> usize {
        self.requested - self.inserted
    }
}

/// Seeds one summary row per roster name. Safe to re-run; existing rows and
/// their flags are left untouched.
pub struct BulkInitializer<'a, S: TrackerStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: TrackerStore + ?Sized> BulkInitializer<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn initialize<I, V>(&self, videos: I) -> Result<InitReport, TrackerError>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        let roster = normalize_roster(videos);
        let inserted = EventStore::new(self.store).register_videos(&roster)?;
        Ok(InitReport {
            requested: roster.len(),
            inserted,
        })
    }
}

/// Trims names, drops blanks and keeps the first occurrence of duplicates.
pub fn normalize_roster<I, V>(videos: I) -> Vec<String>
where
    I: IntoIterator<Item = V>,
    V: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    videos
        .into_iter()
        .map(|video| video.as_ref().trim().to_string())
        .filter(|video| !video.is_empty())
        .filter(|video| seen.insert(video.clone()))
        .collect()
}
