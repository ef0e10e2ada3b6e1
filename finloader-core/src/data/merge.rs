//! Reconcile stored bars with a fresh fetch.
//!
//! Fetch windows overlap on purpose: the incremental fetch starts at the
//! watermark, so the newest stored bar (often still forming when it was saved)
//! comes back with final values. On overlap the fresh bar wins.

use crate::domain::Bar;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Sorted ascending, unique timestamps.
    pub bars: Vec<Bar>,
    /// Timestamps not present before.
    pub added: usize,
    /// Existing timestamps whose values the fresh fetch changed.
    pub replaced: usize,
}

impl MergeOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.replaced == 0
    }
}

/// Merge `fresh` into `existing` with last-write-wins on equal timestamps.
///
/// Neither input needs to be sorted or unique; within `fresh`, a later bar
/// beats an earlier one with the same timestamp.
pub fn merge(existing: &[Bar], fresh: &[Bar]) -> MergeOutcome {
    let stored: BTreeMap<_, Bar> = existing.iter().map(|b| (b.time, *b)).collect();

    let mut merged = stored.clone();
    for bar in fresh {
        merged.insert(bar.time, *bar);
    }

    let added = merged.len() - stored.len();
    let replaced = stored
        .iter()
        .filter(|(time, old)| merged.get(*time).is_some_and(|new| !new.same_values(old)))
        .count();

    MergeOutcome {
        bars: merged.into_values().collect(),
        added,
        replaced,
    }
}
