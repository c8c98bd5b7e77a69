//! Detection of the N+1 loading pattern.
//!
//! Every lazy or per-parent separate-query load issues one statement per parent
//! instance. Iterating N parents and touching one relationship on each therefore
//! costs N+1 statements. [`LoadTracker`] counts these loads per
//! `(entity, relationship)` and logs a warning on target `relmap::lazy` once a
//! pair reaches the configured threshold.
//!
//! The tracker is shared by the loaders a session installs, which may run on any
//! thread, so all state sits behind one mutex.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use relmap_core::CallSite;

/// Why a per-parent load happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadKind {
    /// First access to an unloaded lazy navigation.
    Lazy,
    /// Eager load issued as one correlated query per parent.
    SeparateQuery,
}

/// Where a load was triggered.
#[derive(Debug, Clone)]
pub struct LoadSite {
    pub entity: &'static str,
    pub relationship: &'static str,
    pub kind: LoadKind,
    pub file: &'static str,
    pub line: u32,
    pub at: Instant,
}

/// Aggregate counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Loads recorded, all relationships.
    pub total_loads: usize,
    /// Distinct `(entity, relationship)` pairs loaded.
    pub relationships_loaded: usize,
    /// Pairs at or above the threshold.
    pub potential_n1: usize,
}

#[derive(Debug, Default)]
struct TrackerState {
    counts: HashMap<(&'static str, &'static str), usize>,
    sites: Vec<LoadSite>,
}

/// Counts per-parent loads and warns about N+1 patterns.
#[derive(Debug)]
pub struct LoadTracker {
    threshold: usize,
    enabled: bool,
    state: Mutex<TrackerState>,
}

impl Default for LoadTracker {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Sites kept per `(entity, relationship)`; later loads are only counted.
pub const SITES_PER_WARNING: usize = 5;

impl LoadTracker {
    /// Enabled tracker warning at `threshold` loads per relationship.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            enabled: true,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Tracker that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record one load of `entity.relationship` triggered at `site`.
    pub fn record(&self, entity: &'static str, relationship: &'static str, kind: LoadKind, site: CallSite) {
        if !self.enabled {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let count = {
            let slot = state.counts.entry((entity, relationship)).or_insert(0);
            *slot += 1;
            *slot
        };
        if count <= SITES_PER_WARNING {
            state.sites.push(LoadSite {
                entity,
                relationship,
                kind,
                file: site.file(),
                line: site.line(),
                at: Instant::now(),
            });
        }

        if count == self.threshold {
            tracing::warn!(
                target: "relmap::lazy",
                entity,
                relationship,
                loads = count,
                threshold = self.threshold,
                "N+1 loading pattern detected; request the relationship with a graph directive instead"
            );
            for (i, site) in state
                .sites
                .iter()
                .filter(|s| s.entity == entity && s.relationship == relationship)
                .enumerate()
            {
                tracing::debug!(target: "relmap::lazy", index = i, kind = ?site.kind, "  [{}] {}:{}", i, site.file, site.line);
            }
        }
    }

    /// Loads recorded for `entity.relationship`.
    #[must_use]
    pub fn count_for(&self, entity: &str, relationship: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .counts
            .iter()
            .find(|((e, r), _)| *e == entity && *r == relationship)
            .map_or(0, |(_, c)| *c)
    }

    #[must_use]
    pub fn stats(&self) -> LoadStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        LoadStats {
            total_loads: state.counts.values().sum(),
            relationships_loaded: state.counts.len(),
            potential_n1: state.counts.values().filter(|c| **c >= self.threshold).count(),
        }
    }

    /// Snapshot of the recorded load sites.
    #[must_use]
    pub fn sites(&self) -> Vec<LoadSite> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sites
            .clone()
    }

    /// Forget everything recorded so far.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.counts.clear();
        state.sites.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::Location;
    use std::sync::Arc;

    #[test]
    fn test_defaults() {
        let tracker = LoadTracker::default();
        assert_eq!(tracker.threshold(), 3);
        assert!(tracker.is_enabled());
        assert!(!LoadTracker::disabled().is_enabled());
    }

    #[test]
    fn test_counts_per_relationship() {
        let tracker = LoadTracker::new(10);
        tracker.record("Order", "OrderItems", LoadKind::Lazy, Location::caller());
        tracker.record("Order", "OrderItems", LoadKind::Lazy, Location::caller());
        tracker.record("OrderItem", "ItemReceipt", LoadKind::SeparateQuery, Location::caller());

        assert_eq!(tracker.count_for("Order", "OrderItems"), 2);
        assert_eq!(tracker.count_for("OrderItem", "ItemReceipt"), 1);
        assert_eq!(tracker.count_for("Order", "Missing"), 0);
    }

    #[test]
    fn test_disabled_records_nothing() {
        let tracker = LoadTracker::disabled();
        tracker.record("Order", "OrderItems", LoadKind::Lazy, Location::caller());
        assert_eq!(tracker.count_for("Order", "OrderItems"), 0);
        assert!(tracker.sites().is_empty());
    }

    #[test]
    fn test_stats_and_reset() {
        let tracker = LoadTracker::new(2);
        tracker.record("Order", "OrderItems", LoadKind::Lazy, Location::caller());
        tracker.record("Order", "OrderItems", LoadKind::Lazy, Location::caller());
        tracker.record("Order", "Notes", LoadKind::Lazy, Location::caller());

        assert_eq!(
            tracker.stats(),
            LoadStats {
                total_loads: 3,
                relationships_loaded: 2,
                potential_n1: 1,
            }
        );

        tracker.reset();
        assert_eq!(tracker.stats(), LoadStats::default());
    }

    #[test]
    fn test_site_captures_caller() {
        let tracker = LoadTracker::default();
        tracker.record("Order", "OrderItems", LoadKind::SeparateQuery, Location::caller());
        let sites = tracker.sites();
        assert_eq!(sites.len(), 1);
        assert!(sites[0].file.contains("lazy_tracker.rs"));
        assert_eq!(sites[0].kind, LoadKind::SeparateQuery);
    }

    #[test]
    fn test_sites_are_bounded_per_relationship() {
        let tracker = LoadTracker::new(3);
        for _ in 0..500 {
            tracker.record("Order", "OrderItems", LoadKind::Lazy, Location::caller());
        }
        tracker.record("Order", "Notes", LoadKind::Lazy, Location::caller());

        assert_eq!(tracker.count_for("Order", "OrderItems"), 500);
        let sites = tracker.sites();
        assert_eq!(sites.len(), SITES_PER_WARNING + 1);
        assert_eq!(sites.iter().filter(|s| s.relationship == "OrderItems").count(), SITES_PER_WARNING);
    }

    #[test]
    fn test_shared_across_threads() {
        let tracker = Arc::new(LoadTracker::new(100));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let t = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        t.record("Order", "OrderItems", LoadKind::Lazy, Location::caller());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.count_for("Order", "OrderItems"), 20);
    }
}
