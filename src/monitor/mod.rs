//! Background observation of the store: metrics sampling, threshold
//! evaluation, and the two timers that drive them.

pub mod health;
pub mod metrics;
pub mod scheduler;

use arc_swap::ArcSwapOption;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use health::HealthSnapshot;
use metrics::MetricsSample;

/// Latest published sample and snapshot.
///
/// Readers never block; each publish swaps in a whole new value.
#[derive(Default)]
pub struct MonitorState {
    latest_sample: ArcSwapOption<MetricsSample>,
    latest_health: ArcSwapOption<HealthSnapshot>,
    /// Collections that were Critical at the end of the previous health cycle.
    critical: Mutex<HashSet<String>>,
}

impl MonitorState {
    pub fn latest_sample(&self) -> Option<Arc<MetricsSample>> {
        self.latest_sample.load_full()
    }

    pub fn latest_health(&self) -> Option<Arc<HealthSnapshot>> {
        self.latest_health.load_full()
    }

    pub(crate) fn publish_sample(&self, sample: MetricsSample) -> Arc<MetricsSample> {
        let sample = Arc::new(sample);
        self.latest_sample.store(Some(Arc::clone(&sample)));
        sample
    }

    pub(crate) fn publish_health(&self, snapshot: HealthSnapshot) -> Arc<HealthSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.latest_health.store(Some(Arc::clone(&snapshot)));
        snapshot
    }

    /// Of `now_critical`, the collections that were not Critical last cycle.
    pub(crate) fn newly_critical(&self, now_critical: &[String]) -> Vec<String> {
        let previous = self.critical.lock().unwrap_or_else(|e| e.into_inner());
        now_critical
            .iter()
            .filter(|name| !previous.contains(*name))
            .cloned()
            .collect()
    }

    pub(crate) fn remember_critical(&self, critical: HashSet<String>) {
        *self.critical.lock().unwrap_or_else(|e| e.into_inner()) = critical;
    }
}

impl std::fmt::Debug for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorState")
            .field("has_sample", &self.latest_sample.load().is_some())
            .field("has_health", &self.latest_health.load().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_new_critical_collections_are_reported() {
        let state = MonitorState::default();
        let now = vec!["agent_a".to_string(), "agent_b".to_string()];
        assert_eq!(state.newly_critical(&now), now);

        state.remember_critical(["agent_a".to_string()].into_iter().collect());
        assert_eq!(state.newly_critical(&now), vec!["agent_b".to_string()]);
    }

    #[test]
    fn nothing_published_initially() {
        let state = MonitorState::default();
        assert!(state.latest_sample().is_none());
        assert!(state.latest_health().is_none());
    }
}
