//! The two independent background timers.
//!
//! Metrics sampling fires immediately and then every
//! `scheduler.metrics_interval_secs`; health evaluation first fires one full
//! `scheduler.health_interval_secs` after start. A failing cycle is logged
//! and the next one still runs.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::MemoryEngine;
use crate::monitor::health::HealthStatus;

pub struct Scheduler {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn both timers on the current runtime.
    pub fn start(engine: MemoryEngine, cancel: CancellationToken) -> Self {
        let config = &engine.config().scheduler;
        let metrics_every = Duration::from_secs(config.metrics_interval_secs);
        let health_every = Duration::from_secs(config.health_interval_secs);

        let metrics = {
            let engine = engine.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(metrics_every);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            match engine.collect_metrics().await {
                                Ok(sample) => debug!(
                                    utilization = sample.utilization,
                                    fragmentation = sample.fragmentation,
                                    "metrics sampled"
                                ),
                                Err(e) => warn!(error = %e, "metrics cycle failed"),
                            }
                        }
                        _ = cancel.cancelled() => {
                            info!("metrics task shutting down");
                            break;
                        }
                    }
                }
            })
        };

        let health = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(health_every);
                // Skip the first immediate tick.
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let snapshot = engine.run_health_cycle().await;
                            match snapshot.status {
                                HealthStatus::Healthy => debug!("health check passed"),
                                status => warn!(
                                    status = %status,
                                    alerts = snapshot.alerts.len(),
                                    auto_prunes = snapshot.auto_prunes.len(),
                                    "health check raised alerts"
                                ),
                            }
                        }
                        _ = cancel.cancelled() => {
                            info!("health task shutting down");
                            break;
                        }
                    }
                }
            })
        };

        info!(
            metrics_interval_secs = metrics_every.as_secs(),
            health_interval_secs = health_every.as_secs(),
            "scheduler started"
        );

        Self {
            cancel,
            handles: vec![metrics, health],
        }
    }

    /// Cancel both timers and wait for them to finish their current cycle.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler task did not exit cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CairnConfig;

    #[tokio::test]
    async fn metrics_are_sampled_on_start_and_shutdown_is_clean() {
        let mut config = CairnConfig::default();
        config.embedding.dimension = 16;
        let engine = MemoryEngine::in_memory(config).unwrap();

        let scheduler = Scheduler::start(engine.clone(), CancellationToken::new());
        for _ in 0..200 {
            if engine.monitor().latest_sample().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(engine.monitor().latest_sample().is_some());
        assert!(engine.monitor().latest_health().is_none());

        scheduler.shutdown().await;
    }
}
