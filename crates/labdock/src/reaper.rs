//! Idle reapers.
//!
//! [`IdleReaper`] holds the two sweeps; [`ReaperScheduler`] runs each on its
//! own interval and supports manual triggers through a broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

use crate::config::ReaperConfig;
use crate::deploy::DeploymentEngine;
use crate::project::ProjectStore;
use crate::viewer::{CacheSweepReport, ViewerCache};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentSweepReport {
    pub examined: usize,
    pub reaped: usize,
    pub failed: usize,
}

pub struct IdleReaper {
    deployments: Arc<DeploymentEngine>,
    store: Arc<dyn ProjectStore>,
    viewer: Arc<ViewerCache>,
    deployment_idle: Duration,
    cache_idle: Duration,
}

impl IdleReaper {
    pub fn new(
        deployments: Arc<DeploymentEngine>,
        store: Arc<dyn ProjectStore>,
        viewer: Arc<ViewerCache>,
        deployment_idle: Duration,
        cache_idle: Duration,
    ) -> Self {
        Self {
            deployments,
            store,
            viewer,
            deployment_idle,
            cache_idle,
        }
    }

    /// Stops every running deployment idle for longer than the threshold.
    /// Failures are logged and counted, never returned.
    pub async fn sweep_deployments(&self) -> DeploymentSweepReport {
        let mut report = DeploymentSweepReport::default();
        let idle = chrono::Duration::from_std(self.deployment_idle)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = Utc::now() - idle;

        let candidates = match self.store.list_idle_running(cutoff) {
            Ok(candidates) => candidates,
            Err(e) => {
                log::error!("Failed to list idle deployments: {}", e);
                return report;
            }
        };
        report.examined = candidates.len();

        for project in candidates {
            match self.deployments.stop_if_idle(&project.id, cutoff).await {
                Ok(true) => {
                    report.reaped += 1;
                    log::info!("Reaped idle deployment of project {}", project.id);
                }
                Ok(false) => log::debug!("Project {} became active, skipped", project.id),
                Err(e) => {
                    report.failed += 1;
                    log::error!("Failed to reap project {}: {}", project.id, e);
                }
            }
        }

        if report.examined > 0 {
            log::info!(
                "Deployment sweep: {} examined, {} reaped, {} failed",
                report.examined,
                report.reaped,
                report.failed
            );
        }
        report
    }

    pub async fn sweep_cache(&self) -> CacheSweepReport {
        self.viewer.sweep_idle(self.cache_idle).await
    }
}

/// Runs the deployment and cache sweeps periodically.
pub struct ReaperScheduler {
    reaper: Arc<IdleReaper>,
    deployment_interval: Duration,
    cache_interval: Duration,
    /// Shutdown flag of the loops currently running, if any.
    running: Mutex<Option<Arc<AtomicBool>>>,
    trigger_tx: broadcast::Sender<()>,
}

impl ReaperScheduler {
    pub fn new(reaper: Arc<IdleReaper>, deployment_interval: Duration, cache_interval: Duration) -> Self {
        let (trigger_tx, _) = broadcast::channel(16);
        Self {
            reaper,
            deployment_interval,
            cache_interval,
            running: Mutex::new(None),
            trigger_tx,
        }
    }

    pub fn from_config(reaper: Arc<IdleReaper>, config: &ReaperConfig) -> Self {
        Self::new(
            reaper,
            Duration::from_secs(config.deployment_interval_secs),
            Duration::from_secs(config.cache_interval_secs),
        )
    }

    fn running(&self) -> MutexGuard<'_, Option<Arc<AtomicBool>>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Spawns both sweep loops on the current tokio runtime. Returns no
    /// handles when the loops are already running.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut running = self.running();
        if running.is_some() {
            log::warn!("Reaper scheduler already running, start ignored");
            return Vec::new();
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        *running = Some(Arc::clone(&shutdown));

        let deployments = {
            let reaper = Arc::clone(&self.reaper);
            spawn_loop(
                "deployment_sweep",
                self.deployment_interval,
                Arc::clone(&shutdown),
                self.trigger_tx.subscribe(),
                move || {
                    let reaper = Arc::clone(&reaper);
                    async move {
                        reaper.sweep_deployments().await;
                    }
                },
            )
        };
        let cache = {
            let reaper = Arc::clone(&self.reaper);
            spawn_loop(
                "cache_sweep",
                self.cache_interval,
                shutdown,
                self.trigger_tx.subscribe(),
                move || {
                    let reaper = Arc::clone(&reaper);
                    async move {
                        reaper.sweep_cache().await;
                    }
                },
            )
        };
        vec![deployments, cache]
    }

    /// Runs both sweeps now, outside their schedule.
    pub fn trigger(&self) {
        if self.trigger_tx.send(()).is_err() {
            log::debug!("Reaper trigger ignored, scheduler not started");
        }
    }

    /// Signals both loops to exit. The scheduler can be started again.
    pub fn stop(&self) {
        let Some(shutdown) = self.running().take() else {
            return;
        };
        shutdown.store(true, Ordering::Release);
        // wake loops parked on their interval
        let _ = self.trigger_tx.send(());
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: Arc<AtomicBool>,
    mut trigger_rx: broadcast::Receiver<()>,
    sweep: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(period);
        interval_timer.tick().await; // skip immediate first tick

        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }

            tokio::select! {
                _ = interval_timer.tick() => {},
                trigger = trigger_rx.recv() => match trigger {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        log::info!("Manual {} triggered", name);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }

            if shutdown.load(Ordering::Acquire) {
                break;
            }

            sweep().instrument(info_span!("reaper", sweep = name)).await;
        }
        log::debug!("{} loop stopped", name);
    })
}
