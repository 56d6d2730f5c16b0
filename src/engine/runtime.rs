//! Background workers: the lease-expiry sweeper, the retry-threshold
//! reconciler (which also checks portfolio timeouts and prunes stale
//! idempotency keys), and the aggregate recomputer fed by an internal
//! STATUS_CHANGED subscription.
//!
//! Every loop holds a shutdown receiver and a join handle; nothing runs
//! unsupervised.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::events::{BackpressureMode, EventFilter};
use crate::model::EventType;

/// Handles for the engine's background loops.
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl BackgroundTasks {
    /// Spawn the sweeper, reconciler, and aggregate recomputer.
    pub fn spawn(engine: Arc<Engine>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let handles = vec![
            spawn_sweeper(engine.clone(), shutdown.subscribe()),
            spawn_reconciler(engine.clone(), shutdown.subscribe()),
            spawn_aggregate_worker(engine, shutdown.subscribe()),
        ];
        Self { handles, shutdown }
    }

    /// Signal shutdown and wait for every loop to exit, up to `deadline`.
    pub async fn shutdown(self, deadline: Duration) {
        let _ = self.shutdown.send(true);
        let join_all = async {
            for handle in self.handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(deadline, join_all).await.is_err() {
            warn!("background tasks did not drain before the deadline");
        }
    }
}

fn spawn_sweeper(engine: Arc<Engine>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let interval = Duration::from_millis(engine.config().sweep_interval_ms.max(100));
    let idempotency_window = engine.config().idempotency_window_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            match engine.sweep_expired_leases().await {
                Ok(0) => {}
                Ok(swept) => debug!(swept, "lease sweep"),
                Err(e) => warn!(error = %e, "lease sweep failed"),
            }
            let cutoff = Utc::now() - chrono::Duration::seconds(idempotency_window);
            if let Err(e) = engine.store().idempotency_prune(cutoff).await {
                warn!(error = %e, "idempotency prune failed");
            }
        }
    })
}

fn spawn_reconciler(engine: Arc<Engine>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let interval = Duration::from_millis(engine.config().reconcile_interval_ms.max(100));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if let Err(e) = engine.reconcile_retry_thresholds().await {
                warn!(error = %e, "retry reconcile failed");
            }
            if let Err(e) = engine.check_portfolio_timeouts().await {
                warn!(error = %e, "portfolio timeout check failed");
            }
        }
    })
}

fn spawn_aggregate_worker(
    engine: Arc<Engine>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let filter = EventFilter {
        event_types: Some([EventType::StatusChanged].into_iter().collect()),
        ..EventFilter::default()
    };
    let subscription = engine.broker().subscribe(filter, BackpressureMode::Block);
    tokio::spawn(async move {
        loop {
            let drained = subscription.drain();
            for event in drained.events {
                if let Err(e) = engine.on_status_changed(event.intent_id).await {
                    warn!(intent_id = %event.intent_id, error = %e, "aggregate recompute failed");
                }
            }
            // Desync just delays aggregates until the next status change;
            // recomputation is idempotent over current state.
            if drained.closed {
                break;
            }
            tokio::select! {
                _ = subscription.notify.notified() => {}
                _ = shutdown.changed() => break,
            }
        }
        engine.broker().unsubscribe(subscription.id);
    })
}
