//! Reconciliation loop
//!
//! Recurring task that re-derives the document from current state and
//! applies it only when it differs from what is on disk. Runs until
//! cancelled; a failed cycle is logged and the loop continues. Adapter
//! mutations and explicit apply-now triggers share one watch channel, so
//! triggers arriving while a cycle runs coalesce into a single follow-up
//! cycle instead of racing the applier.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::applier::XrayApplier;
use super::synthesizer::synthesize;
use crate::error::Result;
use crate::logger::log;
use crate::security::TransportSecurity;
use crate::store::StateSnapshot;

/// Result of one reconciliation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The synthesized document matched the active one; apply was skipped
    Unchanged,
    /// The document changed and was applied
    Applied,
}

/// Run one reconciliation cycle: take one point-in-time snapshot of the
/// entities, synthesize, compare with the active configuration, apply
/// when different.
pub async fn run_cycle_once(
    state: &dyn StateSnapshot,
    security: &TransportSecurity,
    applier: &XrayApplier,
) -> Result<CycleOutcome> {
    let (inbound_snapshot, subscription_snapshot) = state.snapshot().await?;

    let document = synthesize(
        &inbound_snapshot,
        &subscription_snapshot,
        security,
        Utc::now(),
    )?;
    let desired = document.to_bytes()?;

    let clients: usize = document
        .inbounds
        .iter()
        .filter_map(|entry| entry.settings.get("clients"))
        .filter_map(|clients| clients.as_array())
        .map(|clients| clients.len())
        .sum();
    log::synthesis(document.inbounds.len(), clients, desired.len());

    match applier.current_bytes().await? {
        Some(current) if current == desired => Ok(CycleOutcome::Unchanged),
        _ => {
            applier.apply(&document).await?;
            Ok(CycleOutcome::Applied)
        }
    }
}

/// Background reconciler keeping the xray process converged with the store
pub struct Reconciler {
    state: Arc<dyn StateSnapshot>,
    security: TransportSecurity,
    applier: Arc<XrayApplier>,
    interval: Duration,
    resync: Arc<watch::Sender<u64>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Handle for the spawned reconciler task
pub struct ReconcilerHandle {
    shutdown_tx: watch::Sender<bool>,
    resync: Arc<watch::Sender<u64>>,
    handle: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Request an apply-now cycle. Coalesces with any cycle in flight.
    pub fn trigger(&self) {
        self.resync
            .send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Stop the loop and wait for the current cycle to finish
    pub async fn shutdown(self) {
        log::info!("Stopping reconciler...");
        let _ = self.shutdown_tx.send(true);

        match tokio::time::timeout(Duration::from_secs(5), self.handle).await {
            Ok(Ok(())) => log::debug!("Reconciler stopped"),
            Ok(Err(e)) => log::warn!(error = %e, "Reconciler task panicked"),
            Err(_) => log::warn!("Reconciler shutdown timeout"),
        }
    }
}

impl Reconciler {
    pub fn new(
        state: Arc<dyn StateSnapshot>,
        security: TransportSecurity,
        applier: Arc<XrayApplier>,
        interval: Duration,
        resync: Arc<watch::Sender<u64>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            state,
            security,
            applier,
            interval,
            resync,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Spawn the loop task and return a handle for triggering and shutdown
    pub fn start(self) -> ReconcilerHandle {
        let shutdown_tx = self.shutdown_tx.clone();
        let resync = Arc::clone(&self.resync);
        let handle = tokio::spawn(self.run());

        log::info!("Reconciler started");
        ReconcilerHandle {
            shutdown_tx,
            resync,
            handle,
        }
    }

    async fn run(self) {
        // The reconciler holds its own Arc to the sender, so the channel
        // outlives every adapter and changed() cannot error out.
        let mut resync_rx = self.resync.subscribe();
        let mut shutdown_rx = self.shutdown_rx.clone();

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // First tick fires immediately: converge on startup
                _ = ticker.tick() => {
                    self.cycle("interval").await;
                }
                result = resync_rx.changed() => {
                    if result.is_ok() {
                        self.cycle("resync").await;
                    }
                }
                _ = shutdown_rx.changed() => {
                    log::debug!("Reconciler shutting down");
                    break;
                }
            }
        }
    }

    async fn cycle(&self, trigger: &str) {
        let outcome = run_cycle_once(self.state.as_ref(), &self.security, &self.applier).await;

        match outcome {
            Ok(CycleOutcome::Applied) => {
                log::info!(trigger = trigger, "Reconcile cycle applied changes");
            }
            Ok(CycleOutcome::Unchanged) => {
                log::debug!(trigger = trigger, "Reconcile cycle found nothing to do");
            }
            Err(e) => {
                // Log and continue; the loop never terminates on a cycle error
                log::cycle_failed(trigger, &e.to_string());
            }
        }
    }
}
