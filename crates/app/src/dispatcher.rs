//! Dispatcher — the background loops that feed the engine.
//!
//! - [`Dispatcher::run`] sweeps due enrollments on a fixed interval, and
//!   early whenever the engine signals a new enrollment.
//! - [`listen_events`] forwards entity events from the bus to the engine.
//!
//! Both stop when the shutdown flag flips to `true`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crmflow_domain::event::EntityEvent;

use crate::automation_engine::{AutomationEngine, ProcessMode, ProcessOutcome};
use crate::ports::{
    AutomationLogRepository, AutomationRepository, EnrollmentRepository, EntityStore,
    EventPublisher,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub sweep_interval: Duration,
    /// Most enrollments loaded per sweep.
    pub batch_size: usize,
    /// Most ticks running at once.
    pub max_concurrency: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            batch_size: 100,
            max_concurrency: 8,
        }
    }
}

/// Tally of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Ticks that ran and were persisted.
    pub processed: usize,
    /// Enrollments left alone: locked, no longer due, paused or superseded.
    pub skipped: usize,
    pub errors: usize,
}

pub struct Dispatcher<A, N, L, S, P> {
    engine: Arc<AutomationEngine<A, N, L, S, P>>,
    config: DispatcherConfig,
    permits: Arc<Semaphore>,
}

impl<A, N, L, S, P> Dispatcher<A, N, L, S, P>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    pub fn new(engine: Arc<AutomationEngine<A, N, L, S, P>>, config: DispatcherConfig) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
        }
    }

    /// Process every enrollment due now, up to `batch_size`.
    ///
    /// One enrollment's failure never stops the others.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let due = match self.engine.due_enrollments(self.config.batch_size).await {
            Ok(due) => due,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load due enrollments");
                report.errors += 1;
                return report;
            }
        };

        let mut tasks = JoinSet::new();
        for enrollment in due {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let engine = Arc::clone(&self.engine);
            tasks.spawn(async move {
                let outcome = engine
                    .process_enrollment(enrollment.id, ProcessMode::Due)
                    .await;
                drop(permit);
                (enrollment.id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(ProcessOutcome::Processed(_)))) => report.processed += 1,
                Ok((_, Ok(_))) => report.skipped += 1,
                Ok((enrollment_id, Err(err))) => {
                    tracing::warn!(%enrollment_id, error = %err, "enrollment tick failed");
                    report.errors += 1;
                }
                Err(err) => {
                    tracing::error!(error = %err, "enrollment task panicked");
                    report.errors += 1;
                }
            }
        }

        if report != SweepReport::default() {
            tracing::debug!(
                processed = report.processed,
                skipped = report.skipped,
                errors = report.errors,
                "sweep finished"
            );
        }
        report
    }

    /// Sweep until `shutdown` turns `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let notify = self.engine.notifier();
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval = ?self.config.sweep_interval,
            batch_size = self.config.batch_size,
            max_concurrency = self.config.max_concurrency,
            "dispatcher started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = notify.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
            self.sweep().await;
        }
        tracing::info!("dispatcher stopped");
    }
}

/// Feed events from the bus into the engine until shutdown or the bus closes.
pub async fn listen_events<A, N, L, S, P>(
    engine: Arc<AutomationEngine<A, N, L, S, P>>,
    mut events: broadcast::Receiver<EntityEvent>,
    mut shutdown: watch::Receiver<bool>,
) where
    A: AutomationRepository,
    N: EnrollmentRepository,
    L: AutomationLogRepository,
    S: EntityStore,
    P: EventPublisher,
{
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    if let Err(err) = engine.handle_event(&event).await {
                        tracing::warn!(event_id = %event.id, error = %err, "failed to handle event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event listener lagged behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("event listener stopped");
}
