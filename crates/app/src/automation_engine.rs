//! Automation engine — turns entity events into enrollments and drives them.
//!
//! For each incoming event the engine matches the enabled automations from
//! the [`AutomationCatalog`], gates enrollment on the automation's
//! conditions and re-enrollment policy, and wakes the dispatcher. Ticks run
//! through [`AutomationEngine::process_enrollment`], which owns the
//! per-enrollment lease lock, the conditional save and the audit log.
//!
//! Every lease is taken under a fresh [`LeaseToken`] and outlasts the
//! longest tick the [`StepMachine`] can run. Writes made while holding it
//! go through [`EnrollmentRepository::save_leased`], so a holder that lost
//! its lease cannot overwrite the enrollment.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::Notify;

use crmflow_domain::automation::{
    Automation, ConditionOutcome, ReEnrollmentPolicy, evaluate, evaluate_traced,
};
use crmflow_domain::enrollment::Enrollment;
use crmflow_domain::entity::{CrmEntity, EntityRef};
use crmflow_domain::error::{CrmFlowError, NotFoundError, ValidationError};
use crmflow_domain::event::EntityEvent;
use crmflow_domain::id::{AutomationId, EnrollmentId, LeaseToken};
use crmflow_domain::log::{AutomationLog, LogOutcome};
use crmflow_domain::time::Timestamp;
use serde::Serialize;

use crate::automation_catalog::AutomationCatalog;
use crate::ports::{
    AutomationLogRepository, AutomationRepository, EnrollmentRepository, EntityStore,
    EventPublisher, SharedClock,
};
use crate::services::entity_service::EntityService;
use crate::step_machine::{Interrupted, StepMachine, TickReport};
use crate::trigger_matcher::match_event;

/// Default lease on an enrollment's processing lock, in seconds.
pub const DEFAULT_LOCK_LEASE_SECS: i64 = 1800;

/// Upper bound on any lease, in seconds.
pub const MAX_LOCK_LEASE_SECS: i64 = 86_400;

/// Lease time added on top of the tick budget for the reads and writes around a tick.
pub const LOCK_LEASE_GRACE_SECS: i64 = 60;

/// How [`AutomationEngine::process_enrollment`] treats the due time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    /// Only tick when `next_step_at` has passed.
    Due,
    /// Tick now, whatever the schedule says.
    Force,
}

/// Result of one [`AutomationEngine::process_enrollment`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// A tick ran and was persisted.
    Processed(LogOutcome),
    /// Another worker holds the lease.
    Locked,
    NotDue,
    NotActive,
    /// The automation is disabled; the enrollment waits.
    Paused,
    /// The enrollment was ended, or the lease lost, while the tick ran; the
    /// tick's state was dropped.
    Superseded,
}

/// An entity a manual enrollment would pick up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewEntry {
    pub entity: CrmEntity,
    pub already_enrolled: bool,
}

pub struct AutomationEngine<A, N, L, S, P> {
    automations: A,
    enrollments: N,
    logs: L,
    entities: Arc<EntityService<S, P>>,
    machine: StepMachine<S, P>,
    catalog: Arc<AutomationCatalog>,
    clock: SharedClock,
    notify: Arc<Notify>,
    lock_lease: TimeDelta,
}

impl<A, N, L, S, P> AutomationEngine<A, N, L, S, P>
where
    A: AutomationRepository,
    N: EnrollmentRepository,
    L: AutomationLogRepository,
    S: EntityStore,
    P: EventPublisher,
{
    pub fn new(
        automations: A,
        enrollments: N,
        logs: L,
        entities: Arc<EntityService<S, P>>,
        machine: StepMachine<S, P>,
        catalog: Arc<AutomationCatalog>,
        clock: SharedClock,
    ) -> Self {
        let lock_lease =
            lease_floor(machine.tick_budget()).max(TimeDelta::seconds(DEFAULT_LOCK_LEASE_SECS));
        Self {
            automations,
            enrollments,
            logs,
            entities,
            machine,
            catalog,
            clock,
            notify: Arc::new(Notify::new()),
            lock_lease,
        }
    }

    /// Set the processing lease.
    ///
    /// The lease never drops below the machine's tick budget plus
    /// [`LOCK_LEASE_GRACE_SECS`].
    #[must_use]
    pub fn with_lock_lease(mut self, lease: TimeDelta) -> Self {
        self.lock_lease = lease.max(lease_floor(self.machine.tick_budget()));
        self
    }

    #[must_use]
    pub fn lock_lease(&self) -> TimeDelta {
        self.lock_lease
    }

    /// Signalled whenever a new enrollment becomes due.
    #[must_use]
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    #[must_use]
    pub fn enrollment_repo(&self) -> &N {
        &self.enrollments
    }

    #[must_use]
    pub fn log_repo(&self) -> &L {
        &self.logs
    }

    /// React to one entity event.
    ///
    /// Deletions unenroll every active enrollment of the entity. Other events
    /// are matched against the catalog; a failure for one automation is
    /// logged and does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns a storage error when unenrolling a deleted entity fails.
    #[tracing::instrument(
        skip_all,
        fields(event_id = %event.id, event_type = %event.event_type, entity = %event.entity.entity_ref())
    )]
    pub async fn handle_event(&self, event: &EntityEvent) -> Result<Vec<EnrollmentId>, CrmFlowError> {
        if event.event_type.is_deletion() {
            self.unenroll_entity(event.entity.entity_ref(), "entity deleted")
                .await?;
            return Ok(Vec::new());
        }

        let snapshot = self.catalog.snapshot();
        let mut enrolled = Vec::new();
        for automation in match_event(event, &snapshot) {
            match self.consider(automation, &event.entity).await {
                Ok(Some(id)) => enrolled.push(id),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(automation_id = %automation.id, error = %err, "failed to enroll");
                }
            }
        }
        Ok(enrolled)
    }

    /// Decide whether `entity` enters `automation`, and enroll it if so.
    async fn consider(
        &self,
        automation: &Automation,
        entity: &CrmEntity,
    ) -> Result<Option<EnrollmentId>, CrmFlowError> {
        let target = entity.entity_ref();
        let now = self.clock.now();
        let (passed, conditions) = evaluate_traced(&automation.conditions, entity);
        if !passed {
            self.skip(automation, target, conditions, "conditions not met")
                .await?;
            return Ok(None);
        }

        let latest = self.enrollments.find_latest(automation.id, target).await?;
        let enrollment = match (automation.re_enrollment, latest) {
            (ReEnrollmentPolicy::Once, Some(_)) => {
                self.skip(automation, target, conditions, "already enrolled once")
                    .await?;
                return Ok(None);
            }
            (ReEnrollmentPolicy::Skip, Some(existing)) if existing.is_active() => {
                self.skip(automation, target, conditions, "already enrolled")
                    .await?;
                return Ok(None);
            }
            (ReEnrollmentPolicy::Restart, Some(existing)) if existing.is_active() => {
                match self.restart(existing.id).await? {
                    Ok(restarted) => restarted,
                    Err(reason) => {
                        self.skip(automation, target, conditions, reason).await?;
                        return Ok(None);
                    }
                }
            }
            _ => {
                let fresh = Enrollment::new(automation.id, automation.tenant_id, target, now);
                if !self.enrollments.insert_active(fresh.clone()).await? {
                    self.skip(automation, target, conditions, "already enrolled")
                        .await?;
                    return Ok(None);
                }
                fresh
            }
        };

        self.automations.mark_triggered(automation.id, now).await?;
        self.logs
            .append(
                AutomationLog::new(automation, target, LogOutcome::Enrolled, now)
                    .for_enrollment(&enrollment)
                    .with_conditions(conditions),
            )
            .await?;
        tracing::info!(
            automation_id = %automation.id,
            enrollment_id = %enrollment.id,
            "entity enrolled"
        );
        self.notify.notify_one();
        Ok(Some(enrollment.id))
    }

    /// Rewind an active enrollment to its first step under its lease.
    ///
    /// Yields the reason instead when a tick holds the lease or the
    /// enrollment ended in the meantime.
    async fn restart(
        &self,
        id: EnrollmentId,
    ) -> Result<Result<Enrollment, &'static str>, CrmFlowError> {
        let token = LeaseToken::new();
        if !self.lock(id, token).await? {
            return Ok(Err("enrollment is being processed"));
        }
        let result = self.restart_leased(id, token).await;
        self.release(id, token).await;
        result
    }

    async fn restart_leased(
        &self,
        id: EnrollmentId,
        token: LeaseToken,
    ) -> Result<Result<Enrollment, &'static str>, CrmFlowError> {
        let mut enrollment = self.enrollment(id).await?;
        if !enrollment.is_active() {
            return Ok(Err("enrollment ended concurrently"));
        }
        enrollment.restart(self.clock.now());
        if !self.enrollments.save_leased(&enrollment, token).await? {
            return Ok(Err("enrollment ended concurrently"));
        }
        tracing::debug!(enrollment_id = %id, "enrollment restarted");
        Ok(Ok(enrollment))
    }

    async fn skip(
        &self,
        automation: &Automation,
        entity: EntityRef,
        conditions: Vec<ConditionOutcome>,
        reason: &str,
    ) -> Result<(), CrmFlowError> {
        tracing::debug!(automation_id = %automation.id, reason, "enrollment skipped");
        self.logs
            .append(
                AutomationLog::new(automation, entity, LogOutcome::Skipped, self.clock.now())
                    .with_conditions(conditions)
                    .with_error(reason),
            )
            .await?;
        Ok(())
    }

    async fn unenroll_entity(&self, entity: EntityRef, reason: &str) -> Result<(), CrmFlowError> {
        for mut enrollment in self.enrollments.find_active_for_entity(entity).await? {
            enrollment.unenroll(self.clock.now(), reason);
            if self.enrollments.save(&enrollment).await? {
                self.log_unenrolled(&enrollment, reason).await?;
            }
        }
        Ok(())
    }

    async fn log_unenrolled(&self, enrollment: &Enrollment, reason: &str) -> Result<(), CrmFlowError> {
        let Some(automation) = self.automations.get_by_id(enrollment.automation_id).await? else {
            return Ok(());
        };
        self.logs
            .append(
                AutomationLog::new(
                    &automation,
                    enrollment.entity,
                    LogOutcome::Unenrolled,
                    self.clock.now(),
                )
                .for_enrollment(enrollment)
                .with_error(reason),
            )
            .await?;
        Ok(())
    }

    /// Manually enroll an entity, bypassing trigger and conditions.
    ///
    /// Returns the existing enrollment when the entity is already active in
    /// the automation.
    ///
    /// # Errors
    ///
    /// - [`CrmFlowError::NotFound`] when the automation or entity is missing
    /// - [`ValidationError::TenantMismatch`] when they belong to different tenants
    #[tracing::instrument(skip(self))]
    pub async fn enroll(
        &self,
        automation_id: AutomationId,
        entity: EntityRef,
    ) -> Result<Enrollment, CrmFlowError> {
        let automation = self.automation(automation_id).await?;
        let snapshot = self.entities.get_entity(entity).await?;
        if snapshot.tenant_id != automation.tenant_id {
            return Err(ValidationError::TenantMismatch.into());
        }

        if let Some(existing) = self.active_enrollment(automation_id, entity).await? {
            return Ok(existing);
        }
        let now = self.clock.now();
        let fresh = Enrollment::new(automation.id, automation.tenant_id, entity, now);
        if !self.enrollments.insert_active(fresh.clone()).await? {
            return self
                .active_enrollment(automation_id, entity)
                .await?
                .ok_or_else(|| {
                    NotFoundError {
                        entity: "Enrollment",
                        id: entity.to_string(),
                    }
                    .into()
                });
        }

        self.logs
            .append(
                AutomationLog::new(&automation, entity, LogOutcome::Enrolled, now)
                    .for_enrollment(&fresh),
            )
            .await?;
        self.notify.notify_one();
        Ok(fresh)
    }

    /// End an active enrollment. Terminal enrollments are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::NotFound`] when the enrollment does not exist,
    /// or a storage error.
    #[tracing::instrument(skip(self))]
    pub async fn unenroll(&self, id: EnrollmentId, reason: &str) -> Result<Enrollment, CrmFlowError> {
        let mut enrollment = self.enrollment(id).await?;
        if !enrollment.is_active() {
            return Ok(enrollment);
        }
        enrollment.unenroll(self.clock.now(), reason);
        if self.enrollments.save(&enrollment).await? {
            self.log_unenrolled(&enrollment, reason).await?;
            Ok(enrollment)
        } else {
            self.enrollment(id).await
        }
    }

    /// Entities of the automation's tenant and trigger kind that satisfy its
    /// conditions right now. Nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::NotFound`] when the automation does not exist,
    /// or a storage error.
    pub async fn preview_enrollment(
        &self,
        automation_id: AutomationId,
    ) -> Result<Vec<PreviewEntry>, CrmFlowError> {
        let automation = self.automation(automation_id).await?;
        let kind = automation.trigger.event.entity_kind();
        let mut preview = Vec::new();
        for entity in self.entities.list_entities(automation.tenant_id, kind).await? {
            if !evaluate(&automation.conditions, &entity) {
                continue;
            }
            let already_enrolled = self
                .active_enrollment(automation.id, entity.entity_ref())
                .await?
                .is_some();
            preview.push(PreviewEntry {
                entity,
                already_enrolled,
            });
        }
        Ok(preview)
    }

    /// Active enrollments due now, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn due_enrollments(&self, limit: usize) -> Result<Vec<Enrollment>, CrmFlowError> {
        self.enrollments.load_due(self.clock.now(), limit).await
    }

    /// Run one tick of an enrollment under its lease lock.
    ///
    /// The lock is always released, also when the tick fails.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::NotFound`] when the enrollment does not exist,
    /// or a storage error. A tick cut short by storage keeps the steps that
    /// completed before the failure, when they can still be saved, and
    /// leaves the enrollment due at the failed step.
    #[tracing::instrument(skip(self))]
    pub async fn process_enrollment(
        &self,
        id: EnrollmentId,
        mode: ProcessMode,
    ) -> Result<ProcessOutcome, CrmFlowError> {
        self.enrollment(id).await?;
        let token = LeaseToken::new();
        if !self.lock(id, token).await? {
            tracing::debug!("enrollment locked by another worker");
            return Ok(ProcessOutcome::Locked);
        }

        let result = self.process_locked(id, mode, token).await;
        self.release(id, token).await;
        result
    }

    async fn lock(&self, id: EnrollmentId, token: LeaseToken) -> Result<bool, CrmFlowError> {
        let now = self.clock.now();
        self.enrollments
            .try_lock(id, token, now, now + self.lock_lease)
            .await
    }

    async fn release(&self, id: EnrollmentId, token: LeaseToken) {
        if let Err(err) = self.enrollments.unlock(id, token).await {
            tracing::warn!(error = %err, "failed to release enrollment lock");
        }
    }

    async fn process_locked(
        &self,
        id: EnrollmentId,
        mode: ProcessMode,
        token: LeaseToken,
    ) -> Result<ProcessOutcome, CrmFlowError> {
        let mut enrollment = self.enrollment(id).await?;
        let now = self.clock.now();
        if !enrollment.is_active() {
            return Ok(ProcessOutcome::NotActive);
        }
        if mode == ProcessMode::Due && !enrollment.is_due(now) {
            return Ok(ProcessOutcome::NotDue);
        }

        let Some(automation) = self
            .automations
            .get_by_id(enrollment.automation_id)
            .await?
        else {
            enrollment.unenroll(now, "automation deleted");
            if !self.enrollments.save_leased(&enrollment, token).await? {
                return Ok(ProcessOutcome::Superseded);
            }
            return Ok(ProcessOutcome::Processed(LogOutcome::Unenrolled));
        };
        if !automation.enabled {
            return Ok(ProcessOutcome::Paused);
        }

        let entity = match self.entities.get_entity(enrollment.entity).await {
            Ok(entity) => entity,
            Err(CrmFlowError::NotFound(_)) => {
                let reason = "entity no longer exists";
                enrollment.unenroll(now, reason);
                if !self.enrollments.save_leased(&enrollment, token).await? {
                    return Ok(ProcessOutcome::Superseded);
                }
                self.log_unenrolled(&enrollment, reason).await?;
                return Ok(ProcessOutcome::Processed(LogOutcome::Unenrolled));
            }
            Err(err) => return Err(err),
        };

        let report = match self.machine.tick(&automation, &mut enrollment, entity).await {
            Ok(report) => report,
            Err(interrupted) => {
                let Interrupted { report, source } = *interrupted;
                self.record_interruption(&automation, &enrollment, report, &source, token)
                    .await;
                return Err(source);
            }
        };
        let saved = self.enrollments.save_leased(&enrollment, token).await?;

        let outcome = report.outcome;
        let mut log = tick_log(&automation, &enrollment, report, self.clock.now());
        if !saved && log.error.is_none() {
            log = log.with_error("enrollment ended while the step ran");
        }
        self.logs.append(log).await?;

        if !saved {
            tracing::info!("enrollment ended or lease lost, tick discarded");
            return Ok(ProcessOutcome::Superseded);
        }
        tracing::debug!(%outcome, "tick persisted");
        Ok(ProcessOutcome::Processed(outcome))
    }

    /// Keep the progress of a tick cut short by storage and log the failure.
    ///
    /// Both writes are best effort: storage is already failing.
    async fn record_interruption(
        &self,
        automation: &Automation,
        enrollment: &Enrollment,
        report: TickReport,
        source: &CrmFlowError,
        token: LeaseToken,
    ) {
        match self.enrollments.save_leased(enrollment, token).await {
            Ok(true) => {}
            Ok(false) => tracing::info!("enrollment ended or lease lost, progress dropped"),
            Err(err) => tracing::warn!(error = %err, "failed to save interrupted tick"),
        }
        let log = tick_log(automation, enrollment, report, self.clock.now())
            .with_error(format!("tick interrupted: {source}"));
        if let Err(err) = self.logs.append(log).await {
            tracing::warn!(error = %err, "failed to log interrupted tick");
        }
    }

    async fn automation(&self, id: AutomationId) -> Result<Automation, CrmFlowError> {
        self.automations.get_by_id(id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "Automation",
                id: id.to_string(),
            }
            .into()
        })
    }

    async fn enrollment(&self, id: EnrollmentId) -> Result<Enrollment, CrmFlowError> {
        self.enrollments.get_by_id(id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "Enrollment",
                id: id.to_string(),
            }
            .into()
        })
    }

    async fn active_enrollment(
        &self,
        automation_id: AutomationId,
        entity: EntityRef,
    ) -> Result<Option<Enrollment>, CrmFlowError> {
        Ok(self
            .enrollments
            .find_latest(automation_id, entity)
            .await?
            .filter(Enrollment::is_active))
    }
}

/// Shortest lease that outlasts a tick of at most `tick_budget`.
fn lease_floor(tick_budget: Duration) -> TimeDelta {
    let budget = i64::try_from(tick_budget.as_secs())
        .unwrap_or(MAX_LOCK_LEASE_SECS)
        .saturating_add(i64::from(tick_budget.subsec_nanos() > 0));
    TimeDelta::seconds(budget.min(MAX_LOCK_LEASE_SECS) + LOCK_LEASE_GRACE_SECS)
}

fn tick_log(
    automation: &Automation,
    enrollment: &Enrollment,
    report: TickReport,
    at: Timestamp,
) -> AutomationLog {
    let mut log = AutomationLog::new(automation, enrollment.entity, report.outcome, at)
        .for_enrollment(enrollment)
        .with_conditions(report.conditions)
        .with_actions(report.actions);
    if let Some(step_index) = report.step_index {
        log = log.with_step(step_index);
    }
    if let Some(error) = report.error {
        log = log.with_error(error);
    }
    log
}
