//! In-memory implementations of every port.
//!
//! Used by the test suites and for running the engine without a database.
//! Each store keeps its state behind one [`Mutex`], so every operation is
//! atomic with respect to the others.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crmflow_domain::automation::Automation;
use crmflow_domain::enrollment::Enrollment;
use crmflow_domain::entity::{CrmEntity, EntityKind, EntityPatch, EntityRef, EntitySchema};
use crmflow_domain::error::{ConflictError, CrmFlowError, NotFoundError};
use crmflow_domain::id::{AutomationId, EnrollmentId, LeaseToken, TenantId};
use crmflow_domain::log::AutomationLog;
use crmflow_domain::time::Timestamp;

use crate::ports::{
    AutomationLogRepository, AutomationRepository, EnrollmentRepository, EntityStore, EntityUpdate,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Automations ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryAutomationRepository {
    store: Mutex<HashMap<AutomationId, Automation>>,
}

impl AutomationRepository for InMemoryAutomationRepository {
    fn create(
        &self,
        automation: Automation,
    ) -> impl Future<Output = Result<Automation, CrmFlowError>> + Send {
        lock(&self.store).insert(automation.id, automation.clone());
        async move { Ok(automation) }
    }

    fn get_by_id(
        &self,
        id: AutomationId,
    ) -> impl Future<Output = Result<Option<Automation>, CrmFlowError>> + Send {
        let result = lock(&self.store).get(&id).cloned();
        async move { Ok(result) }
    }

    fn list_by_tenant(
        &self,
        tenant_id: TenantId,
    ) -> impl Future<Output = Result<Vec<Automation>, CrmFlowError>> + Send {
        let mut result: Vec<Automation> = lock(&self.store)
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        async move { Ok(result) }
    }

    fn get_enabled(&self) -> impl Future<Output = Result<Vec<Automation>, CrmFlowError>> + Send {
        let result: Vec<Automation> = lock(&self.store)
            .values()
            .filter(|a| a.enabled)
            .cloned()
            .collect();
        async move { Ok(result) }
    }

    fn update(
        &self,
        automation: Automation,
    ) -> impl Future<Output = Result<Automation, CrmFlowError>> + Send {
        let mut store = lock(&self.store);
        let result = if store.contains_key(&automation.id) {
            store.insert(automation.id, automation.clone());
            Ok(automation)
        } else {
            Err(NotFoundError {
                entity: "Automation",
                id: automation.id.to_string(),
            }
            .into())
        };
        async move { result }
    }

    fn mark_triggered(
        &self,
        id: AutomationId,
        at: Timestamp,
    ) -> impl Future<Output = Result<(), CrmFlowError>> + Send {
        if let Some(automation) = lock(&self.store).get_mut(&id) {
            automation.last_triggered = Some(at);
        }
        async { Ok(()) }
    }

    fn delete(&self, id: AutomationId) -> impl Future<Output = Result<(), CrmFlowError>> + Send {
        lock(&self.store).remove(&id);
        async { Ok(()) }
    }
}

// ── Enrollments ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct EnrollmentTable {
    rows: Vec<Enrollment>,
    leases: HashMap<EnrollmentId, (LeaseToken, Timestamp)>,
}

impl EnrollmentTable {
    fn find(&self, id: EnrollmentId) -> Option<&Enrollment> {
        self.rows.iter().find(|row| row.id == id)
    }

    fn holds(&self, id: EnrollmentId, token: LeaseToken) -> bool {
        self.leases.get(&id).is_some_and(|(holder, _)| *holder == token)
    }

    fn save_active(&mut self, enrollment: &Enrollment) -> bool {
        match self.rows.iter_mut().find(|row| row.id == enrollment.id) {
            Some(row) if row.is_active() => {
                *row = enrollment.clone();
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEnrollmentRepository {
    table: Mutex<EnrollmentTable>,
}

impl EnrollmentRepository for InMemoryEnrollmentRepository {
    fn insert_active(
        &self,
        enrollment: Enrollment,
    ) -> impl Future<Output = Result<bool, CrmFlowError>> + Send {
        let mut table = lock(&self.table);
        let taken = table.rows.iter().any(|row| {
            row.is_active()
                && row.automation_id == enrollment.automation_id
                && row.entity == enrollment.entity
        });
        if !taken {
            table.rows.push(enrollment);
        }
        async move { Ok(!taken) }
    }

    fn get_by_id(
        &self,
        id: EnrollmentId,
    ) -> impl Future<Output = Result<Option<Enrollment>, CrmFlowError>> + Send {
        let result = lock(&self.table).find(id).cloned();
        async move { Ok(result) }
    }

    fn find_latest(
        &self,
        automation_id: AutomationId,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Option<Enrollment>, CrmFlowError>> + Send {
        let result = lock(&self.table)
            .rows
            .iter()
            .rev()
            .find(|row| row.automation_id == automation_id && row.entity == entity)
            .cloned();
        async move { Ok(result) }
    }

    fn find_active_for_entity(
        &self,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Vec<Enrollment>, CrmFlowError>> + Send {
        let result: Vec<Enrollment> = lock(&self.table)
            .rows
            .iter()
            .filter(|row| row.is_active() && row.entity == entity)
            .cloned()
            .collect();
        async move { Ok(result) }
    }

    fn list_by_automation(
        &self,
        automation_id: AutomationId,
    ) -> impl Future<Output = Result<Vec<Enrollment>, CrmFlowError>> + Send {
        let result: Vec<Enrollment> = lock(&self.table)
            .rows
            .iter()
            .rev()
            .filter(|row| row.automation_id == automation_id)
            .cloned()
            .collect();
        async move { Ok(result) }
    }

    fn load_due(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Enrollment>, CrmFlowError>> + Send {
        let mut due: Vec<Enrollment> = lock(&self.table)
            .rows
            .iter()
            .filter(|row| row.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|row| row.next_step_at);
        due.truncate(limit);
        async move { Ok(due) }
    }

    fn try_lock(
        &self,
        id: EnrollmentId,
        token: LeaseToken,
        now: Timestamp,
        lease_until: Timestamp,
    ) -> impl Future<Output = Result<bool, CrmFlowError>> + Send {
        let mut table = lock(&self.table);
        let free = table.find(id).is_some()
            && table.leases.get(&id).is_none_or(|(_, until)| *until <= now);
        if free {
            table.leases.insert(id, (token, lease_until));
        }
        async move { Ok(free) }
    }

    fn unlock(
        &self,
        id: EnrollmentId,
        token: LeaseToken,
    ) -> impl Future<Output = Result<(), CrmFlowError>> + Send {
        let mut table = lock(&self.table);
        if table.holds(id, token) {
            table.leases.remove(&id);
        }
        async { Ok(()) }
    }

    fn save(
        &self,
        enrollment: &Enrollment,
    ) -> impl Future<Output = Result<bool, CrmFlowError>> + Send {
        let saved = lock(&self.table).save_active(enrollment);
        async move { Ok(saved) }
    }

    fn save_leased(
        &self,
        enrollment: &Enrollment,
        token: LeaseToken,
    ) -> impl Future<Output = Result<bool, CrmFlowError>> + Send {
        let mut table = lock(&self.table);
        let saved = table.holds(enrollment.id, token) && table.save_active(enrollment);
        async move { Ok(saved) }
    }
}

// ── Logs ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryAutomationLogRepository {
    logs: Mutex<Vec<AutomationLog>>,
}

impl AutomationLogRepository for InMemoryAutomationLogRepository {
    fn append(
        &self,
        log: AutomationLog,
    ) -> impl Future<Output = Result<AutomationLog, CrmFlowError>> + Send {
        lock(&self.logs).push(log.clone());
        async move { Ok(log) }
    }

    fn list_by_automation(
        &self,
        automation_id: AutomationId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<AutomationLog>, CrmFlowError>> + Send {
        let result: Vec<AutomationLog> = lock(&self.logs)
            .iter()
            .rev()
            .filter(|log| log.automation_id == automation_id)
            .take(limit)
            .cloned()
            .collect();
        async move { Ok(result) }
    }

    fn list_by_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> impl Future<Output = Result<Vec<AutomationLog>, CrmFlowError>> + Send {
        let result: Vec<AutomationLog> = lock(&self.logs)
            .iter()
            .filter(|log| log.enrollment_id == Some(enrollment_id))
            .cloned()
            .collect();
        async move { Ok(result) }
    }
}

// ── Entities ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    entities: Mutex<HashMap<EntityRef, CrmEntity>>,
    schemas: Mutex<HashMap<(TenantId, EntityKind), EntitySchema>>,
}

impl EntityStore for InMemoryEntityStore {
    fn get(
        &self,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Option<CrmEntity>, CrmFlowError>> + Send {
        let result = lock(&self.entities).get(&entity).cloned();
        async move { Ok(result) }
    }

    fn list(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
    ) -> impl Future<Output = Result<Vec<CrmEntity>, CrmFlowError>> + Send {
        let mut result: Vec<CrmEntity> = lock(&self.entities)
            .values()
            .filter(|e| e.tenant_id == tenant_id && e.kind == kind)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        async move { Ok(result) }
    }

    fn create(
        &self,
        entity: CrmEntity,
    ) -> impl Future<Output = Result<CrmEntity, CrmFlowError>> + Send {
        lock(&self.entities).insert(entity.entity_ref(), entity.clone());
        async move { Ok(entity) }
    }

    fn update(
        &self,
        entity: EntityRef,
        patch: EntityPatch,
        expected_version: Option<u64>,
        at: Timestamp,
    ) -> impl Future<Output = Result<EntityUpdate, CrmFlowError>> + Send {
        let mut entities = lock(&self.entities);
        let result = match entities.get_mut(&entity) {
            None => Err(NotFoundError {
                entity: "Entity",
                id: entity.to_string(),
            }
            .into()),
            Some(stored) if expected_version.is_some_and(|v| v != stored.version) => {
                Err(ConflictError {
                    entity: "Entity",
                    id: entity.to_string(),
                    expected: expected_version.unwrap_or_default(),
                    actual: stored.version,
                }
                .into())
            }
            Some(stored) => {
                let changes = patch.apply(stored, at);
                Ok(EntityUpdate {
                    entity: stored.clone(),
                    changes,
                })
            }
        };
        async move { result }
    }

    fn delete(
        &self,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Option<CrmEntity>, CrmFlowError>> + Send {
        let result = lock(&self.entities).remove(&entity);
        async move { Ok(result) }
    }

    fn schema(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
    ) -> impl Future<Output = Result<EntitySchema, CrmFlowError>> + Send {
        let result = lock(&self.schemas)
            .get(&(tenant_id, kind))
            .cloned()
            .unwrap_or_default();
        async move { Ok(result) }
    }

    fn put_schema(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
        schema: EntitySchema,
    ) -> impl Future<Output = Result<EntitySchema, CrmFlowError>> + Send {
        lock(&self.schemas).insert((tenant_id, kind), schema.clone());
        async move { Ok(schema) }
    }
}
