//! Shared fixtures for the app-layer tests.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crmflow_domain::automation::{Action, Automation, AutomationStep, DelayConfig, DelayUnit, Trigger};
use crmflow_domain::entity::{CrmEntity, EntityKind, EntityPatch, EntityRef, EntitySchema};
use crmflow_domain::error::CrmFlowError;
use crmflow_domain::event::{EntityEvent, EventOrigin, EventType};
use crmflow_domain::id::TenantId;
use crmflow_domain::time::Timestamp;

use crate::action_executor::ActionExecutor;
use crate::automation_catalog::AutomationCatalog;
use crate::automation_engine::AutomationEngine;
use crate::event_bus::InProcessEventBus;
use crate::memory::{
    InMemoryAutomationLogRepository, InMemoryAutomationRepository, InMemoryEnrollmentRepository,
    InMemoryEntityStore,
};
use crate::ports::{AutomationRepository, Clock, EntityStore, EntityUpdate, ManualClock};
use crate::services::entity_service::EntityService;
use crate::step_machine::StepMachine;

pub(crate) type TestEntityService = EntityService<Arc<ControlledStore>, Arc<InProcessEventBus>>;

pub(crate) type TestEngine = AutomationEngine<
    Arc<InMemoryAutomationRepository>,
    Arc<InMemoryEnrollmentRepository>,
    Arc<InMemoryAutomationLogRepository>,
    Arc<ControlledStore>,
    Arc<InProcessEventBus>,
>;

/// Holds one entity update open until the test lets it go.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    /// Notified once the held update has started.
    pub entered: Notify,
    pub release: Notify,
}

/// In-memory entity store whose updates can be held open or made to fail.
#[derive(Debug, Default)]
pub(crate) struct ControlledStore {
    inner: InMemoryEntityStore,
    gate: Mutex<Option<Arc<Gate>>>,
    /// Updates still allowed before every further one fails; `None` never fails.
    updates_left: Mutex<Option<usize>>,
}

impl ControlledStore {
    /// Hold the next update until [`Gate::release`] is notified.
    pub fn hold_next_update(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Let `count` more updates through, then fail with a storage error.
    pub fn fail_updates_after(&self, count: usize) {
        *self.updates_left.lock().unwrap() = Some(count);
    }

    pub fn heal(&self) {
        *self.updates_left.lock().unwrap() = None;
    }

    fn admit_update(&self) -> bool {
        match self.updates_left.lock().unwrap().as_mut() {
            None => true,
            Some(0) => false,
            Some(left) => {
                *left -= 1;
                true
            }
        }
    }
}

impl EntityStore for ControlledStore {
    fn get(
        &self,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Option<CrmEntity>, CrmFlowError>> + Send {
        self.inner.get(entity)
    }

    fn list(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
    ) -> impl Future<Output = Result<Vec<CrmEntity>, CrmFlowError>> + Send {
        self.inner.list(tenant_id, kind)
    }

    fn create(
        &self,
        entity: CrmEntity,
    ) -> impl Future<Output = Result<CrmEntity, CrmFlowError>> + Send {
        self.inner.create(entity)
    }

    fn update(
        &self,
        entity: EntityRef,
        patch: EntityPatch,
        expected_version: Option<u64>,
        at: Timestamp,
    ) -> impl Future<Output = Result<EntityUpdate, CrmFlowError>> + Send {
        let gate = self.gate.lock().unwrap().take();
        let admitted = self.admit_update();
        async move {
            if let Some(gate) = gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            if !admitted {
                return Err(CrmFlowError::Storage("entity store unavailable".into()));
            }
            self.inner.update(entity, patch, expected_version, at).await
        }
    }

    fn delete(
        &self,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Option<CrmEntity>, CrmFlowError>> + Send {
        self.inner.delete(entity)
    }

    fn schema(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
    ) -> impl Future<Output = Result<EntitySchema, CrmFlowError>> + Send {
        self.inner.schema(tenant_id, kind)
    }

    fn put_schema(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
        schema: EntitySchema,
    ) -> impl Future<Output = Result<EntitySchema, CrmFlowError>> + Send {
        self.inner.put_schema(tenant_id, kind, schema)
    }
}

pub(crate) struct Harness {
    pub tenant: TenantId,
    pub clock: Arc<ManualClock>,
    pub automations: Arc<InMemoryAutomationRepository>,
    pub enrollments: Arc<InMemoryEnrollmentRepository>,
    pub logs: Arc<InMemoryAutomationLogRepository>,
    pub store: Arc<ControlledStore>,
    pub bus: Arc<InProcessEventBus>,
    pub entities: Arc<TestEntityService>,
    pub catalog: Arc<AutomationCatalog>,
    pub engine: Arc<TestEngine>,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let automations = Arc::new(InMemoryAutomationRepository::default());
        let enrollments = Arc::new(InMemoryEnrollmentRepository::default());
        let logs = Arc::new(InMemoryAutomationLogRepository::default());
        let store = Arc::new(ControlledStore::default());
        let bus = Arc::new(InProcessEventBus::new(64));
        let entities = Arc::new(EntityService::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            clock.clone(),
        ));
        let executor = Arc::new(ActionExecutor::new(Arc::clone(&entities)));
        let machine = StepMachine::new(executor, clock.clone());
        let catalog = Arc::new(AutomationCatalog::default());
        let engine = Arc::new(AutomationEngine::new(
            Arc::clone(&automations),
            Arc::clone(&enrollments),
            Arc::clone(&logs),
            Arc::clone(&entities),
            machine,
            Arc::clone(&catalog),
            clock.clone(),
        ));
        Self {
            tenant: TenantId::new(),
            clock,
            automations,
            enrollments,
            logs,
            store,
            bus,
            entities,
            catalog,
            engine,
        }
    }

    /// Store the automation and publish it to the catalog.
    pub async fn install(&self, automation: Automation) -> Automation {
        let created = self.automations.create(automation).await.unwrap();
        self.catalog.refresh(&self.automations).await.unwrap();
        created
    }

    /// Store a contact of the harness tenant, with the tenant schema in place.
    pub async fn contact(&self, fields: &[(&str, &str)]) -> CrmEntity {
        self.store
            .put_schema(self.tenant, EntityKind::Contact, schema())
            .await
            .unwrap();
        let mut builder = CrmEntity::builder().tenant_id(self.tenant);
        for (name, value) in fields {
            builder = builder.field(*name, *value);
        }
        self.store.create(builder.build().unwrap()).await.unwrap()
    }

    pub fn event(&self, event_type: EventType, entity: &CrmEntity) -> EntityEvent {
        EntityEvent::new(
            event_type,
            entity.clone(),
            Vec::new(),
            EventOrigin::User,
            self.clock.now(),
        )
    }
}

pub(crate) fn schema() -> EntitySchema {
    EntitySchema {
        custom_fields: BTreeSet::from(["industry".to_string()]),
        stages: vec!["new".into(), "won".into()],
        tags: BTreeSet::from(["new-lead".to_string(), "vip".to_string()]),
    }
}

/// Wait one hour, then tag the entity `new-lead`.
pub(crate) fn delayed_tag_workflow(tenant: TenantId, trigger: EventType) -> Automation {
    Automation::builder()
        .tenant_id(tenant)
        .name("delayed tag")
        .trigger(Trigger::on(trigger))
        .step(AutomationStep::delay(0, DelayConfig::new(1, DelayUnit::Hours)).then(1))
        .step(AutomationStep::action(
            1,
            vec![Action::AddTag {
                tag: "new-lead".into(),
            }],
        ))
        .build()
        .unwrap()
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
