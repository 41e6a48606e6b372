//! End-to-end tests for the full crmflowd stack.
//!
//! Each test spins up the complete application (in-memory `SQLite`, real
//! repos, real engine, real axum router) and exercises the HTTP layer via
//! `tower::ServiceExt::oneshot` — no TCP port is bound. The event listener
//! runs in the background; sweeps are driven by the test.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use crmflow_adapter_http_axum::router;
use crmflow_adapter_http_axum::state::AppState;
use crmflow_adapter_storage_sqlite_sqlx::{
    Config, SqliteAutomationLogRepository, SqliteAutomationRepository, SqliteEnrollmentRepository,
    SqliteEntityStore,
};
use crmflow_app::action_executor::ActionExecutor;
use crmflow_app::automation_catalog::AutomationCatalog;
use crmflow_app::automation_engine::AutomationEngine;
use crmflow_app::dispatcher::{Dispatcher, DispatcherConfig, listen_events};
use crmflow_app::event_bus::InProcessEventBus;
use crmflow_app::ports::{SharedClock, SystemClock};
use crmflow_app::services::automation_service::AutomationService;
use crmflow_app::services::enrollment_service::EnrollmentService;
use crmflow_app::services::entity_service::EntityService;
use crmflow_app::step_machine::StepMachine;
use crmflow_domain::id::TenantId;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::sync::watch;
use tower::ServiceExt;

type SqliteDispatcher = Dispatcher<
    Arc<SqliteAutomationRepository>,
    Arc<SqliteEnrollmentRepository>,
    Arc<SqliteAutomationLogRepository>,
    Arc<SqliteEntityStore>,
    Arc<InProcessEventBus>,
>;

struct Stack {
    router: Router,
    dispatcher: SqliteDispatcher,
    // dropping the sender stops the event listener
    _shutdown: watch::Sender<bool>,
}

/// Build a fully-wired stack backed by an in-memory `SQLite` database.
async fn stack() -> Stack {
    let db = Config::in_memory()
        .build()
        .await
        .expect("in-memory database should initialise");
    let pool = db.pool().clone();

    let automations = Arc::new(SqliteAutomationRepository::new(pool.clone()));
    let enrollments = Arc::new(SqliteEnrollmentRepository::new(pool.clone()));
    let logs = Arc::new(SqliteAutomationLogRepository::new(pool.clone()));
    let store = Arc::new(SqliteEntityStore::new(pool));
    let bus = Arc::new(InProcessEventBus::new(256));
    let clock: SharedClock = Arc::new(SystemClock);
    let catalog = Arc::new(AutomationCatalog::default());

    let entity_service = Arc::new(EntityService::new(
        store,
        Arc::clone(&bus),
        Arc::clone(&clock),
    ));
    let machine = StepMachine::new(
        Arc::new(ActionExecutor::new(Arc::clone(&entity_service))),
        Arc::clone(&clock),
    );
    let engine = Arc::new(AutomationEngine::new(
        Arc::clone(&automations),
        enrollments,
        Arc::clone(&logs),
        Arc::clone(&entity_service),
        machine,
        Arc::clone(&catalog),
        Arc::clone(&clock),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(listen_events(
        Arc::clone(&engine),
        bus.subscribe(),
        shutdown_rx,
    ));

    let state = AppState::from_arcs(
        Arc::new(AutomationService::new(automations, logs, catalog, clock)),
        Arc::new(EnrollmentService::new(Arc::clone(&engine))),
        entity_service,
    );
    Stack {
        router: router::build(state),
        dispatcher: Dispatcher::new(engine, DispatcherConfig::default()),
        _shutdown: shutdown_tx,
    }
}

impl Stack {
    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let resp = self.router.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body)).await
    }

    /// Sweep until the automation has `count` enrollments, none of them active.
    async fn settle(&self, automation_id: &str, count: usize) -> Vec<Value> {
        for _ in 0..200 {
            self.dispatcher.sweep().await;
            let (_, enrollments) = self
                .get(&format!("/api/automations/{automation_id}/enrollments"))
                .await;
            let enrollments = enrollments.as_array().cloned().unwrap_or_default();
            if enrollments.len() == count
                && enrollments.iter().all(|e| e["status"] != "active")
            {
                return enrollments;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("automation {automation_id} never settled on {count} finished enrollments");
    }
}

async fn with_contact_schema(stack: &Stack, tenant: TenantId) {
    let (status, _) = stack
        .send(
            Method::PUT,
            &format!("/api/tenants/{tenant}/schemas/contact"),
            Some(json!({ "custom_fields": ["industry"], "tags": ["vip", "nurture"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

async fn create_contact(stack: &Stack, tenant: TenantId, email: &str) -> Value {
    let (status, contact) = stack
        .post(
            "/api/entities",
            json!({
                "tenant_id": tenant,
                "entity_type": "contact",
                "fields": { "email": email, "first_name": "Ada" },
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    contact
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_return_ok_when_health_check_called() {
    let stack = stack().await;
    let resp = stack
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Event-driven automation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_tag_matching_contact_when_created() {
    let stack = stack().await;
    let tenant = TenantId::new();
    with_contact_schema(&stack, tenant).await;

    let (status, automation) = stack
        .post(
            "/api/automations",
            json!({
                "tenant_id": tenant,
                "name": "Tag acme contacts",
                "trigger": { "type": "contact_created" },
                "conditions": [
                    { "field": "email", "operator": "contains", "value": "@acme.com" }
                ],
                "actions": [ { "type": "add_tag", "tag": "vip" } ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let automation_id = automation["id"].as_str().unwrap().to_string();

    // events are handled in order, so the skip is logged before the enrollment exists
    let other = create_contact(&stack, tenant, "bob@example.com").await;
    let matching = create_contact(&stack, tenant, "ada@acme.com").await;

    let enrollments = stack.settle(&automation_id, 1).await;
    assert_eq!(enrollments[0]["status"], "completed");
    assert_eq!(enrollments[0]["entity"]["entity_id"], matching["id"]);

    let (_, tagged) = stack
        .get(&format!("/api/entities/contact/{}", matching["id"].as_str().unwrap()))
        .await;
    assert_eq!(tagged["tags"], json!(["vip"]));
    let (_, untouched) = stack
        .get(&format!("/api/entities/contact/{}", other["id"].as_str().unwrap()))
        .await;
    assert_eq!(untouched["tags"], json!([]));

    let (status, summary) = stack
        .get(&format!("/api/automations/{automation_id}/summary"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total"], 1);
    assert_eq!(summary["counts"]["completed"], 1);

    let (_, logs) = stack
        .get(&format!("/api/automations/{automation_id}/logs"))
        .await;
    let outcomes: Vec<&str> = logs
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|log| log["outcome"].as_str())
        .collect();
    assert!(outcomes.contains(&"enrolled"));
    assert!(outcomes.contains(&"completed"));
    assert!(outcomes.contains(&"skipped"));

    let (_, stored) = stack
        .get(&format!("/api/automations/{automation_id}"))
        .await;
    assert!(stored["last_triggered"].is_string());
}

// ---------------------------------------------------------------------------
// Manual control
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_suspend_on_delay_and_stop_when_unenrolled() {
    let stack = stack().await;
    let tenant = TenantId::new();
    with_contact_schema(&stack, tenant).await;

    let (status, automation) = stack
        .post(
            "/api/automations",
            json!({
                "tenant_id": tenant,
                "name": "Nurture",
                "trigger": { "type": "contact_updated" },
                "steps": [
                    {
                        "step_index": 0,
                        "type": "delay",
                        "delay": { "value": 2, "unit": "days" },
                        "next_step_index": 1
                    },
                    {
                        "step_index": 1,
                        "type": "action",
                        "actions": [ { "type": "add_tag", "tag": "nurture" } ]
                    }
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(automation["multi_step"], true);
    let automation_id = automation["id"].as_str().unwrap().to_string();
    let contact = create_contact(&stack, tenant, "ada@acme.com").await;

    let (status, enrollment) = stack
        .post(
            &format!("/api/automations/{automation_id}/enroll"),
            json!({ "entity_type": "contact", "entity_id": contact["id"] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let enrollment_id = enrollment["id"].as_str().unwrap().to_string();

    let (status, outcome) = stack
        .post(&format!("/api/enrollments/{enrollment_id}/process"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome, json!({ "status": "processed", "outcome": "suspended" }));

    let (_, waiting) = stack.get(&format!("/api/enrollments/{enrollment_id}")).await;
    assert_eq!(waiting["status"], "active");
    assert_eq!(waiting["current_step_index"], 1);
    assert!(waiting["next_step_at"].is_string());

    let (status, stopped) = stack
        .post(&format!("/api/enrollments/{enrollment_id}/unenroll"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["status"], "unenrolled");

    let (_, outcome) = stack
        .post(&format!("/api/enrollments/{enrollment_id}/process"), json!({}))
        .await;
    assert_eq!(outcome, json!({ "status": "not_active" }));

    let (_, logs) = stack
        .get(&format!("/api/enrollments/{enrollment_id}/logs"))
        .await;
    let outcomes: Vec<&str> = logs
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|log| log["outcome"].as_str())
        .collect();
    assert_eq!(outcomes, vec!["enrolled", "suspended", "unenrolled"]);
}

// ---------------------------------------------------------------------------
// Validation and error mapping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_reject_enabled_automation_with_dangling_step() {
    let stack = stack().await;
    let draft = json!({
        "tenant_id": TenantId::new(),
        "name": "Broken",
        "trigger": { "type": "deal_created" },
        "steps": [
            {
                "step_index": 0,
                "type": "delay",
                "delay": { "value": 1, "unit": "hours" },
                "next_step_index": 7
            }
        ],
    });

    let (status, report) = stack.post("/api/automations/validate", draft.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["valid"], false);

    let (status, body) = stack.post("/api/automations", draft).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn should_return_conflict_when_expected_version_is_stale() {
    let stack = stack().await;
    let tenant = TenantId::new();
    with_contact_schema(&stack, tenant).await;
    let contact = create_contact(&stack, tenant, "ada@acme.com").await;
    let uri = format!("/api/entities/contact/{}", contact["id"].as_str().unwrap());

    let (status, updated) = stack
        .send(
            Method::PATCH,
            &uri,
            Some(json!({ "fields": { "city": "Paris" }, "expected_version": contact["version"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["fields"]["city"], "Paris");

    let (status, _) = stack
        .send(
            Method::PATCH,
            &uri,
            Some(json!({ "fields": { "city": "Lyon" }, "expected_version": contact["version"] })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn should_map_missing_and_malformed_resources() {
    let stack = stack().await;

    let (status, _) = stack
        .get(&format!("/api/automations/{}", TenantId::new()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = stack
        .get(&format!("/api/entities/company/{}", TenantId::new()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = stack.get("/api/enrollments/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
