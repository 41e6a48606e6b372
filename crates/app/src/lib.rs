//! # crmflow-app
//!
//! Application layer — use-cases, the automation engine and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `AutomationRepository` — CRUD for automations
//!   - `EnrollmentRepository` — enrollments, due-time scheduling and lease locks
//!   - `AutomationLogRepository` — the append-only audit trail
//!   - `EntityStore` — contacts, deals and tenant schemas
//!   - `EventPublisher` — entity change notifications
//!   - `Clock` — the only source of "now"
//! - Run the engine: trigger matching, the step state machine, action
//!   execution and the background dispatcher
//! - Define **driving/inbound ports** as use-case structs:
//!   - `AutomationService` — create, update, toggle, validate, delete, logs
//!   - `EnrollmentService` — enroll, unenroll, process, preview, summary
//!   - `EntityService` — the CRM write path that produces entity events
//! - Provide **in-process infrastructure** that doesn't need IO (event bus,
//!   automation catalog, in-memory adapters)
//!
//! ## Dependency rule
//! Depends on `crmflow-domain` only (plus `tokio` for channels, timers and tasks).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod action_executor;
pub mod automation_catalog;
pub mod automation_engine;
pub mod dispatcher;
pub mod event_bus;
pub mod memory;
pub mod ports;
pub mod services;
pub mod step_machine;
pub mod trigger_matcher;

#[cfg(test)]
mod testing;
