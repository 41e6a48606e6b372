//! # crmflow-adapter-http-axum
//!
//! HTTP adapter built on [axum](https://docs.rs/axum).
//!
//! ## Responsibilities
//! - Serve a JSON API for managing automations, inspecting and driving
//!   enrollments, and editing the contacts and deals they operate on
//!   (`/api/automations`, `/api/enrollments`, `/api/entities`, …)
//! - Map HTTP requests into application service calls (driving adapter)
//! - Map application results and errors into HTTP responses
//!
//! ## Dependency rule
//! Depends on `crmflow-app` (for port traits and services) and `crmflow-domain`
//! (for domain types used in request/response mapping). Never leaks axum types
//! into the domain.

pub mod api;
pub mod error;
pub mod router;
pub mod state;
