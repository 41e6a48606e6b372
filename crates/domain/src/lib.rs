//! # crmflow-domain
//!
//! Pure domain model for the crmflow CRM automation engine.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **CRM entities** (contacts and deals) with standard fields,
//!   custom fields, tags and an optimistic-concurrency version
//! - Define **Events** (created / updated / stage changed / deleted records)
//! - Define **Automations** (trigger → conditions → steps) and the typed
//!   step configurations (action, delay, condition, branch)
//! - Define **Enrollments** (one entity's progress through one workflow)
//!   and **Automation logs** (the audit trail)
//! - Contain the pure logic: field resolution, condition evaluation, and
//!   static workflow validation
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod automation;
pub mod enrollment;
pub mod entity;
pub mod event;
pub mod log;
