//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the use-case layer and the
//! adapter layer can depend on them without creating circular dependencies.
//!
//! Every port is also implemented for `Arc<T>`, so one adapter instance can be
//! shared between the engine, the services and background tasks.

pub mod automation_repo;
pub mod clock;
pub mod enrollment_repo;
pub mod entity_store;
pub mod event_bus;
pub mod log_repo;

pub use automation_repo::AutomationRepository;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use enrollment_repo::EnrollmentRepository;
pub use entity_store::{EntityStore, EntityUpdate};
pub use event_bus::EventPublisher;
pub use log_repo::AutomationLogRepository;
