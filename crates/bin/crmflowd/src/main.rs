//! # crmflowd — crmflow daemon
//!
//! Composition root that wires all adapters together and starts the server.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars)
//! - Initialize the `SQLite` connection pool and run migrations
//! - Construct repository implementations (adapters)
//! - Construct the automation engine and application services
//! - Spawn the event listener and the enrollment dispatcher
//! - Build the axum router and serve it
//! - Handle graceful shutdown (SIGTERM/SIGINT), stopping the background loops
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crmflow_adapter_http_axum::state::AppState;
use crmflow_adapter_storage_sqlite_sqlx::{
    SqliteAutomationLogRepository, SqliteAutomationRepository, SqliteEnrollmentRepository,
    SqliteEntityStore,
};
use crmflow_app::action_executor::ActionExecutor;
use crmflow_app::automation_catalog::AutomationCatalog;
use crmflow_app::automation_engine::AutomationEngine;
use crmflow_app::dispatcher::{Dispatcher, listen_events};
use crmflow_app::event_bus::InProcessEventBus;
use crmflow_app::ports::{SharedClock, SystemClock};
use crmflow_app::services::automation_service::AutomationService;
use crmflow_app::services::enrollment_service::EnrollmentService;
use crmflow_app::services::entity_service::EntityService;
use crmflow_app::step_machine::StepMachine;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    // Database
    let db = crmflow_adapter_storage_sqlite_sqlx::Config {
        database_url: config.database_url().to_string(),
        max_connections: config.database.max_connections,
    }
    .build()
    .await
    .context("failed to open database")?;
    let pool = db.pool().clone();

    // Repositories
    let automations = Arc::new(SqliteAutomationRepository::new(pool.clone()));
    let enrollments = Arc::new(SqliteEnrollmentRepository::new(pool.clone()));
    let logs = Arc::new(SqliteAutomationLogRepository::new(pool.clone()));
    let store = Arc::new(SqliteEntityStore::new(pool));

    let bus = Arc::new(InProcessEventBus::new(config.engine.event_bus_capacity));
    let clock: SharedClock = Arc::new(SystemClock);
    let catalog = Arc::new(AutomationCatalog::default());

    // Engine
    let entity_service = Arc::new(EntityService::new(
        store,
        Arc::clone(&bus),
        Arc::clone(&clock),
    ));
    let executor = Arc::new(
        ActionExecutor::new(Arc::clone(&entity_service))
            .with_conflict_retries(config.engine.conflict_retries),
    );
    let machine = StepMachine::new(executor, Arc::clone(&clock))
        .with_step_timeout(config.engine.step_timeout())
        .with_max_steps_per_tick(config.engine.max_steps_per_tick);
    let engine = Arc::new(
        AutomationEngine::new(
            Arc::clone(&automations),
            enrollments,
            Arc::clone(&logs),
            Arc::clone(&entity_service),
            machine,
            Arc::clone(&catalog),
            Arc::clone(&clock),
        )
        .with_lock_lease(config.engine.lock_lease()),
    );

    // Services
    let automation_service = Arc::new(AutomationService::new(automations, logs, catalog, clock));
    automation_service.refresh_catalog().await;
    let enrollment_service = Arc::new(EnrollmentService::new(Arc::clone(&engine)));

    // Background loops
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener_task = tokio::spawn(listen_events(
        Arc::clone(&engine),
        bus.subscribe(),
        shutdown_rx.clone(),
    ));
    tracing::debug!(subscribers = bus.subscriber_count(), "event listener attached");
    let dispatcher = Dispatcher::new(engine, config.engine.dispatcher());
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx));

    // HTTP
    let state = AppState::from_arcs(automation_service, enrollment_service, entity_service);
    let app = crmflow_adapter_http_axum::router::build(state);

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(%bind_addr, "crmflowd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down background tasks");
    // receivers may already be gone if a loop exited on its own
    let _ = shutdown_tx.send(true);
    if let Err(err) = listener_task.await {
        tracing::error!(error = %err, "event listener task failed");
    }
    if let Err(err) = dispatcher_task.await {
        tracing::error!(error = %err, "dispatcher task failed");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
