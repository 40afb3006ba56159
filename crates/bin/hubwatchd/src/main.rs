//! # hubwatchd: hubwatch daemon
//!
//! Composition root that wires all adapters together and starts the server.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Install the `tracing` subscriber
//! - Initialize the `SQLite` connection pool and run migrations
//! - Load the standards tables and construct the file, storage and weather adapters
//! - Register the rules, start the dispatcher and the offline watchdog
//! - Build the axum router, injecting the rule engine
//! - Bind to a TCP port and serve
//! - Handle graceful shutdown (SIGTERM/SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

mod config;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use hubwatch_adapter_files::{CsvDirectory, JsonModelStore, load_standards};
use hubwatch_adapter_http_axum::state::AppState;
use hubwatch_adapter_storage_sqlite_sqlx::{SqliteDeviceRepository, SqliteSampleHistory};
use hubwatch_app::dispatcher::Dispatcher;
use hubwatch_app::event_bus::EventBus;
use hubwatch_app::rules::anomaly::AnomalyRule;
use hubwatch_app::rules::misconfig::MisconfigRule;
use hubwatch_app::rules::offline::OfflineWatchdog;
use hubwatch_app::rules::schedule::ScheduleLearnerRule;
use hubwatch_app::rules::weather::WeatherRule;
use hubwatch_app::rules::{RuleContext, RuleRegistry};
use hubwatch_app::services::rule_engine::RuleEngine;
use hubwatch_app::services::weather_service::WeatherService;
use hubwatch_domain::time::LocalZone;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let filter = EnvFilter::try_new(&config.logging.filter).unwrap_or_else(|err| {
        eprintln!("invalid log filter {:?} ({err}), falling back to info", config.logging.filter);
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Database
    let db = config.database.storage().build().await?;
    let pool = db.pool().clone();

    // Rule context
    let provider = config.weather.provider().build()?;
    let context = RuleContext {
        devices: Arc::new(SqliteDeviceRepository::new(pool.clone())),
        history: Arc::new(SqliteSampleHistory::new(pool)),
        bus: EventBus::new(config.engine.bus_capacity),
        weather: Arc::new(WeatherService::new(
            Arc::new(provider),
            config.weather.cache_ttl_secs,
        )),
        standards: Arc::new(load_standards(&config.data.dir)),
        zone: LocalZone::from_offset_minutes(config.engine.utc_offset_minutes)?,
    };

    // Rules
    let rules = &config.rules;
    let watchdog = Arc::new(OfflineWatchdog::new(rules.offline));
    let mut registry = RuleRegistry::new();
    registry.register(Arc::new(AnomalyRule::new(rules.anomaly.clone())))?;
    registry.register(Arc::new(MisconfigRule::new(rules.misconfig.clone())))?;
    registry.register(Arc::new(ScheduleLearnerRule::new(
        rules.schedule.clone(),
        Arc::new(JsonModelStore::new(config.data.models_dir())),
        Arc::new(CsvDirectory::new(config.data.schedules_dir())),
    )))?;
    registry.register(watchdog.clone())?;
    registry.register(Arc::new(WeatherRule::new(rules.weather.clone())))?;

    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.start(config.engine.workers);
    watchdog.start(context.clone());

    let engine = RuleEngine::new(registry, Arc::clone(&dispatcher), context);
    tracing::info!(rules = ?engine.rule_names(), workers = config.engine.workers, "rule engine started");

    // HTTP
    let app = hubwatch_adapter_http_axum::router::build(AppState::new(engine));

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "hubwatchd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    watchdog.stop();
    dispatcher.shutdown().await;
    tracing::info!("hubwatchd stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
