//! Outreach Engine: multi-step email, SMS, call and task sequences.
//!
//! Main entry point that wires the sequence engine to its channels, runs the
//! due-step trigger and serves the REST API.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use outreach_api::ApiServer;
use outreach_channels::ChannelDispatcher;
use outreach_core::config::AppConfig;
use outreach_core::event_bus::TracingSink;
use outreach_sequences::demo::{demo_contacts, seed_demo_sequences};
use outreach_sequences::memory::{InMemoryActivityStore, InMemoryContactStore};
use outreach_sequences::{EngineSettings, SequenceEngine};

#[derive(Parser, Debug)]
#[command(name = "outreach-engine")]
#[command(about = "Multi-step outreach sequence automation")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "OUTREACH__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "OUTREACH__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Seconds between due-step scans (overrides config)
    #[arg(long, env = "OUTREACH__SCHEDULER__TICK_INTERVAL_SECS")]
    tick_interval_secs: Option<u64>,

    /// Seed the demo sequences at startup
    #[arg(long, default_value_t = false)]
    seed_demo: bool,

    /// Serve the API without the periodic scanner; batches run via POST /v1/scheduler/process
    #[arg(long, default_value_t = false)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "outreach_engine=info,outreach_sequences=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Outreach Engine starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(secs) = cli.tick_interval_secs {
        config.scheduler.tick_interval_secs = secs;
    }
    if cli.seed_demo {
        config.sequences.seed_demo = true;
    }
    if cli.no_scheduler {
        config.scheduler.enabled = false;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        scheduler_enabled = config.scheduler.enabled,
        tick_interval_secs = config.scheduler.tick_interval_secs,
        batch_cap = config.scheduler.batch_cap,
        "Configuration loaded"
    );

    // Collaborators
    let contacts = Arc::new(InMemoryContactStore::new());
    for contact in demo_contacts() {
        contacts.insert(contact);
    }
    let activities = Arc::new(InMemoryActivityStore::new());
    let channels = Arc::new(ChannelDispatcher::from_config(&config));

    let engine = SequenceEngine::builder(contacts, activities, channels.clone())
        .with_event_sink(Arc::new(TracingSink))
        .with_settings(EngineSettings::from_config(&config))
        .build();

    if config.sequences.seed_demo {
        match seed_demo_sequences(&engine) {
            Ok(seeded) => info!(count = seeded.len(), "Demo sequences seeded"),
            Err(e) => error!(error = %e, "Failed to seed demo sequences"),
        }
    }

    // Start API server
    let api_server = ApiServer::new(config.clone(), engine.clone()).with_channels(channels);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    // Spawn due-step trigger
    if config.scheduler.enabled {
        let scanner = engine.clone();
        let tick = Duration::from_secs(config.scheduler.tick_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                let report = scanner.process_due_steps(scanner.now(), None).await;
                if report.scanned > 0 {
                    info!(
                        scanned = report.scanned,
                        processed = report.processed_count,
                        skipped = report.skipped_count,
                        failed_dispatch = report.failed_dispatch_count,
                        "Due-step batch finished"
                    );
                }
            }
        });
    } else {
        info!("Periodic scheduler disabled; use POST /v1/scheduler/process");
    }

    info!("Outreach Engine is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
