//! API server: REST routes, OpenAPI docs and the Prometheus exporter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use outreach_channels::ChannelDispatcher;
use outreach_core::config::AppConfig;
use outreach_sequences::SequenceEngine;

use crate::rest::{self, AppState};
use crate::sequence_rest;
use crate::swagger::ApiDoc;

/// HTTP front of the sequence engine.
pub struct ApiServer {
    config: AppConfig,
    engine: SequenceEngine,
    channels: Option<Arc<ChannelDispatcher>>,
}

impl ApiServer {
    pub fn new(config: AppConfig, engine: SequenceEngine) -> Self {
        Self {
            config,
            engine,
            channels: None,
        }
    }

    /// Lets the tracking webhook mirror delivery states onto the channel providers.
    pub fn with_channels(mut self, channels: Arc<ChannelDispatcher>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            engine: self.engine.clone(),
            channels: self.channels.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };

        Router::new()
            // Sequences
            .route(
                "/v1/sequences",
                get(sequence_rest::list_sequences).post(sequence_rest::create_sequence),
            )
            .route(
                "/v1/sequences/:id",
                get(sequence_rest::get_sequence)
                    .patch(sequence_rest::update_sequence)
                    .delete(sequence_rest::delete_sequence),
            )
            .route(
                "/v1/sequences/:id/duplicate",
                post(sequence_rest::duplicate_sequence),
            )
            .route("/v1/sequences/:id/stats", get(sequence_rest::sequence_stats))
            .route(
                "/v1/sequences/:id/enrollments",
                get(sequence_rest::list_enrollments).post(sequence_rest::enroll_contact),
            )
            .route(
                "/v1/sequences/:id/enrollments/bulk",
                post(sequence_rest::bulk_enroll),
            )
            // Enrollments
            .route(
                "/v1/enrollments/:id",
                get(sequence_rest::get_enrollment).delete(sequence_rest::remove_enrollment),
            )
            .route(
                "/v1/enrollments/:id/executions",
                get(sequence_rest::enrollment_executions),
            )
            .route("/v1/enrollments/:id/pause", post(sequence_rest::pause_enrollment))
            .route("/v1/enrollments/:id/resume", post(sequence_rest::resume_enrollment))
            .route("/v1/enrollments/:id/replied", post(sequence_rest::mark_replied))
            .route("/v1/enrollments/:id/bounced", post(sequence_rest::mark_bounced))
            .route(
                "/v1/enrollments/:id/unsubscribed",
                post(sequence_rest::mark_unsubscribed),
            )
            .route("/v1/enrollments/:id/cancel", post(sequence_rest::cancel_enrollment))
            .route(
                "/v1/enrollments/:id/reschedule",
                post(sequence_rest::reschedule_enrollment),
            )
            // Scheduler
            .route("/v1/scheduler/due", get(sequence_rest::due_steps))
            .route("/v1/scheduler/process", post(sequence_rest::process_due_steps))
            // Engagement
            .route(
                "/v1/executions/:id/status",
                patch(sequence_rest::update_execution_status),
            )
            .route("/v1/webhooks/tracking", post(sequence_rest::tracking_webhook))
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
            // Middleware
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = self.router();

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Install the Prometheus recorder and serve it on the metrics port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
