use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use kameo::actor::ActorRef;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

use crate::actors::{GetSystemHealth, HealthMonitorActor, HealthStatus};

#[derive(Clone)]
struct ServerState {
    registry: Arc<Registry>,
    health_monitor: Option<ActorRef<HealthMonitorActor>>,
}

/// Start the metrics HTTP server
/// This should be called in a separate thread/runtime to avoid conflicts
pub async fn start_metrics_server(
    registry: Arc<Registry>,
    health_monitor: Option<ActorRef<HealthMonitorActor>>,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!(port, "Starting metrics server on http://0.0.0.0:{}/metrics", port);

    let state = ServerState {
        registry,
        health_monitor,
    };

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(state: web::Data<ServerState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(state: web::Data<ServerState>) -> impl Responder {
    let Some(monitor) = &state.health_monitor else {
        return HttpResponse::Ok().json(serde_json::json!({
            "status": "healthy",
            "service": "order-orchestrator"
        }));
    };

    match monitor.ask(GetSystemHealth).send().await {
        Ok(health) if matches!(health.overall_status, HealthStatus::Unhealthy(_)) => {
            HttpResponse::ServiceUnavailable().json(health.to_json())
        }
        Ok(health) => HttpResponse::Ok().json(health.to_json()),
        Err(e) => {
            tracing::error!(error = %e, "Failed to get system health");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "unknown",
                "service": "order-orchestrator"
            }))
        }
    }
}
