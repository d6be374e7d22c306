use std::sync::Arc;
use std::time::Duration;

use kameo::Actor;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_orchestrator::actors::{DlqActor, HealthCheckable, HealthMonitorActor, OutboxRelay};
use order_orchestrator::clients::{HttpCollaborator, HttpPricingClient, HttpStockClient, StaticCatalog};
use order_orchestrator::config::{Config, StorageBackend};
use order_orchestrator::domain::order::{CancelOrder, CreateOrder, LineItemRequest, OrderStatus, UpdateOrder};
use order_orchestrator::idempotency::{MemoryIdempotencyStore, RedisIdempotencyStore};
use order_orchestrator::messaging::{InMemoryPublisher, RedpandaClient};
use order_orchestrator::metrics::{self, Metrics};
use order_orchestrator::store::{DeadLetterSink, MemoryOrderStore, ShardedOrderStore};
use order_orchestrator::{OrderOrchestrator, RequestContext};

const MEMORY_SHARDS: usize = 2;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_orchestrator=debug"))
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        backend = ?config.storage_backend,
        shards = config.shard_urls.len(),
        max_concurrent_checks = config.max_concurrent_checks,
        "Starting order orchestrator"
    );

    // === 1. Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. Backends, DLQ and relay ===
    let (orchestrator, probes, demo) = match config.storage_backend {
        StorageBackend::Postgres => {
            tracing::info!("Connecting to order shards...");
            let store = Arc::new(ShardedOrderStore::connect(&config.shard_urls, config.db_max_connections).await?);
            store.ensure_schema().await?;

            let idempotency = Arc::new(RedisIdempotencyStore::connect(&config.redis_url, config.idempotency_ttl).await?);
            let redpanda = Arc::new(
                RedpandaClient::new(&config.kafka_brokers, &config.order_topic, config.kafka_message_timeout)?
                    .with_metrics(metrics.clone()),
            );

            let stock = Arc::new(HttpStockClient::from_collaborator(
                HttpCollaborator::new("stock", &config.product_service_url, config.collaborator_timeout)?
                    .with_metrics(metrics.clone()),
            ));
            let pricing = Arc::new(HttpPricingClient::from_collaborator(
                HttpCollaborator::new("pricing", &config.pricing_service_url, config.collaborator_timeout)?
                    .with_metrics(metrics.clone()),
            ));

            let dlq = DlqActor::spawn(DlqActor::new(Some(store.clone() as Arc<dyn DeadLetterSink>), Some(metrics.clone())));
            let relay = OutboxRelay::spawn(OutboxRelay::new(redpanda.clone(), dlq).with_metrics(metrics.clone()));

            let probes: Vec<Arc<dyn HealthCheckable>> = vec![
                store.clone() as Arc<dyn HealthCheckable>,
                redpanda.clone() as Arc<dyn HealthCheckable>,
                stock.clone() as Arc<dyn HealthCheckable>,
                pricing.clone() as Arc<dyn HealthCheckable>,
            ];

            let orchestrator = OrderOrchestrator::new(store, idempotency, stock, pricing, redpanda)
                .with_relay(relay)
                .with_metrics(metrics.clone())
                .with_max_concurrent_checks(config.max_concurrent_checks);

            (orchestrator, probes, false)
        }
        StorageBackend::Memory => {
            tracing::info!(shards = MEMORY_SHARDS, "Using in-process backends");
            let store = Arc::new(MemoryOrderStore::new(MEMORY_SHARDS));
            let idempotency = Arc::new(MemoryIdempotencyStore::new(config.idempotency_ttl));
            let publisher = Arc::new(InMemoryPublisher::new());

            let catalog = Arc::new(StaticCatalog::new());
            catalog.set_product(1, 100, 2.0, 1.0, 20.0).await;
            catalog.set_product(2, 10, 5.0, 0.0, 50.0).await;

            let dlq = DlqActor::spawn(DlqActor::new(None, Some(metrics.clone())));
            let relay = OutboxRelay::spawn(OutboxRelay::new(publisher.clone(), dlq).with_metrics(metrics.clone()));

            let orchestrator = OrderOrchestrator::new(store, idempotency, catalog.clone(), catalog, publisher)
                .with_relay(relay)
                .with_metrics(metrics.clone())
                .with_max_concurrent_checks(config.max_concurrent_checks);

            (orchestrator, Vec::new(), true)
        }
    };

    // === 3. Health monitor ===
    let health_monitor = HealthMonitorActor::spawn(HealthMonitorActor::new(probes).with_metrics(metrics.clone()));

    // Start metrics HTTP server in background thread
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let result = actix_web::rt::System::new().block_on(metrics::start_metrics_server(
            metrics_registry,
            Some(health_monitor),
            metrics_port,
        ));
        if let Err(e) = result {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 4. Demonstrate the order lifecycle on the in-process backends ===
    if demo {
        run_demo(&orchestrator).await?;
    }

    tracing::info!("Ready; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    Ok(())
}

async fn run_demo(orchestrator: &OrderOrchestrator) -> anyhow::Result<()> {
    let ctx = RequestContext::new(7, "demo-token").with_timeout(REQUEST_TIMEOUT);

    let created = orchestrator
        .create_order(
            &ctx,
            CreateOrder {
                idempotency_key: uuid::Uuid::new_v4().to_string(),
                line_items: vec![
                    LineItemRequest { product_id: 1, quantity: 3 },
                    LineItemRequest { product_id: 2, quantity: 1 },
                ],
            },
        )
        .await?;
    let order_id = created.order.id;
    tracing::info!(order_id, total = created.order.total, "Order created");

    let paid = orchestrator
        .update_order(
            &ctx,
            UpdateOrder {
                order_id,
                status: OrderStatus::Paid,
                line_items: None,
            },
        )
        .await?;
    tracing::info!(order_id, status = %paid.order.status, "Order paid");

    let cancelled = orchestrator.cancel_order(&ctx, CancelOrder { order_id }).await?;
    tracing::info!(order_id, status = %cancelled.order.status, "Order cancelled");

    Ok(())
}
