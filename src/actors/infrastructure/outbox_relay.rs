use std::sync::Arc;

use chrono::{DateTime, Utc};
use kameo::Actor;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};

use super::{AddToDlq, DlqActor};
use crate::actors::core::plain_reply;
use crate::domain::order::LifecycleEvent;
use crate::messaging::{DeadLetter, EventPublisher};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// Outbox Relay Actor - Out-of-band event redelivery
// ============================================================================
//
// Takes lifecycle events whose first publish failed after the order was
// committed. Each event is retried with exponential backoff on its own task
// so one slow redelivery never holds up the mailbox; events that exhaust
// their retries go to the Dead Letter Queue.
//
// ============================================================================

const RETRY_OPERATION: &str = "order_event_publish";

pub struct OutboxRelay {
    publisher: Arc<dyn EventPublisher>,
    dlq_actor: ActorRef<DlqActor>,
    retry_config: RetryConfig,
    metrics: Option<Arc<Metrics>>,
    stats: RelayStats,
}

impl OutboxRelay {
    pub fn new(publisher: Arc<dyn EventPublisher>, dlq_actor: ActorRef<DlqActor>) -> Self {
        Self {
            publisher,
            dlq_actor,
            retry_config: RetryConfig::for_redelivery(),
            metrics: None,
            stats: RelayStats::default(),
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl Actor for OutboxRelay {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(
            max_attempts = state.retry_config.max_attempts,
            "OutboxRelay started"
        );
        Ok(state)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// An event whose first publish attempt failed.
#[derive(Debug, Clone)]
pub struct Redeliver {
    pub event: LifecycleEvent,
    pub first_error: String,
    pub first_failed_at: DateTime<Utc>,
}

/// Reported back by a redelivery task when it is done.
#[derive(Debug)]
struct RedeliveryFinished {
    delivered: bool,
}

#[derive(Debug)]
pub struct GetRelayStats;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub in_flight: u64,
    pub delivered: u64,
    pub dead_lettered: u64,
}

plain_reply!(RelayStats);

// ============================================================================
// Handlers
// ============================================================================

impl Message<Redeliver> for OutboxRelay {
    type Reply = ();

    async fn handle(&mut self, msg: Redeliver, ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let publisher = Arc::clone(&self.publisher);
        let dlq_actor = self.dlq_actor.clone();
        let retry_config = self.retry_config.clone();
        let metrics = self.metrics.clone();
        let relay = ctx.actor_ref().clone();

        self.stats.in_flight += 1;

        tracing::info!(
            order_id = msg.event.order.id,
            event_key = %msg.event.key(),
            first_error = %msg.first_error,
            "Scheduling event redelivery"
        );

        tokio::spawn(async move {
            let event = msg.event;

            let result = retry_on_transient(&retry_config, |attempt| {
                let publisher = Arc::clone(&publisher);
                let event = event.clone();
                let metrics = metrics.clone();

                async move {
                    if let Some(metrics) = &metrics {
                        metrics.record_retry_attempt(RETRY_OPERATION, attempt);
                    }
                    tracing::debug!(attempt, event_key = %event.key(), "Attempting redelivery");
                    publisher.publish(&event).await
                }
            })
            .await;

            let delivered = match result {
                RetryResult::Success { attempts, .. } => {
                    tracing::info!(
                        order_id = event.order.id,
                        event_key = %event.key(),
                        attempts,
                        "Redelivered event"
                    );
                    true
                }
                RetryResult::Exhausted { error, attempts } | RetryResult::Permanent { error, attempts } => {
                    tracing::error!(
                        order_id = event.order.id,
                        event_key = %event.key(),
                        attempts,
                        error = %error,
                        "Redelivery failed, sending to DLQ"
                    );

                    // Fire and forget - use tell
                    let letter = DeadLetter::new(&event, &error, attempts + 1, msg.first_failed_at);
                    let _ = dlq_actor.tell(AddToDlq { letter }).send().await;
                    false
                }
            };

            if let Some(metrics) = &metrics {
                metrics.record_retry_outcome(RETRY_OPERATION, delivered);
            }
            let _ = relay.tell(RedeliveryFinished { delivered }).send().await;
        });
    }
}

impl Message<RedeliveryFinished> for OutboxRelay {
    type Reply = ();

    async fn handle(&mut self, msg: RedeliveryFinished, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.stats.in_flight = self.stats.in_flight.saturating_sub(1);
        if msg.delivered {
            self.stats.delivered += 1;
        } else {
            self.stats.dead_lettered += 1;
        }
    }
}

impl Message<GetRelayStats> for OutboxRelay {
    type Reply = RelayStats;

    async fn handle(&mut self, _msg: GetRelayStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.stats
    }
}
