use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use kameo::Actor;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};

use crate::actors::core::plain_reply;
use crate::messaging::DeadLetter;
use crate::metrics::Metrics;
use crate::store::DeadLetterSink;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// Dead Letter Queue Actor
// ============================================================================
//
// Receives lifecycle events that could not be published after every retry.
// Provides:
// - Durable storage on the shard that owns the order (when configured),
//   retrying transient write failures
// - A bounded in-memory window for inspection
// - Counts by event type
//
// ============================================================================

const RECENT_WINDOW: usize = 1_000;

pub struct DlqActor {
    sink: Option<Arc<dyn DeadLetterSink>>,
    metrics: Option<Arc<Metrics>>,
    retry_config: RetryConfig,
    recent: VecDeque<DeadLetter>,
    total: u64,
    by_event_type: HashMap<String, u64>,
}

impl DlqActor {
    pub fn new(sink: Option<Arc<dyn DeadLetterSink>>, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            sink,
            metrics,
            retry_config: RetryConfig::default(),
            recent: VecDeque::new(),
            total: 0,
            by_event_type: HashMap::new(),
        }
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    async fn persist(&self, sink: &dyn DeadLetterSink, letter: &DeadLetter) {
        let written = retry_on_transient(&self.retry_config, move |_| sink.record_dead_letter(letter)).await;

        match written {
            RetryResult::Success { attempts, .. } => {
                tracing::info!(dead_letter_id = %letter.id, attempts, "Dead letter stored on order shard")
            }
            RetryResult::Exhausted { error, attempts } | RetryResult::Permanent { error, attempts } => {
                tracing::error!(
                    dead_letter_id = %letter.id,
                    attempts,
                    error = %error,
                    "Failed to persist dead letter, keeping it in memory only"
                )
            }
        }
    }
}

impl Actor for DlqActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(durable = state.sink.is_some(), "DlqActor started - Dead Letter Queue ready");
        Ok(state)
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone)]
pub struct AddToDlq {
    pub letter: DeadLetter,
}

#[derive(Debug)]
pub struct GetDlqMessages {
    pub limit: usize,
}

#[derive(Debug)]
pub struct GetDlqStats;

/// Most recent dead letters, newest first.
#[derive(Debug, Clone)]
pub struct DlqMessages(pub Vec<DeadLetter>);

#[derive(Debug, Clone, Default)]
pub struct DlqStats {
    pub total_messages: u64,
    pub by_event_type: HashMap<String, u64>,
}

plain_reply!(DlqMessages);
plain_reply!(DlqStats);

// ============================================================================
// Handlers
// ============================================================================

impl Message<AddToDlq> for DlqActor {
    type Reply = ();

    async fn handle(&mut self, msg: AddToDlq, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let letter = msg.letter;

        tracing::error!(
            dead_letter_id = %letter.id,
            order_id = letter.order_id,
            event_key = %letter.event_key,
            error = %letter.error_message,
            attempts = letter.attempts,
            "Adding event to Dead Letter Queue"
        );

        if let Some(sink) = &self.sink {
            self.persist(sink.as_ref(), &letter).await;
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_dlq_message(letter.event_type.as_str());
        }

        self.total += 1;
        *self
            .by_event_type
            .entry(letter.event_type.as_str().to_string())
            .or_insert(0) += 1;

        if self.recent.len() == RECENT_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(letter);
    }
}

impl Message<GetDlqMessages> for DlqActor {
    type Reply = DlqMessages;

    async fn handle(&mut self, msg: GetDlqMessages, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        DlqMessages(self.recent.iter().rev().take(msg.limit).cloned().collect())
    }
}

impl Message<GetDlqStats> for DlqActor {
    type Reply = DlqStats;

    async fn handle(&mut self, _msg: GetDlqStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        DlqStats {
            total_messages: self.total,
            by_event_type: self.by_event_type.clone(),
        }
    }
}
