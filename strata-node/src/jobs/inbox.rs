//! Inbound Message Task
//!
//! Drains messages the transport host pushes into the node. Edge responses
//! are handled inline so a pending request completes as soon as its answer
//! arrives. Queries run on their own tasks, because a point query may wait
//! on the edge channel and must not block the responses it is waiting for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::node::StrataNode;

/// One message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Counters for the inbox task.
#[derive(Debug, Default)]
pub struct InboxMetrics {
    pub messages: AtomicU64,
    pub edge_responses: AtomicU64,
    pub queries_dispatched: AtomicU64,
}

impl InboxMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> InboxSnapshot {
        InboxSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            edge_responses: self.edge_responses.load(Ordering::Relaxed),
            queries_dispatched: self.queries_dispatched.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`InboxMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboxSnapshot {
    pub messages: u64,
    pub edge_responses: u64,
    pub queries_dispatched: u64,
}

/// Route inbound messages until shutdown or until every sender is dropped.
pub async fn inbox_task(
    node: Arc<StrataNode>,
    mut inbox: mpsc::Receiver<InboundMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<InboxMetrics> {
    let metrics = Arc::new(InboxMetrics::new());
    tracing::info!("Inbox task started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Inbox task shutting down");
                    break;
                }
            }

            message = inbox.recv() => {
                let Some(message) = message else {
                    tracing::info!("Inbox closed");
                    break;
                };
                metrics.messages.fetch_add(1, Ordering::Relaxed);

                if node.router().is_edge_response(&message.topic) {
                    metrics.edge_responses.fetch_add(1, Ordering::Relaxed);
                    node.handle_message(&message.topic, &message.payload).await;
                } else {
                    metrics.queries_dispatched.fetch_add(1, Ordering::Relaxed);
                    let node = Arc::clone(&node);
                    tokio::spawn(async move {
                        node.handle_message(&message.topic, &message.payload).await;
                    });
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        messages = snapshot.messages,
        edge_responses = snapshot.edge_responses,
        queries_dispatched = snapshot.queries_dispatched,
        "Inbox task completed"
    );

    metrics
}
