//! Inbound message dispatch.
//!
//! The transport host pushes every message from a subscribed topic into
//! [`MessageRouter::handle_message`]. Edge responses complete pending edge
//! requests; collector queries are answered on the topic the request names,
//! or on the default response topic.

use std::sync::Arc;

use strata_core::wire::{self, InboundQuery, MeasurementReply};
use strata_core::{ChannelError, MessageError, Timestamp, TopicConfig, Transport};
use strata_edge::{EdgeChannel, ResponseDisposition};

use crate::engine::QueryEngine;

/// What the router did with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Passed to the edge channel.
    EdgeResponse(ResponseDisposition),
    /// A reply (data or error payload) was published on `topic`.
    Answered { topic: String, found: bool },
    /// The query was malformed; nothing was sent.
    Rejected(MessageError),
    /// The reply could not be published.
    ReplyFailed(ChannelError),
    /// Topic not handled here.
    Ignored,
}

/// Routes inbound messages to the edge channel or the query engine.
///
/// Safe to call concurrently. A query can wait on the edge channel for the
/// full request timeout, so hosts should not handle edge responses on the
/// same sequential path as queries (see [`crate::jobs::inbox_task`]).
pub struct MessageRouter {
    engine: Arc<QueryEngine>,
    edge: Arc<EdgeChannel>,
    transport: Arc<dyn Transport>,
    topics: TopicConfig,
    range_cap: usize,
}

impl MessageRouter {
    pub fn new(
        engine: Arc<QueryEngine>,
        edge: Arc<EdgeChannel>,
        transport: Arc<dyn Transport>,
        topics: TopicConfig,
        range_cap: usize,
    ) -> Self {
        Self {
            engine,
            edge,
            transport,
            topics,
            range_cap,
        }
    }

    /// Whether `topic` carries edge responses.
    pub fn is_edge_response(&self, topic: &str) -> bool {
        topic == self.topics.edge_response
    }

    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        if self.is_edge_response(topic) {
            RouteOutcome::EdgeResponse(self.edge.handle_response(payload))
        } else if topic == self.topics.query {
            self.handle_query(payload).await
        } else {
            tracing::debug!(topic, "Ignoring message on unhandled topic");
            RouteOutcome::Ignored
        }
    }

    async fn handle_query(&self, payload: &[u8]) -> RouteOutcome {
        let query = match InboundQuery::parse(payload) {
            Ok(query) => query,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed query");
                return RouteOutcome::Rejected(e);
            }
        };

        let reply_topic = query
            .response_topic()
            .unwrap_or(&self.topics.default_response)
            .to_string();

        let reply = match query {
            InboundQuery::Point { timestamp, .. } => self.answer_point(timestamp).await,
            InboundQuery::Range { start, end, .. } => self.answer_range(start, end),
        };

        let (body, found) = match reply {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode reply");
                return RouteOutcome::Rejected(e);
            }
        };

        match self.transport.publish(&reply_topic, &body).await {
            Ok(()) => RouteOutcome::Answered {
                topic: reply_topic,
                found,
            },
            Err(e) => {
                tracing::error!(topic = %reply_topic, error = %e, "Failed to publish reply");
                RouteOutcome::ReplyFailed(e)
            }
        }
    }

    async fn answer_point(&self, timestamp: Timestamp) -> Result<(Vec<u8>, bool), MessageError> {
        match self.engine.get(timestamp).await {
            Some(m) => Ok((wire::encode(&MeasurementReply::from(&m))?, true)),
            None => Ok((wire::encode_point_not_found(timestamp)?, false)),
        }
    }

    fn answer_range(&self, start: Timestamp, end: Timestamp) -> Result<(Vec<u8>, bool), MessageError> {
        if end < start {
            let e = MessageError::InvalidRange { start, end };
            tracing::warn!(error = %e, "Answering inverted range with error payload");
            return Ok((wire::encode_range_not_found(start, end)?, false));
        }

        let answer = self.engine.get_range(start, end, self.range_cap);
        if answer.is_empty() {
            return Ok((wire::encode_range_not_found(start, end)?, false));
        }
        Ok((wire::encode_range_reply(&answer.measurements)?, true))
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("topics", &self.topics)
            .field("range_cap", &self.range_cap)
            .finish()
    }
}
