//! Correlated single-record retrieval from the edge peer.
//!
//! A request is published with a random `request_id` and a one-shot
//! completion slot is parked under that id. The transport host feeds every
//! message from the response topic into [`EdgeChannel::handle_response`],
//! which completes the slot whose id and timestamp match and discards
//! anything else.
//!
//! Admission is bounded by a semaphore of `max_in_flight` permits. With the
//! default of one, concurrent callers queue for the single slot instead of
//! overwriting each other's correlation state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use strata_core::wire::{self, EdgeRequest, EdgeResponse};
use strata_core::{ChannelError, Measurement, StrataConfig, Tier, Timestamp, Transport};
use tokio::sync::{oneshot, Semaphore};
use tokio::time;

/// What [`EdgeChannel::handle_response`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDisposition {
    /// Completed the pending request with this id.
    Matched { request_id: u32 },
    /// No pending request matches; discarded.
    Unmatched { request_id: u32 },
    /// Not a valid response payload; discarded.
    Malformed,
}

/// Snapshot of edge channel activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeStats {
    pub requests: u64,
    pub matched: u64,
    pub unmatched: u64,
    pub malformed: u64,
    pub timeouts: u64,
    pub busy: u64,
}

#[derive(Debug, Default)]
struct EdgeCounters {
    requests: AtomicU64,
    matched: AtomicU64,
    unmatched: AtomicU64,
    malformed: AtomicU64,
    timeouts: AtomicU64,
    busy: AtomicU64,
}

#[derive(Debug)]
struct PendingRequest {
    timestamp: Timestamp,
    sender: oneshot::Sender<Measurement>,
}

/// Request/response correlation over the publish/subscribe transport.
pub struct EdgeChannel {
    transport: Arc<dyn Transport>,
    request_topic: String,
    timeout: Duration,
    slots: Semaphore,
    pending: DashMap<u32, PendingRequest>,
    counters: EdgeCounters,
}

impl EdgeChannel {
    pub fn new(
        transport: Arc<dyn Transport>,
        request_topic: impl Into<String>,
        timeout: Duration,
        max_in_flight: usize,
    ) -> Self {
        Self {
            transport,
            request_topic: request_topic.into(),
            timeout,
            slots: Semaphore::new(max_in_flight.max(1)),
            pending: DashMap::new(),
            counters: EdgeCounters::default(),
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &StrataConfig) -> Self {
        Self::new(
            transport,
            config.topics.edge_request.clone(),
            config.edge_request_timeout(),
            config.edge_max_in_flight,
        )
    }

    /// Ask the edge peer for the measurement at `timestamp`.
    ///
    /// Waits up to the request timeout for a free slot, then up to the
    /// request timeout again for the correlated response. The returned
    /// record is tagged [`Tier::Offloaded`].
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Busy`] if no slot frees up in time
    /// - [`ChannelError::PublishFailed`] if the transport refuses the request
    /// - [`ChannelError::Timeout`] if no matching response arrives in time;
    ///   a later response is discarded as unmatched
    /// - [`ChannelError::Closed`] after [`EdgeChannel::close`]
    pub async fn request(&self, timestamp: Timestamp) -> Result<Measurement, ChannelError> {
        let waited_ms = self.timeout.as_millis() as u64;

        let _permit = match time::timeout(self.timeout, self.slots.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ChannelError::Closed),
            Err(_) => {
                self.counters.busy.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(timestamp, waited_ms, "Edge channel busy, request dropped");
                return Err(ChannelError::Busy { waited_ms });
            }
        };

        let (request_id, receiver) = self.register(timestamp);
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.send_request(timestamp, request_id).await {
            self.pending.remove(&request_id);
            tracing::error!(request_id, timestamp, error = %e, "Failed to publish edge request");
            return Err(e);
        }
        tracing::debug!(request_id, timestamp, "Edge request sent");

        match time::timeout(self.timeout, receiver).await {
            Ok(Ok(measurement)) => Ok(measurement),
            Ok(Err(_)) => {
                self.pending.remove(&request_id);
                Err(ChannelError::Closed)
            }
            Err(_) => {
                self.pending.remove(&request_id);
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(request_id, timestamp, waited_ms, "Edge request timed out");
                Err(ChannelError::Timeout {
                    request_id,
                    waited_ms,
                })
            }
        }
    }

    fn register(&self, timestamp: Timestamp) -> (u32, oneshot::Receiver<Measurement>) {
        loop {
            let request_id = rand::random::<u32>();
            if let Entry::Vacant(slot) = self.pending.entry(request_id) {
                let (sender, receiver) = oneshot::channel();
                slot.insert(PendingRequest { timestamp, sender });
                return (request_id, receiver);
            }
        }
    }

    async fn send_request(&self, timestamp: Timestamp, request_id: u32) -> Result<(), ChannelError> {
        let payload = wire::encode(&EdgeRequest::new(timestamp, request_id)).map_err(|e| {
            ChannelError::PublishFailed {
                topic: self.request_topic.clone(),
                reason: e.to_string(),
            }
        })?;
        self.transport.publish(&self.request_topic, &payload).await
    }

    /// Feed one message from the edge response topic.
    ///
    /// Completes the pending request only if both `request_id` and
    /// `timestamp` match it. Anything else leaves the pending set untouched.
    pub fn handle_response(&self, payload: &[u8]) -> ResponseDisposition {
        let response = match EdgeResponse::parse(payload) {
            Ok(response) => response,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Discarding malformed edge response");
                return ResponseDisposition::Malformed;
            }
        };
        let request_id = response.request_id;

        let matched = self
            .pending
            .remove_if(&request_id, |_, pending| pending.timestamp == response.timestamp);

        if let Some((_, pending)) = matched {
            let measurement = Measurement::new(response.timestamp, response.temperature)
                .with_tier(Tier::Offloaded);
            if pending.sender.send(measurement).is_ok() {
                self.counters.matched.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(request_id, timestamp = response.timestamp, "Edge response matched");
                return ResponseDisposition::Matched { request_id };
            }
        }

        self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            request_id,
            timestamp = response.timestamp,
            "Discarding unmatched edge response"
        );
        ResponseDisposition::Unmatched { request_id }
    }

    /// Requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Refuse new requests and fail the ones in flight with
    /// [`ChannelError::Closed`].
    pub fn close(&self) {
        self.slots.close();
        self.pending.clear();
    }

    pub fn stats(&self) -> EdgeStats {
        EdgeStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            matched: self.counters.matched.load(Ordering::Relaxed),
            unmatched: self.counters.unmatched.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            busy: self.counters.busy.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for EdgeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeChannel")
            .field("request_topic", &self.request_topic)
            .field("timeout", &self.timeout)
            .field("pending", &self.pending.len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
