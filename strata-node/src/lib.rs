//! Strata Node - Query Engine and Runtime
//!
//! Ties the tiers together into a running telemetry node:
//! - [`QueryEngine`]: point and range lookups across cache, persistent tier
//!   and edge peer
//! - [`MessageRouter`]: inbound edge responses and collector queries
//! - [`jobs`]: sampling, usage monitor and inbox background tasks
//! - [`StrataNode`]: wires every component by dependency injection
//!
//! The transport host owns connections and subscriptions. It hands the node
//! a [`strata_core::Transport`] for publishing and pushes inbound messages
//! into [`NodeJobs::inbox_tx`] (or calls [`StrataNode::handle_message`]).

pub mod engine;
pub mod jobs;
pub mod node;
pub mod router;
pub mod telemetry;

pub use engine::{expected_count, QueryEngine, QuerySource, RangeAnswer};
pub use jobs::InboundMessage;
pub use node::{IngestOutcome, MaintenanceReport, NodeJobs, NodePorts, StrataNode};
pub use router::{MessageRouter, RouteOutcome};
pub use telemetry::{init_tracing, TelemetryConfig};
