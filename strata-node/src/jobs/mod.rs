//! Background Jobs for a Strata node
//!
//! - `sampling`: reads the sensor at the sampling cadence and ingests it
//! - `monitor`: backstop flush and offload checks at the monitor cadence
//! - `inbox`: drains inbound transport messages into the router
//!
//! # Usage
//!
//! [`crate::StrataNode::spawn_jobs`] starts all three. To run one alone:
//!
//! ```ignore
//! use strata_node::jobs::monitor_task;
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(monitor_task(node.clone(), Duration::from_secs(30), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

pub mod inbox;
pub mod monitor;
pub mod sampling;

pub use inbox::{inbox_task, InboundMessage, InboxMetrics, InboxSnapshot};
pub use monitor::{monitor_task, MonitorMetrics, MonitorSnapshot};
pub use sampling::{sampling_task, SamplingMetrics, SamplingSnapshot};
