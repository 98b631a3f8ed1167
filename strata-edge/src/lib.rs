//! Strata Edge - Remote Tier
//!
//! Everything that talks to the edge peer over the publish/subscribe
//! transport:
//! - [`EdgeChannel`]: single-record retrieval, correlating an asynchronous
//!   response with the request that caused it
//! - [`Offloader`]: bulk push of the oldest persisted records, followed by
//!   their local purge

mod channel;
mod offload;

pub use channel::{EdgeChannel, EdgeStats, ResponseDisposition};
pub use offload::{OffloadReport, Offloader};
