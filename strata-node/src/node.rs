//! Node assembly.
//!
//! [`StrataNode`] owns one instance of every component and threads them
//! through each other explicitly. Nothing is global, so tests can run any
//! number of independent nodes side by side.

use std::sync::Arc;

use strata_core::{Clock, Measurement, SensorSource, StrataConfig, StrataResult, Transport};
use strata_edge::{EdgeChannel, OffloadReport, Offloader};
use strata_storage::{FlushReport, KvPartition, MeasurementCache, PersistentStore};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::engine::QueryEngine;
use crate::jobs::{
    inbox_task, monitor_task, sampling_task, InboxMetrics, InboundMessage, MonitorMetrics,
    SamplingMetrics,
};
use crate::router::{MessageRouter, RouteOutcome};

/// External collaborators a node is wired to.
pub struct NodePorts {
    pub transport: Arc<dyn Transport>,
    pub sensor: Arc<dyn SensorSource>,
    pub clock: Arc<dyn Clock>,
}

/// What [`StrataNode::ingest`] did besides caching the reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestOutcome {
    /// Record pushed out of the cache to make room.
    pub evicted: Option<Measurement>,
    /// Flush triggered by the cache crossing its threshold.
    pub flush: Option<FlushReport>,
    /// Offload triggered by that flush filling the persistent tier.
    pub offload: Option<OffloadReport>,
}

/// One maintenance pass: flush check, then offload check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    pub flush: Option<FlushReport>,
    pub offload: Option<OffloadReport>,
}

/// Handles to the background jobs started by [`StrataNode::spawn_jobs`].
pub struct NodeJobs {
    pub sampling: JoinHandle<Arc<SamplingMetrics>>,
    pub monitor: JoinHandle<Arc<MonitorMetrics>>,
    pub inbox: JoinHandle<Arc<InboxMetrics>>,
    /// Where the transport host pushes inbound messages.
    pub inbox_tx: mpsc::Sender<InboundMessage>,
    shutdown_tx: watch::Sender<bool>,
}

impl NodeJobs {
    /// Signal every job to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// A fully wired telemetry node.
pub struct StrataNode {
    config: StrataConfig,
    ports: NodePorts,
    store: Arc<PersistentStore>,
    cache: Arc<MeasurementCache>,
    edge: Arc<EdgeChannel>,
    offloader: Offloader,
    engine: Arc<QueryEngine>,
    router: MessageRouter,
}

impl StrataNode {
    /// Validate `config` and wire every component over `partition`.
    pub fn new(
        config: StrataConfig,
        partition: Arc<dyn KvPartition>,
        ports: NodePorts,
    ) -> StrataResult<Self> {
        config.validate()?;

        let store = Arc::new(PersistentStore::new(partition, config.partition_max_entries));
        let cache = Arc::new(MeasurementCache::new(config.cache_capacity, store.clone()));
        cache.init();

        let edge = Arc::new(EdgeChannel::from_config(ports.transport.clone(), &config));
        let offloader = Offloader::from_config(ports.transport.clone(), &config);
        let engine = Arc::new(QueryEngine::new(
            cache.clone(),
            store.clone(),
            edge.clone(),
            &config,
        ));
        let router = MessageRouter::new(
            engine.clone(),
            edge.clone(),
            ports.transport.clone(),
            config.topics.clone(),
            config.range_response_cap,
        );

        tracing::info!(
            cache_capacity = config.cache_capacity,
            partition = store.partition().name(),
            partition_max_entries = config.partition_max_entries,
            "Strata node initialized"
        );

        Ok(Self {
            config,
            ports,
            store,
            cache,
            edge,
            offloader,
            engine,
            router,
        })
    }

    /// Cache a reading, then flush and offload if thresholds are crossed.
    ///
    /// Only a failure to cache the reading is returned; flush and offload
    /// problems are logged and left for the monitor job to retry.
    pub async fn ingest(&self, m: Measurement) -> StrataResult<IngestOutcome> {
        let added = self.cache.add(m)?;
        let mut outcome = IngestOutcome {
            evicted: added.evicted,
            ..IngestOutcome::default()
        };

        if self.cache.is_threshold_full(self.config.flush_threshold_pct) {
            outcome.flush = Some(self.cache.flush_half_to_persistent());
            outcome.offload = self.offload_if_needed().await;
        }
        Ok(outcome)
    }

    /// Read one sample, stamp it and ingest it.
    ///
    /// Returns `Ok(None)` when the sensor read fails; the cycle is skipped.
    pub async fn sample_once(&self) -> StrataResult<Option<Measurement>> {
        let value = match self.ports.sensor.read_sample().await {
            Ok(value) => value,
            Err(reason) => {
                tracing::warn!(%reason, "Sensor read failed, skipping cycle");
                return Ok(None);
            }
        };

        let m = Measurement::new(self.ports.clock.now_secs(), value);
        self.ingest(m).await?;
        tracing::debug!(timestamp = m.timestamp, value = m.value, "Sample ingested");
        Ok(Some(m))
    }

    /// Flush the cache if over threshold, then offload if the persistent
    /// tier is over threshold.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let flush = self
            .cache
            .is_threshold_full(self.config.flush_threshold_pct)
            .then(|| self.cache.flush_half_to_persistent());
        MaintenanceReport {
            flush,
            offload: self.offload_if_needed().await,
        }
    }

    async fn offload_if_needed(&self) -> Option<OffloadReport> {
        match self.offloader.offload_if_needed(&self.store, &self.cache).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Offload pass failed");
                None
            }
        }
    }

    /// Dispatch one inbound message.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        self.router.handle_message(topic, payload).await
    }

    /// Start the sampling, monitor and inbox jobs on the current runtime.
    pub fn spawn_jobs(self: &Arc<Self>) -> NodeJobs {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (inbox_tx, inbox_rx) = mpsc::channel(64);

        let sampling = tokio::spawn(sampling_task(
            Arc::clone(self),
            self.config.sampling_interval(),
            shutdown_rx.clone(),
        ));
        let monitor = tokio::spawn(monitor_task(
            Arc::clone(self),
            self.config.monitor_interval(),
            shutdown_rx.clone(),
        ));
        let inbox = tokio::spawn(inbox_task(Arc::clone(self), inbox_rx, shutdown_rx));

        NodeJobs {
            sampling,
            monitor,
            inbox,
            inbox_tx,
            shutdown_tx,
        }
    }

    /// Fail in-flight edge requests and refuse new ones.
    pub fn close(&self) {
        self.edge.close();
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<MeasurementCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    pub fn edge(&self) -> &Arc<EdgeChannel> {
        &self.edge
    }

    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }
}

impl std::fmt::Debug for StrataNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrataNode")
            .field("cache", &self.cache)
            .field("store", &self.store)
            .field("edge", &self.edge)
            .finish()
    }
}
