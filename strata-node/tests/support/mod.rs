//! Shared wiring for the node integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use strata_core::{Clock, StrataConfig, Timestamp};
use strata_node::{NodePorts, StrataNode};
use strata_test_utils::{ManualClock, MemoryPartition, RecordingTransport, ScriptedSensor};
use tokio::task::JoinHandle;

/// A node over an in-memory partition with recording ports.
pub struct Harness {
    pub node: Arc<StrataNode>,
    pub transport: Arc<RecordingTransport>,
    pub partition: Arc<MemoryPartition>,
}

/// Node with a silent sensor and a clock fixed at 1000.
pub fn harness(config: StrataConfig) -> Harness {
    harness_with(config, ScriptedSensor::default(), Arc::new(ManualClock::new(1_000)))
}

pub fn harness_with(
    config: StrataConfig,
    sensor: ScriptedSensor,
    clock: Arc<dyn Clock>,
) -> Harness {
    let transport = Arc::new(RecordingTransport::new());
    let partition = Arc::new(MemoryPartition::default());
    let node = StrataNode::new(
        config,
        partition.clone(),
        NodePorts {
            transport: transport.clone(),
            sensor: Arc::new(sensor),
            clock,
        },
    )
    .expect("node should build from a valid config");

    Harness {
        node: Arc::new(node),
        transport,
        partition,
    }
}

pub fn point_query(timestamp: Timestamp, response_topic: Option<&str>) -> Vec<u8> {
    let mut query = json!({ "action": "get_measurement", "timestamp": timestamp });
    if let Some(topic) = response_topic {
        query["response_topic"] = json!(topic);
    }
    query.to_string().into_bytes()
}

pub fn range_query(start: Timestamp, end: Timestamp, response_topic: Option<&str>) -> Vec<u8> {
    let mut query = json!({
        "action": "get_data_range",
        "start_timestamp": start,
        "end_timestamp": end,
    });
    if let Some(topic) = response_topic {
        query["response_topic"] = json!(topic);
    }
    query.to_string().into_bytes()
}

pub fn edge_response(request_id: u32, timestamp: Timestamp, temperature: f32) -> Vec<u8> {
    json!({
        "request_id": request_id,
        "timestamp": timestamp,
        "temperature": temperature,
    })
    .to_string()
    .into_bytes()
}

/// Answer edge requests for timestamps in `archive`, ignoring the rest.
///
/// Subscribes before returning, so requests published afterwards are seen.
pub fn spawn_edge_peer(
    harness: &Harness,
    archive: HashMap<Timestamp, f32>,
) -> JoinHandle<()> {
    let mut requests = harness.transport.subscribe();
    let node = Arc::clone(&harness.node);

    tokio::spawn(async move {
        let request_topic = node.config().topics.edge_request.clone();
        let response_topic = node.config().topics.edge_response.clone();

        while let Some(published) = requests.recv().await {
            if published.topic != request_topic {
                continue;
            }
            let request = published.json();
            let request_id = request["request_id"].as_u64().expect("request_id") as u32;
            let timestamp = request["timestamp"].as_u64().expect("timestamp") as u32;

            if let Some(value) = archive.get(&timestamp) {
                node.handle_message(&response_topic, &edge_response(request_id, timestamp, *value))
                    .await;
            }
        }
    })
}
