//! Export-sink events: the flat-record tee.
//!
//! The load orchestrator can mirror every logical graph write into
//! self-contained events, independent of the graph store. Sinks (file
//! writers, queues) implement [`ExportSink`]; the engine treats the calls as
//! fire-and-forget notifications and never reads a result beyond logging it.
//! The sink is an explicitly constructed collaborator passed into the
//! loader, with `close` as its lifecycle hook.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Unique identifier for an export event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// One node write, flattened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexEvent {
    pub id: EventId,
    /// Resolved value of the node's `id` property.
    pub uid: Value,
    /// Primary label plus any extra labels.
    pub labels: Vec<String>,
    /// Resolved node properties (record fields and run parameters).
    pub properties: Map<String, Value>,
    /// Freshness tag of the run emitting the event.
    pub lastupdated: i64,
    pub sub_resource_label: Option<String>,
    pub sub_resource_id: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

/// One relationship write, flattened.
///
/// Relationships derived from a node schema carry the source node's `uid`;
/// matchlink edges carry matcher maps for both endpoints instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeEvent {
    pub id: EventId,
    pub from_uid: Option<Value>,
    pub to_uid: Option<Value>,
    pub rel_type: String,
    /// Resolved matcher values identifying the source node, for matchlinks.
    pub from_match: Option<Map<String, Value>>,
    /// Resolved matcher values identifying the target node.
    pub to_match: Option<Map<String, Value>>,
    pub properties: Map<String, Value>,
    pub lastupdated: i64,
    pub sub_resource_label: Option<String>,
    pub sub_resource_id: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

/// Receiver for the flat-record tee.
pub trait ExportSink: Send + Sync {
    fn write_vertex(&self, event: &VertexEvent) -> anyhow::Result<()>;
    fn write_edge(&self, event: &EdgeEvent) -> anyhow::Result<()>;
    /// Flush and release resources. Called by owners, not by the engine.
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Sink that discards everything. Useful for wiring and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ExportSink for NullSink {
    fn write_vertex(&self, _event: &VertexEvent) -> anyhow::Result<()> {
        Ok(())
    }

    fn write_edge(&self, _event: &EdgeEvent) -> anyhow::Result<()> {
        Ok(())
    }
}
