//! The load orchestrator: drive compiled queries against the store.
//!
//! A [`Loader`] owns nothing but its collaborators: the graph client the
//! caller built, and optionally an export sink that receives every logical
//! write as a flat event. With no client at all ([`Loader::export_only`])
//! the same compiled logic runs as an offline exporter.
//!
//! Batches of one schema are written sequentially, each in its own write
//! transaction, bounding memory and transaction size. A failing batch aborts
//! the load with earlier batches already committed; the MERGE-based queries
//! make a retried load converge to the same graph. Index DDL runs outside
//! transactions (the store requires autocommit there) and is retried with
//! exponential backoff on transient connectivity errors, isolated from the
//! batch-write path.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use neo4rs::query;
use serde_json::{Map, Value};

use surveyor_core::events::{EdgeEvent, EventId, ExportSink, VertexEvent};
use surveyor_core::params::{PARAM_SUB_RESOURCE_ID, PARAM_SUB_RESOURCE_LABEL};
use surveyor_core::resolve::resolve;
use surveyor_core::schema::{NodeMatcher, NodeSchema, PropertyRef, RelSchema};
use surveyor_core::RunParams;

use crate::bolt::{apply_params, records_to_bolt};
use crate::client::{is_transient_error, GraphClient, GraphError};
use crate::querybuilder::{
    build_create_index_queries, build_create_index_queries_for_matchlink, build_ingestion_query,
    build_matchlink_query,
};

/// Default number of records per write transaction.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

const INDEX_MAX_ATTEMPTS: u32 = 5;
const IDEMPOTENT_DDL_PREFIX: &str = "CREATE INDEX IF NOT EXISTS";

/// Drives ingestion for one or more schemas.
pub struct Loader {
    client: Option<GraphClient>,
    sink: Option<Arc<dyn ExportSink>>,
}

impl Loader {
    /// A loader writing to the given graph.
    pub fn new(client: GraphClient) -> Self {
        Self {
            client: Some(client),
            sink: None,
        }
    }

    /// Additionally tee every write to the given sink.
    pub fn with_sink(mut self, sink: Arc<dyn ExportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// A loader that skips the store entirely and only fires the tee.
    pub fn export_only(sink: Arc<dyn ExportSink>) -> Self {
        Self {
            client: None,
            sink: Some(sink),
        }
    }

    /// Create every index the schema needs. Idempotent; safe to run on every
    /// sync and from concurrent processes.
    pub async fn ensure_indexes(&self, schema: &NodeSchema) -> Result<(), GraphError> {
        self.run_index_queries(build_create_index_queries(schema))
            .await
    }

    /// Create every index a matchlink needs.
    pub async fn ensure_matchlink_indexes(&self, rel: &RelSchema) -> Result<(), GraphError> {
        self.run_index_queries(build_create_index_queries_for_matchlink(rel))
            .await
    }

    /// Load records for a node schema with the default batch size.
    pub async fn load(
        &self,
        schema: &NodeSchema,
        records: &[Map<String, Value>],
        params: &RunParams,
    ) -> Result<(), GraphError> {
        self.load_batched(schema, records, DEFAULT_BATCH_SIZE, params)
            .await
    }

    /// Load records for a node schema, `batch_size` records per transaction.
    pub async fn load_batched(
        &self,
        schema: &NodeSchema,
        records: &[Map<String, Value>],
        batch_size: usize,
        params: &RunParams,
    ) -> Result<(), GraphError> {
        if batch_size == 0 {
            return Err(GraphError::Config(
                "batch size must be a positive number of records".to_string(),
            ));
        }
        if records.is_empty() {
            tracing::debug!(label = schema.label(), "no records to load");
            return Ok(());
        }
        validate_required_params(&node_kwarg_refs(schema), params)?;
        let compiled = build_ingestion_query(schema)?;

        if let Some(sink) = &self.sink {
            self.tee_node_records(sink.as_ref(), schema, records, params);
        }
        let Some(client) = &self.client else {
            tracing::debug!(
                label = schema.label(),
                records = records.len(),
                "store write skipped (export-only mode)"
            );
            return Ok(());
        };

        let run_params: Map<String, Value> = params.to_query_params().into_iter().collect();
        for batch in records.chunks(batch_size) {
            write_batch(client, &compiled, &run_params, batch).await?;
            tracing::debug!(label = schema.label(), batch = batch.len(), "batch written");
        }
        tracing::info!(
            label = schema.label(),
            records = records.len(),
            lastupdated = params.lastupdated(),
            "load complete"
        );
        Ok(())
    }

    /// Link pre-existing nodes with the default batch size.
    pub async fn load_matchlinks(
        &self,
        rel: &RelSchema,
        records: &[Map<String, Value>],
        params: &RunParams,
    ) -> Result<(), GraphError> {
        self.load_matchlinks_batched(rel, records, DEFAULT_BATCH_SIZE, params)
            .await
    }

    /// Link pre-existing nodes, `batch_size` records per transaction.
    ///
    /// Matchlink cleanup cannot be derived from an implicit owner, so the
    /// run's scope is mandatory here and stamped onto every edge.
    pub async fn load_matchlinks_batched(
        &self,
        rel: &RelSchema,
        records: &[Map<String, Value>],
        batch_size: usize,
        params: &RunParams,
    ) -> Result<(), GraphError> {
        if batch_size == 0 {
            return Err(GraphError::Config(
                "batch size must be a positive number of records".to_string(),
            ));
        }
        for required in [PARAM_SUB_RESOURCE_LABEL, PARAM_SUB_RESOURCE_ID] {
            if params.lookup(required).is_none() {
                return Err(GraphError::MissingParameter(required.to_string()));
            }
        }
        if records.is_empty() {
            tracing::debug!(rel_label = rel.rel_label(), "no matchlinks to load");
            return Ok(());
        }
        validate_required_params(&rel_kwarg_refs(rel), params)?;
        let compiled = build_matchlink_query(rel)?;

        if let Some(sink) = &self.sink {
            self.tee_matchlink_records(sink.as_ref(), rel, records, params);
        }
        let Some(client) = &self.client else {
            tracing::debug!(
                rel_label = rel.rel_label(),
                records = records.len(),
                "store write skipped (export-only mode)"
            );
            return Ok(());
        };

        let run_params: Map<String, Value> = params.to_query_params().into_iter().collect();
        for batch in records.chunks(batch_size) {
            write_batch(client, &compiled, &run_params, batch).await?;
        }
        tracing::info!(
            rel_label = rel.rel_label(),
            records = records.len(),
            "matchlink load complete"
        );
        Ok(())
    }

    async fn run_index_queries(&self, statements: Vec<String>) -> Result<(), GraphError> {
        for statement in &statements {
            if !statement.trim_start().starts_with(IDEMPOTENT_DDL_PREFIX) {
                return Err(GraphError::Config(format!(
                    "refusing non-idempotent index statement: {statement}"
                )));
            }
        }
        let Some(client) = &self.client else {
            tracing::debug!("index creation skipped (export-only mode)");
            return Ok(());
        };
        for statement in &statements {
            create_index_with_retry(client, statement).await?;
        }
        tracing::debug!(indexes = statements.len(), "indexes ensured");
        Ok(())
    }

    fn tee_node_records(
        &self,
        sink: &dyn ExportSink,
        schema: &NodeSchema,
        records: &[Map<String, Value>],
        params: &RunParams,
    ) {
        for record in records {
            let vertex = vertex_event(schema, record, params);
            if let Err(error) = sink.write_vertex(&vertex) {
                tracing::warn!(label = schema.label(), %error, "export sink rejected vertex");
            }
            for edge in node_edge_events(schema, record, params) {
                if let Err(error) = sink.write_edge(&edge) {
                    tracing::warn!(label = schema.label(), %error, "export sink rejected edge");
                }
            }
        }
    }

    fn tee_matchlink_records(
        &self,
        sink: &dyn ExportSink,
        rel: &RelSchema,
        records: &[Map<String, Value>],
        params: &RunParams,
    ) {
        for record in records {
            if let Some(edge) = matchlink_edge_event(rel, record, params) {
                if let Err(error) = sink.write_edge(&edge) {
                    tracing::warn!(rel_label = rel.rel_label(), %error, "export sink rejected edge");
                }
            }
        }
    }
}

async fn write_batch(
    client: &GraphClient,
    compiled: &str,
    run_params: &Map<String, Value>,
    batch: &[Map<String, Value>],
) -> Result<(), GraphError> {
    let q = apply_params(query(compiled), run_params).param("DictList", records_to_bolt(batch));
    let mut txn = client.start_txn().await?;
    txn.run(q).await?;
    txn.commit().await?;
    Ok(())
}

async fn create_index_with_retry(
    client: &GraphClient,
    statement: &str,
) -> Result<(), GraphError> {
    let mut attempt: u32 = 1;
    loop {
        match client.run(query(statement)).await {
            Ok(()) => return Ok(()),
            Err(GraphError::Query(source)) if is_transient_error(&source) => {
                if attempt >= INDEX_MAX_ATTEMPTS {
                    return Err(GraphError::IndexCreation {
                        attempts: attempt,
                        source,
                    });
                }
                let wait = Duration::from_secs(1 << (attempt - 1));
                tracing::warn!(
                    attempt,
                    wait_secs = wait.as_secs(),
                    error = %source,
                    "transient error creating index; backing off"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(other) => return Err(other),
        }
    }
}

/// Every run-parameter name the schema's refs can ask for.
fn node_kwarg_refs(schema: &NodeSchema) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut add = |prop: &PropertyRef| {
        if prop.set_in_kwargs {
            names.insert(prop.name.clone());
        }
    };
    for prop in schema.properties().values() {
        add(prop);
    }
    let mut rels: Vec<&RelSchema> = Vec::new();
    if let Some(sub) = schema.sub_resource_relationship() {
        rels.push(sub);
    }
    rels.extend(schema.other_relationships());
    for rel in rels {
        for prop in rel.properties().values() {
            add(prop);
        }
        for (_, prop) in rel.target_node_matcher().iter() {
            add(prop);
        }
    }
    names
}

fn rel_kwarg_refs(rel: &RelSchema) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut add = |prop: &PropertyRef| {
        if prop.set_in_kwargs {
            names.insert(prop.name.clone());
        }
    };
    for prop in rel.properties().values() {
        add(prop);
    }
    for (_, prop) in rel.target_node_matcher().iter() {
        add(prop);
    }
    if let Some(matcher) = rel.source_node_matcher() {
        for (_, prop) in matcher.iter() {
            add(prop);
        }
    }
    names
}

/// Every `$name` a compiled query will bind must be resolvable up front;
/// a missing parameter is a configuration error, not a store error.
fn validate_required_params(names: &BTreeSet<String>, params: &RunParams) -> Result<(), GraphError> {
    for name in names {
        if params.lookup(name).is_none() {
            return Err(GraphError::MissingParameter(name.clone()));
        }
    }
    Ok(())
}

fn vertex_event(
    schema: &NodeSchema,
    record: &Map<String, Value>,
    params: &RunParams,
) -> VertexEvent {
    let uid = schema
        .id_ref()
        .and_then(|prop| resolve(prop, record, params))
        .unwrap_or(Value::Null);

    let mut labels = vec![schema.label().to_string()];
    labels.extend(schema.extra_node_labels().iter().cloned());

    let mut properties = Map::new();
    for (name, prop) in schema.properties() {
        if name == "id" || name == "lastupdated" {
            continue;
        }
        if let Some(value) = resolve(prop, record, params) {
            properties.insert(name.clone(), value);
        }
    }

    let scope = params.scope();
    VertexEvent {
        id: EventId::new(),
        uid,
        labels,
        properties,
        lastupdated: params.lastupdated(),
        sub_resource_label: scope.map(|(label, _)| label.to_string()),
        sub_resource_id: scope.map(|(_, id)| id.to_string()),
        emitted_at: Utc::now(),
    }
}

fn node_edge_events(
    schema: &NodeSchema,
    record: &Map<String, Value>,
    params: &RunParams,
) -> Vec<EdgeEvent> {
    let from_uid = schema
        .id_ref()
        .and_then(|prop| resolve(prop, record, params));

    let mut rels: Vec<&RelSchema> = Vec::new();
    if let Some(sub) = schema.sub_resource_relationship() {
        rels.push(sub);
    }
    rels.extend(schema.other_relationships());

    let mut events = Vec::new();
    for rel in rels {
        for to_match in expand_matcher(rel.target_node_matcher(), record, params) {
            events.push(EdgeEvent {
                id: EventId::new(),
                from_uid: from_uid.clone(),
                to_uid: None,
                rel_type: rel.rel_label().to_string(),
                from_match: None,
                to_match: Some(to_match),
                properties: rel_event_properties(rel, record, params),
                lastupdated: params.lastupdated(),
                sub_resource_label: params.scope().map(|(label, _)| label.to_string()),
                sub_resource_id: params.scope().map(|(_, id)| id.to_string()),
                emitted_at: Utc::now(),
            });
        }
    }
    events
}

fn matchlink_edge_event(
    rel: &RelSchema,
    record: &Map<String, Value>,
    params: &RunParams,
) -> Option<EdgeEvent> {
    let from_match = resolve_matcher(rel.source_node_matcher()?, record, params)?;
    let to_match = resolve_matcher(rel.target_node_matcher(), record, params)?;
    let scope = params.scope();
    Some(EdgeEvent {
        id: EventId::new(),
        from_uid: None,
        to_uid: None,
        rel_type: rel.rel_label().to_string(),
        from_match: Some(from_match),
        to_match: Some(to_match),
        properties: rel_event_properties(rel, record, params),
        lastupdated: params.lastupdated(),
        sub_resource_label: scope.map(|(label, _)| label.to_string()),
        sub_resource_id: scope.map(|(_, id)| id.to_string()),
        emitted_at: Utc::now(),
    })
}

/// Resolve every matcher key; `None` when the record cannot identify the
/// endpoint at all.
fn resolve_matcher(
    matcher: &NodeMatcher,
    record: &Map<String, Value>,
    params: &RunParams,
) -> Option<Map<String, Value>> {
    let mut resolved = Map::new();
    for (key, prop) in matcher.iter() {
        resolved.insert(key.clone(), resolve(prop, record, params)?);
    }
    Some(resolved)
}

/// Resolve a matcher into one target identity per edge, expanding a
/// one-to-many key into one identity per list element.
fn expand_matcher(
    matcher: &NodeMatcher,
    record: &Map<String, Value>,
    params: &RunParams,
) -> Vec<Map<String, Value>> {
    let mut base = Map::new();
    let mut expansion: Option<(String, Vec<Value>)> = None;
    for (key, prop) in matcher.iter() {
        let Some(value) = resolve(prop, record, params) else {
            return Vec::new();
        };
        match value {
            Value::Array(items) if prop.one_to_many => {
                expansion = Some((key.clone(), items));
            }
            _ => {
                base.insert(key.clone(), value);
            }
        }
    }
    match expansion {
        None => vec![base],
        Some((key, items)) => items
            .into_iter()
            .map(|item| {
                let mut matched = base.clone();
                matched.insert(key.clone(), item);
                matched
            })
            .collect(),
    }
}

fn rel_event_properties(
    rel: &RelSchema,
    record: &Map<String, Value>,
    params: &RunParams,
) -> Map<String, Value> {
    let mut properties = Map::new();
    for (name, prop) in rel.properties() {
        if matches!(
            name.as_str(),
            "lastupdated" | "_sub_resource_label" | "_sub_resource_id"
        ) {
            continue;
        }
        if let Some(value) = resolve(prop, record, params) {
            properties.insert(name.clone(), value);
        }
    }
    properties
}
