//! Compile the mark-and-sweep delete queries for a schema.
//!
//! Everything a run touches carries the run's freshness tag in
//! `lastupdated`; cleanup deletes what the current run did not touch, and
//! only inside the current scope. Deletes page through `WITH x LIMIT
//! $LIMIT_SIZE` and report their row count as `deleted`, so the statement
//! runner re-runs each query until the graph is clean instead of holding one
//! giant transaction.
//!
//! Other-relationship cleanup removes stale *edges* only. The nodes on the
//! far side belong to their own schema's cleanup; deleting them here would
//! let one entity type destroy another's data as a side effect of staleness.

use surveyor_core::error::SchemaError;
use surveyor_core::schema::{LinkDirection, NodeSchema, RelSchema};

use crate::querybuilder::{match_clause, require_scope_properties, require_source};

/// Build the ordered cleanup queries for a node schema.
///
/// Four configurations:
/// 1. sub-resource + scoped cleanup (standard): delete stale nodes reachable
///    from the scope node, then the stale scope edges, then stale
///    other-relationship edges.
/// 2. sub-resource + unscoped: rejected at schema build time; never reaches
///    this compiler.
/// 3. no sub-resource + scoped: delete stale other-relationship edges only;
///    nodes are preserved.
/// 4. no sub-resource + unscoped: delete stale nodes of the label globally,
///    plus stale other-relationship edges.
///
/// A schema with no relationships at all compiles to nothing; those nodes
/// are left for manual management.
pub fn build_cleanup_queries(schema: &NodeSchema) -> Result<Vec<String>, SchemaError> {
    if schema.sub_resource_relationship().is_none() && schema.other_relationships().is_empty() {
        return Ok(Vec::new());
    }

    let mut queries = Vec::new();

    if let Some(sub) = schema.sub_resource_relationship() {
        // Cleanup jobs inject the scope id through run parameters; a matcher
        // bound to record fields cannot be satisfied there.
        for (key, prop) in sub.target_node_matcher().iter() {
            if !prop.set_in_kwargs {
                return Err(SchemaError::SubResourceMatcherNotKwarg {
                    label: schema.label().to_string(),
                    key: key.clone(),
                });
            }
        }
        queries.push(build_node_delete_query(schema));
        queries.push(build_sub_resource_rel_delete_query(schema));
    } else if !schema.scoped_cleanup() {
        queries.push(build_node_delete_query(schema));
    }

    for rel in schema.other_relationships() {
        queries.push(build_rel_delete_query(schema, rel));
    }
    Ok(queries)
}

/// Build the cleanup query for matchlink edges.
///
/// A matchlink has no implicit owner, so staleness alone is not enough: the
/// query also filters on the scope label/id stamped onto each edge at load
/// time, and deletes only the edge. Endpoint nodes are never touched.
pub fn build_matchlink_cleanup_query(rel: &RelSchema) -> Result<String, SchemaError> {
    let (source_label, _) = require_source(rel)?;
    require_scope_properties(rel)?;

    let (arrow_start, arrow_end) = match rel.direction() {
        LinkDirection::Inward => ("<-", "-"),
        LinkDirection::Outward => ("-", "->"),
    };
    // Validated refs above; the scope properties render as $-parameters.
    let scope_label_ref = rel.properties()["_sub_resource_label"].cypher_ref();
    let scope_id_ref = rel.properties()["_sub_resource_id"].cypher_ref();

    let lines = [
        format!(
            "MATCH (from:{source_label}){arrow_start}[r:{}]{arrow_end}(to:{})",
            rel.rel_label(),
            rel.target_node_label()
        ),
        "WHERE r.lastupdated <> $UPDATE_TAG".to_string(),
        format!("    AND r._sub_resource_label = {scope_label_ref}"),
        format!("    AND r._sub_resource_id = {scope_id_ref}"),
        "WITH r LIMIT $LIMIT_SIZE".to_string(),
        "DELETE r".to_string(),
        "RETURN count(*) AS deleted".to_string(),
    ];
    Ok(lines.join("\n"))
}

/// The MATCH anchoring cleanup: plain label match for unscoped schemas,
/// label match pinned to the scope node otherwise.
fn cleanup_match_statement(schema: &NodeSchema) -> String {
    match schema.sub_resource_relationship() {
        None => format!("MATCH (n:{})", schema.label()),
        Some(sub) => {
            let link = match sub.direction() {
                LinkDirection::Inward => format!("<-[s:{}]-", sub.rel_label()),
                LinkDirection::Outward => format!("-[s:{}]->", sub.rel_label()),
            };
            format!(
                "MATCH (n:{}){}(:{}{{{}}})",
                schema.label(),
                link,
                sub.target_node_label(),
                match_clause(sub.target_node_matcher()),
            )
        }
    }
}

/// `MATCH (n)-[r:REL]->(:Target)` with the correct arrow.
fn selected_rel_clause(rel: &RelSchema) -> String {
    let link = match rel.direction() {
        LinkDirection::Inward => format!("<-[r:{}]-", rel.rel_label()),
        LinkDirection::Outward => format!("-[r:{}]->", rel.rel_label()),
    };
    format!("MATCH (n){}(:{})", link, rel.target_node_label())
}

/// Batched delete of stale nodes, optionally cascading one hop down the
/// ownership arrow to take exclusively-owned children along.
fn build_node_delete_query(schema: &NodeSchema) -> String {
    let mut lines = vec![
        cleanup_match_statement(schema),
        "WHERE n.lastupdated <> $UPDATE_TAG".to_string(),
        "WITH n LIMIT $LIMIT_SIZE".to_string(),
    ];

    let cascade = schema
        .cascade_delete()
        .then(|| schema.sub_resource_relationship())
        .flatten();
    match cascade {
        Some(sub) => {
            // Children hang off n the same way n hangs off its scope node:
            // the ownership arrow points from owner to owned.
            let child_link = match sub.direction() {
                LinkDirection::Inward => format!("(n)-[:{}]->(child)", sub.rel_label()),
                LinkDirection::Outward => format!("(n)<-[:{}]-(child)", sub.rel_label()),
            };
            lines.push(format!("OPTIONAL MATCH {child_link}"));
            lines.push("DETACH DELETE n, child".to_string());
        }
        None => lines.push("DETACH DELETE n".to_string()),
    }
    lines.push("RETURN count(*) AS deleted".to_string());
    lines.join("\n")
}

/// Batched delete of stale scope edges (the nodes they hang off survived
/// cleanup, so only the edge is stale).
fn build_sub_resource_rel_delete_query(schema: &NodeSchema) -> String {
    [
        cleanup_match_statement(schema),
        "WHERE s.lastupdated <> $UPDATE_TAG".to_string(),
        "WITH s LIMIT $LIMIT_SIZE".to_string(),
        "DELETE s".to_string(),
        "RETURN count(*) AS deleted".to_string(),
    ]
    .join("\n")
}

/// Batched delete of stale other-relationship edges. Never the target node.
fn build_rel_delete_query(schema: &NodeSchema, rel: &RelSchema) -> String {
    [
        cleanup_match_statement(schema),
        selected_rel_clause(rel),
        "WHERE r.lastupdated <> $UPDATE_TAG".to_string(),
        "WITH r LIMIT $LIMIT_SIZE".to_string(),
        "DELETE r".to_string(),
        "RETURN count(*) AS deleted".to_string(),
    ]
    .join("\n")
}
