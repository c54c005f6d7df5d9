//! Compile declarative schemas into parameterized Cypher.
//!
//! Each schema compiles once into a single batch-ingestion statement that is
//! reused across every batch of every run: `UNWIND $DictList AS item`, MERGE
//! the node by `id`, stamp `lastupdated` and `firstseen`, then attach each
//! declared relationship inside a CALL subquery with UNION branches so missing
//! relationship data never aborts the node write. Record fields render as
//! `item.<name>`, run parameters as `$<name>`; nothing from a record is ever
//! spliced into query text.

use surveyor_core::error::SchemaError;
use surveyor_core::params::{PARAM_SUB_RESOURCE_ID, PARAM_SUB_RESOURCE_LABEL};
use surveyor_core::schema::{LinkDirection, NodeMatcher, NodeSchema, RelSchema};

/// Build the batch ingestion query for a node schema.
pub fn build_ingestion_query(schema: &NodeSchema) -> Result<String, SchemaError> {
    let id_ref = schema
        .id_ref()
        .ok_or_else(|| SchemaError::MissingNodeProperty {
            label: schema.label().to_string(),
            property: "id".to_string(),
        })?;

    let mut lines = vec![
        "UNWIND $DictList AS item".to_string(),
        format!("MERGE (i:{}{{id: {}}})", schema.label(), id_ref.cypher_ref()),
        "ON CREATE SET i.firstseen = timestamp()".to_string(),
        "SET".to_string(),
        node_properties_clause(schema),
    ];

    let attach = attach_relationships_clause(
        schema.sub_resource_relationship(),
        schema.other_relationships(),
    );
    if !attach.is_empty() {
        lines.push(attach);
    }
    Ok(lines.join("\n"))
}

/// Build the query linking two already-existing nodes for a matchlink schema.
///
/// Endpoints are MATCHed, never MERGEd: a record whose source or target does
/// not exist produces no row, so the edge is skipped and no node is ever
/// fabricated.
pub fn build_matchlink_query(rel: &RelSchema) -> Result<String, SchemaError> {
    let (source_label, source_matcher) = require_source(rel)?;
    require_scope_properties(rel)?;

    let merge = match rel.direction() {
        LinkDirection::Inward => format!("MERGE (from)<-[r:{}]-(to)", rel.rel_label()),
        LinkDirection::Outward => format!("MERGE (from)-[r:{}]->(to)", rel.rel_label()),
    };

    let lines = [
        "UNWIND $DictList AS item".to_string(),
        format!("MATCH (from:{}{{{}}})", source_label, match_clause(source_matcher)),
        format!(
            "MATCH (to:{}{{{}}})",
            rel.target_node_label(),
            match_clause(rel.target_node_matcher())
        ),
        merge,
        "ON CREATE SET r.firstseen = timestamp()".to_string(),
        "SET".to_string(),
        rel_properties_clause("r", rel),
    ];
    Ok(lines.join("\n"))
}

/// Build the idempotent index DDL for a node schema: the mandatory `id` and
/// `lastupdated` indexes, `id` on every extra label, every matcher key on
/// every relationship's target label, and every `extra_index` property.
pub fn build_create_index_queries(schema: &NodeSchema) -> Vec<String> {
    let mut queries: Vec<String> = Vec::new();
    let mut push = |queries: &mut Vec<String>, label: &str, attribute: &str| {
        let statement = index_statement(label, attribute);
        if !queries.contains(&statement) {
            queries.push(statement);
        }
    };

    push(&mut queries, schema.label(), "id");
    push(&mut queries, schema.label(), "lastupdated");
    for extra in schema.extra_node_labels() {
        push(&mut queries, extra, "id");
    }

    let mut rels: Vec<&RelSchema> = Vec::new();
    if let Some(sub) = schema.sub_resource_relationship() {
        rels.push(sub);
    }
    rels.extend(schema.other_relationships());
    for rel in rels {
        for (key, _) in rel.target_node_matcher().iter() {
            push(&mut queries, rel.target_node_label(), key);
        }
    }

    for (name, prop) in schema.properties() {
        if prop.extra_index {
            push(&mut queries, schema.label(), name);
        }
    }
    queries
}

/// Build the index DDL for a matchlink: both endpoint matchers plus a
/// composite index on the relationship's cleanup key.
pub fn build_create_index_queries_for_matchlink(rel: &RelSchema) -> Vec<String> {
    let Some(source_matcher) = rel.source_node_matcher() else {
        tracing::warn!(
            rel_label = rel.rel_label(),
            "no source node matcher; matchlink index creation skipped"
        );
        return Vec::new();
    };
    let source_label = rel.source_node_label().unwrap_or_default();

    let mut queries = Vec::new();
    for (key, _) in source_matcher.iter() {
        queries.push(index_statement(source_label, key));
    }
    for (key, _) in rel.target_node_matcher().iter() {
        queries.push(index_statement(rel.target_node_label(), key));
    }

    let (arrow_start, arrow_end) = match rel.direction() {
        LinkDirection::Inward => ("<-", "-"),
        LinkDirection::Outward => ("-", "->"),
    };
    queries.push(format!(
        "CREATE INDEX IF NOT EXISTS FOR (){arrow_start}[r:{}]{arrow_end}() ON (r.lastupdated, r.{}, r.{})",
        rel.rel_label(),
        PARAM_SUB_RESOURCE_LABEL,
        PARAM_SUB_RESOURCE_ID,
    ));
    queries
}

fn index_statement(label: &str, attribute: &str) -> String {
    format!("CREATE INDEX IF NOT EXISTS FOR (n:{label}) ON (n.{attribute})")
}

/// `key: <ref>, ...`: the body of a property match block. Exact matching
/// only; advanced matching goes through the WHERE-clause builder.
pub(crate) fn match_clause(matcher: &NodeMatcher) -> String {
    matcher
        .iter()
        .map(|(key, prop)| format!("{}: {}", key, prop.cypher_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// WHERE-clause matching for other-relationship targets, honoring the
/// matcher's case-insensitive, fuzzy, and one-to-many flags.
fn where_clause_for_rel_match(node_var: &str, matcher: &NodeMatcher) -> String {
    matcher
        .iter()
        .map(|(key, prop)| {
            let prop_ref = prop.cypher_ref();
            if prop.ignore_case {
                format!("toLower({node_var}.{key}) = toLower({prop_ref})")
            } else if prop.fuzzy_and_ignore_case {
                format!("toLower({node_var}.{key}) CONTAINS toLower({prop_ref})")
            } else if prop.one_to_many {
                // The ref points at a list on the record; attach one edge per element.
                format!("{node_var}.{key} IN {prop_ref}")
            } else {
                format!("{node_var}.{key} = {prop_ref}")
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// The SET body for the node: every property except `id` (already bound by
/// the MERGE), plus any extra labels.
fn node_properties_clause(schema: &NodeSchema) -> String {
    let mut assignments: Vec<String> = schema
        .properties()
        .iter()
        .filter(|(name, _)| name.as_str() != "id")
        .map(|(name, prop)| format!("    i.{} = {}", name, prop.cypher_ref()))
        .collect();

    if !schema.extra_node_labels().is_empty() {
        assignments.push(format!("    i:{}", schema.extra_node_labels().join(":")));
    }
    assignments.join(",\n")
}

/// The SET body for a relationship variable.
fn rel_properties_clause(rel_var: &str, rel: &RelSchema) -> String {
    rel.properties()
        .iter()
        .map(|(name, prop)| format!("    {}.{} = {}", rel_var, name, prop.cypher_ref()))
        .collect::<Vec<_>>()
        .join(",\n")
}

/// The CALL subquery block attaching the sub-resource relationship
/// and every other relationship. Each branch OPTIONAL-MATCHes its target and
/// filters nulls, so the node write succeeds even when only part of the
/// relationship data is present in this run.
fn attach_relationships_clause(
    sub_resource: Option<&RelSchema>,
    other_relationships: &[RelSchema],
) -> String {
    let mut branches = Vec::new();
    if let Some(rel) = sub_resource {
        branches.push(attach_sub_resource_branch(rel));
    }
    for (index, rel) in other_relationships.iter().enumerate() {
        branches.push(attach_other_relationship_branch(index, rel));
    }
    if branches.is_empty() {
        return String::new();
    }

    format!(
        "WITH i, item\nCALL {{\n{}\n}}",
        branches.join("\nUNION\n")
    )
}

fn attach_sub_resource_branch(rel: &RelSchema) -> String {
    let merge = match rel.direction() {
        LinkDirection::Inward => format!("MERGE (i)<-[r:{}]-(j)", rel.rel_label()),
        LinkDirection::Outward => format!("MERGE (i)-[r:{}]->(j)", rel.rel_label()),
    };
    [
        "    WITH i, item".to_string(),
        format!(
            "    OPTIONAL MATCH (j:{}{{{}}})",
            rel.target_node_label(),
            match_clause(rel.target_node_matcher())
        ),
        "    WITH i, item, j WHERE j IS NOT NULL".to_string(),
        format!("    {merge}"),
        "    ON CREATE SET r.firstseen = timestamp()".to_string(),
        "    SET".to_string(),
        rel_properties_clause("r", rel),
    ]
    .join("\n")
}

fn attach_other_relationship_branch(index: usize, rel: &RelSchema) -> String {
    let node_var = format!("n{index}");
    let rel_var = format!("r{index}");
    let merge = match rel.direction() {
        LinkDirection::Inward => {
            format!("MERGE (i)<-[{rel_var}:{}]-({node_var})", rel.rel_label())
        }
        LinkDirection::Outward => {
            format!("MERGE (i)-[{rel_var}:{}]->({node_var})", rel.rel_label())
        }
    };
    [
        "    WITH i, item".to_string(),
        format!("    OPTIONAL MATCH ({node_var}:{})", rel.target_node_label()),
        format!(
            "    WHERE {}",
            where_clause_for_rel_match(&node_var, rel.target_node_matcher())
        ),
        format!("    WITH i, item, {node_var} WHERE {node_var} IS NOT NULL"),
        format!("    {merge}"),
        format!("    ON CREATE SET {rel_var}.firstseen = timestamp()"),
        "    SET".to_string(),
        rel_properties_clause(&rel_var, rel),
    ]
    .join("\n")
}

pub(crate) fn require_source(rel: &RelSchema) -> Result<(&str, &NodeMatcher), SchemaError> {
    match (rel.source_node_label(), rel.source_node_matcher()) {
        (Some(label), Some(matcher)) => Ok((label, matcher)),
        _ => Err(SchemaError::MissingSourceMatcher {
            rel_label: rel.rel_label().to_string(),
        }),
    }
}

/// Matchlink properties must carry the cleanup scope as run-parameter refs.
pub(crate) fn require_scope_properties(rel: &RelSchema) -> Result<(), SchemaError> {
    for required in [PARAM_SUB_RESOURCE_LABEL, PARAM_SUB_RESOURCE_ID] {
        match rel.properties().get(required) {
            Some(prop) if prop.set_in_kwargs => {}
            _ => {
                return Err(SchemaError::MissingScopeProperty {
                    rel_label: rel.rel_label().to_string(),
                    property: required.to_string(),
                })
            }
        }
    }
    Ok(())
}
