//! Declarative schema model for graph entity and relationship types.
//!
//! A [`NodeSchema`] describes one kind of node the engine can ingest: its
//! label, where each property value comes from, and which relationships tie
//! it to the rest of the graph. A [`RelSchema`] describes an edge, either as
//! part of a node schema or standalone as a matchlink between two node types
//! that already exist. Schemas are immutable value objects: they are defined
//! once per entity type at startup and reused across every sync run, while
//! the record data they describe changes per run.
//!
//! The query and cleanup compilers consume these types to generate Cypher;
//! nothing in this module performs I/O.

use std::collections::BTreeMap;

use crate::error::SchemaError;

/// Direction of a relationship relative to the node being ingested.
///
/// `Inward` means the arrow points at the ingested node (`(i)<-[r]-(j)`),
/// `Outward` means it points away (`(i)-[r]->(j)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Inward,
    Outward,
}

/// Coercion target applied by the sanitizer before ingestion.
///
/// Coercion never happens inside generated queries; the query compiler takes
/// record values as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoFormat {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    List,
    Dict,
}

/// A reference describing how one property of a node or relationship gets
/// its value at ingestion time.
///
/// The value comes either from the raw record being processed (default;
/// `name` may be a dotted path into nested records) or from the run's shared
/// parameters (`set_in_kwargs`, used for scope identifiers and the freshness
/// tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRef {
    /// Key in the raw record, or run-parameter name when `set_in_kwargs`.
    pub name: String,
    /// Resolve from run parameters instead of the per-record dict.
    pub set_in_kwargs: bool,
    /// The record field holds a list; expands to one relationship per element.
    /// Only meaningful inside a target node matcher.
    pub one_to_many: bool,
    /// Sanitizer coercion target.
    pub auto_format: Option<AutoFormat>,
    /// Create an additional index for this property beyond the mandatory ones.
    pub extra_index: bool,
    /// Case-insensitive equality when matching related nodes.
    pub ignore_case: bool,
    /// Case-insensitive substring match (`CONTAINS`) when matching related nodes.
    pub fuzzy_and_ignore_case: bool,
}

impl PropertyRef {
    /// A ref resolved from the raw record. `name` may be dotted (`"a.b"`).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            set_in_kwargs: false,
            one_to_many: false,
            auto_format: None,
            extra_index: false,
            ignore_case: false,
            fuzzy_and_ignore_case: false,
        }
    }

    /// A ref resolved from the run's shared parameters.
    pub fn kwarg(name: impl Into<String>) -> Self {
        Self {
            set_in_kwargs: true,
            ..Self::new(name)
        }
    }

    pub fn with_auto_format(mut self, format: AutoFormat) -> Self {
        self.auto_format = Some(format);
        self
    }

    pub fn with_extra_index(mut self) -> Self {
        self.extra_index = true;
        self
    }

    pub fn with_one_to_many(mut self) -> Self {
        self.one_to_many = true;
        self
    }

    pub fn with_ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    pub fn with_fuzzy_ignore_case(mut self) -> Self {
        self.fuzzy_and_ignore_case = true;
        self
    }

    /// Render this ref the way generated queries address it: `$name` for
    /// run parameters, `item.name` for record fields.
    pub fn cypher_ref(&self) -> String {
        if self.set_in_kwargs {
            format!("${}", self.name)
        } else {
            format!("item.{}", self.name)
        }
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if self.ignore_case && self.fuzzy_and_ignore_case {
            return Err(SchemaError::CaseFlagConflict {
                name: self.name.clone(),
            });
        }
        if self.one_to_many && (self.ignore_case || self.fuzzy_and_ignore_case) {
            return Err(SchemaError::OneToManyConflict {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// Matching criteria identifying a node by one or more properties.
///
/// Used both to MERGE a related node's identity during ingestion and to
/// scope cleanup. Single-key matchers (commonly on `id`) permit a direct
/// indexed lookup; composite matchers are supported but hit more indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMatcher {
    keys: BTreeMap<String, PropertyRef>,
}

impl NodeMatcher {
    /// Matcher on a single property.
    pub fn on(key: impl Into<String>, prop: PropertyRef) -> Self {
        Self::default().and(key, prop)
    }

    /// Add another property to form a composite matcher.
    pub fn and(mut self, key: impl Into<String>, prop: PropertyRef) -> Self {
        self.keys.insert(key.into(), prop);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyRef)> {
        self.keys.iter()
    }

    pub fn get(&self, key: &str) -> Option<&PropertyRef> {
        self.keys.get(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Declarative description of a relationship.
///
/// As part of a [`NodeSchema`], a `RelSchema` tells the ingestion query how
/// to attach the ingested node to an existing target node. Standalone (a
/// "matchlink"), it connects two pre-existing nodes and additionally needs a
/// source label and matcher; a matchlink never creates nodes, only the edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelSchema {
    rel_label: String,
    direction: LinkDirection,
    target_node_label: String,
    target_node_matcher: NodeMatcher,
    properties: BTreeMap<String, PropertyRef>,
    source_node_label: Option<String>,
    source_node_matcher: Option<NodeMatcher>,
}

impl RelSchema {
    pub fn builder(
        rel_label: impl Into<String>,
        target_node_label: impl Into<String>,
    ) -> RelSchemaBuilder {
        RelSchemaBuilder {
            rel_label: rel_label.into(),
            direction: LinkDirection::Outward,
            target_node_label: target_node_label.into(),
            target_node_matcher: NodeMatcher::default(),
            properties: BTreeMap::new(),
            source_node_label: None,
            source_node_matcher: None,
        }
    }

    pub fn rel_label(&self) -> &str {
        &self.rel_label
    }

    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    pub fn target_node_label(&self) -> &str {
        &self.target_node_label
    }

    pub fn target_node_matcher(&self) -> &NodeMatcher {
        &self.target_node_matcher
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyRef> {
        &self.properties
    }

    pub fn source_node_label(&self) -> Option<&str> {
        self.source_node_label.as_deref()
    }

    pub fn source_node_matcher(&self) -> Option<&NodeMatcher> {
        self.source_node_matcher.as_ref()
    }
}

/// Builder for [`RelSchema`]. Validation happens in [`RelSchemaBuilder::build`].
#[derive(Debug, Clone)]
pub struct RelSchemaBuilder {
    rel_label: String,
    direction: LinkDirection,
    target_node_label: String,
    target_node_matcher: NodeMatcher,
    properties: BTreeMap<String, PropertyRef>,
    source_node_label: Option<String>,
    source_node_matcher: Option<NodeMatcher>,
}

impl RelSchemaBuilder {
    pub fn direction(mut self, direction: LinkDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn target_matcher(mut self, matcher: NodeMatcher) -> Self {
        self.target_node_matcher = matcher;
        self
    }

    /// Declare a property set on the relationship itself.
    pub fn property(mut self, key: impl Into<String>, prop: PropertyRef) -> Self {
        self.properties.insert(key.into(), prop);
        self
    }

    /// Declare the source side, required when the schema is used as a matchlink.
    pub fn source(mut self, label: impl Into<String>, matcher: NodeMatcher) -> Self {
        self.source_node_label = Some(label.into());
        self.source_node_matcher = Some(matcher);
        self
    }

    pub fn build(self) -> Result<RelSchema, SchemaError> {
        if !self.properties.contains_key("lastupdated") {
            return Err(SchemaError::MissingRelProperty {
                rel_label: self.rel_label,
            });
        }
        if self.properties.contains_key("firstseen") {
            return Err(SchemaError::ReservedProperty {
                label: self.rel_label,
            });
        }
        if self.target_node_matcher.is_empty() {
            return Err(SchemaError::EmptyMatcher {
                label: self.target_node_label,
            });
        }
        for prop in self.properties.values() {
            prop.validate()?;
        }
        for (_, prop) in self.target_node_matcher.iter() {
            prop.validate()?;
        }
        if let Some(matcher) = &self.source_node_matcher {
            if matcher.is_empty() {
                return Err(SchemaError::EmptyMatcher {
                    label: self.source_node_label.clone().unwrap_or_default(),
                });
            }
            for (_, prop) in matcher.iter() {
                prop.validate()?;
            }
        }
        Ok(RelSchema {
            rel_label: self.rel_label,
            direction: self.direction,
            target_node_label: self.target_node_label,
            target_node_matcher: self.target_node_matcher,
            properties: self.properties,
            source_node_label: self.source_node_label,
            source_node_matcher: self.source_node_matcher,
        })
    }
}

/// Declarative description of one graph entity type.
///
/// Every node schema carries an `id` property (unique within the label) and
/// a `lastupdated` property (the freshness tag of the run that last wrote
/// the node, which is cleanup's only staleness signal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSchema {
    label: String,
    properties: BTreeMap<String, PropertyRef>,
    extra_node_labels: Vec<String>,
    sub_resource_relationship: Option<RelSchema>,
    other_relationships: Vec<RelSchema>,
    scoped_cleanup: bool,
    cascade_delete: bool,
}

impl NodeSchema {
    pub fn builder(label: impl Into<String>) -> NodeSchemaBuilder {
        NodeSchemaBuilder {
            label: label.into(),
            properties: BTreeMap::new(),
            extra_node_labels: Vec::new(),
            sub_resource_relationship: None,
            other_relationships: Vec::new(),
            scoped_cleanup: true,
            cascade_delete: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyRef> {
        &self.properties
    }

    /// The ref populating the node's `id`; guaranteed present by the builder.
    pub fn id_ref(&self) -> Option<&PropertyRef> {
        self.properties.get("id")
    }

    pub fn extra_node_labels(&self) -> &[String] {
        &self.extra_node_labels
    }

    pub fn sub_resource_relationship(&self) -> Option<&RelSchema> {
        self.sub_resource_relationship.as_ref()
    }

    pub fn other_relationships(&self) -> &[RelSchema] {
        &self.other_relationships
    }

    /// Whether cleanup is bounded to the sub-resource scope (default) or
    /// global. Global cleanup is for node types with no tenant-like owner.
    pub fn scoped_cleanup(&self) -> bool {
        self.scoped_cleanup
    }

    /// Whether deleting a stale node also deletes its exclusively-owned
    /// children one hop down the ownership relationship.
    pub fn cascade_delete(&self) -> bool {
        self.cascade_delete
    }
}

/// Builder for [`NodeSchema`]. Validation happens in [`NodeSchemaBuilder::build`].
#[derive(Debug, Clone)]
pub struct NodeSchemaBuilder {
    label: String,
    properties: BTreeMap<String, PropertyRef>,
    extra_node_labels: Vec<String>,
    sub_resource_relationship: Option<RelSchema>,
    other_relationships: Vec<RelSchema>,
    scoped_cleanup: bool,
    cascade_delete: bool,
}

impl NodeSchemaBuilder {
    pub fn property(mut self, key: impl Into<String>, prop: PropertyRef) -> Self {
        self.properties.insert(key.into(), prop);
        self
    }

    /// Additional labels stamped on the same physical node.
    pub fn extra_label(mut self, label: impl Into<String>) -> Self {
        self.extra_node_labels.push(label.into());
        self
    }

    /// The single required relationship to the scope node (account, tenant,
    /// project) that owns every node of this type.
    pub fn sub_resource(mut self, rel: RelSchema) -> Self {
        self.sub_resource_relationship = Some(rel);
        self
    }

    pub fn other_relationship(mut self, rel: RelSchema) -> Self {
        self.other_relationships.push(rel);
        self
    }

    /// Allow cleanup to delete stale nodes of this type globally. Only valid
    /// for node types without a sub-resource relationship.
    pub fn unscoped_cleanup(mut self) -> Self {
        self.scoped_cleanup = false;
        self
    }

    /// Delete exclusively-owned children together with a stale parent.
    pub fn cascade_delete(mut self) -> Self {
        self.cascade_delete = true;
        self
    }

    pub fn build(self) -> Result<NodeSchema, SchemaError> {
        for required in ["id", "lastupdated"] {
            if !self.properties.contains_key(required) {
                return Err(SchemaError::MissingNodeProperty {
                    label: self.label.clone(),
                    property: required.to_string(),
                });
            }
        }
        if self.properties.contains_key("firstseen") {
            return Err(SchemaError::ReservedProperty { label: self.label });
        }
        for prop in self.properties.values() {
            prop.validate()?;
        }
        if self.sub_resource_relationship.is_some() && !self.scoped_cleanup {
            return Err(SchemaError::UnscopedWithSubResource { label: self.label });
        }
        Ok(NodeSchema {
            label: self.label,
            properties: self.properties,
            extra_node_labels: self.extra_node_labels,
            sub_resource_relationship: self.sub_resource_relationship,
            other_relationships: self.other_relationships,
            scoped_cleanup: self.scoped_cleanup,
            cascade_delete: self.cascade_delete,
        })
    }
}
