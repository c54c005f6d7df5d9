//! Shared run parameters for one sync of one entity type.
//!
//! The original "kwargs bag" is a typed struct here: the freshness tag and
//! the cleanup scope are first-class fields, everything vendor-specific goes
//! into `extras`. The load orchestrator validates at its boundary that every
//! run-parameter ref a schema declares can actually be resolved from this
//! struct before any query runs.

use std::collections::BTreeMap;

use serde_json::Value;

/// Run-parameter name of the freshness tag.
pub const PARAM_LASTUPDATED: &str = "lastupdated";
/// Run-parameter name of the cleanup scope label (matchlink loads).
pub const PARAM_SUB_RESOURCE_LABEL: &str = "_sub_resource_label";
/// Run-parameter name of the cleanup scope id (matchlink loads).
pub const PARAM_SUB_RESOURCE_ID: &str = "_sub_resource_id";

/// Parameters shared by every record of a single load or cleanup run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunParams {
    lastupdated: i64,
    sub_resource_label: Option<String>,
    sub_resource_id: Option<String>,
    extras: BTreeMap<String, Value>,
}

impl RunParams {
    /// Parameters for a run stamped with the given freshness tag.
    pub fn new(lastupdated: i64) -> Self {
        Self {
            lastupdated,
            sub_resource_label: None,
            sub_resource_id: None,
            extras: BTreeMap::new(),
        }
    }

    /// Attach the scope (e.g. account label and id) that bounds cleanup.
    /// Mandatory for matchlink loads.
    pub fn with_scope(mut self, label: impl Into<String>, id: impl Into<String>) -> Self {
        self.sub_resource_label = Some(label.into());
        self.sub_resource_id = Some(id.into());
        self
    }

    /// Attach a vendor-specific parameter (e.g. `AccountId`, `Region`).
    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(name.into(), value.into());
        self
    }

    pub fn lastupdated(&self) -> i64 {
        self.lastupdated
    }

    /// The cleanup scope, if one was attached.
    pub fn scope(&self) -> Option<(&str, &str)> {
        match (&self.sub_resource_label, &self.sub_resource_id) {
            (Some(label), Some(id)) => Some((label.as_str(), id.as_str())),
            _ => None,
        }
    }

    /// Resolve a run-parameter name the way generated queries see it.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        match name {
            PARAM_LASTUPDATED => Some(Value::from(self.lastupdated)),
            PARAM_SUB_RESOURCE_LABEL => {
                self.sub_resource_label.as_deref().map(Value::from)
            }
            PARAM_SUB_RESOURCE_ID => self.sub_resource_id.as_deref().map(Value::from),
            other => self.extras.get(other).cloned(),
        }
    }

    /// Flatten into a query parameter map.
    pub fn to_query_params(&self) -> BTreeMap<String, Value> {
        let mut params = self.extras.clone();
        params.insert(PARAM_LASTUPDATED.to_string(), Value::from(self.lastupdated));
        if let Some((label, id)) = self.scope() {
            params.insert(PARAM_SUB_RESOURCE_LABEL.to_string(), Value::from(label));
            params.insert(PARAM_SUB_RESOURCE_ID.to_string(), Value::from(id));
        }
        params
    }
}
