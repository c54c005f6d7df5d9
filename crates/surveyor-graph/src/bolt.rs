//! JSON → Bolt parameter conversion.
//!
//! Records and run parameters travel through the engine as `serde_json`
//! values; queries receive them as Bolt parameters, never as interpolated
//! text. This module is the only place that crosses that boundary.

use neo4rs::{BoltList, BoltMap, BoltNull, BoltString, BoltType, Query};
use serde_json::{Map, Value};

/// Convert one JSON value into its Bolt equivalent.
pub(crate) fn json_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull {}),
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.into(),
            None => n.as_f64().unwrap_or_default().into(),
        },
        Value::String(s) => s.clone().into(),
        Value::Array(items) => BoltType::List(BoltList {
            value: items.iter().map(json_to_bolt).collect(),
        }),
        Value::Object(fields) => BoltType::Map(json_map_to_bolt(fields)),
    }
}

/// Convert a JSON object into a Bolt map.
pub(crate) fn json_map_to_bolt(fields: &Map<String, Value>) -> BoltMap {
    BoltMap {
        value: fields
            .iter()
            .map(|(key, value)| (BoltString { value: key.clone() }, json_to_bolt(value)))
            .collect(),
    }
}

/// Convert a batch of records into the Bolt list bound to `$DictList`.
pub(crate) fn records_to_bolt(records: &[Map<String, Value>]) -> BoltType {
    BoltType::List(BoltList {
        value: records
            .iter()
            .map(|record| BoltType::Map(json_map_to_bolt(record)))
            .collect(),
    })
}

/// Bind a set of named JSON parameters onto a query.
pub(crate) fn apply_params<'a, I>(mut query: Query, params: I) -> Query
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    for (name, value) in params {
        query = query.param(name, json_to_bolt(value));
    }
    query
}
