//! Pre-load record sanitization.
//!
//! [`clean`] prunes a raw record down to the fields a schema actually
//! ingests and coerces values per each ref's `auto_format`. Connectors call
//! this between the vendor API response and the loader, so one malformed
//! field must never abort a whole sync: a failed coercion falls back to the
//! string rendering of the value. That fallback can mask data-quality
//! problems upstream, so every occurrence is logged and counted in the
//! [`SanitizeReport`] for operators to alert on.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::{AutoFormat, NodeSchema, PropertyRef};

/// Counters describing what a sanitizer pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    /// Fields whose coercion failed and fell back to a string rendering.
    pub fallbacks: u64,
}

/// Clean a raw record against a schema. See [`clean_with_report`].
pub fn clean(schema: &NodeSchema, record: &Map<String, Value>) -> Map<String, Value> {
    clean_with_report(schema, record).0
}

/// Clean a raw record against a schema, reporting coercion fallbacks.
///
/// Keeps only fields some reachable [`PropertyRef`] names (own properties,
/// sub-resource relationship properties and matcher, every other
/// relationship's properties and matcher), excluding run-parameter refs.
/// Dotted refs are grouped by their first path segment and applied to the
/// corresponding nested record, which is kept only if its own cleanup
/// produced a non-empty result.
pub fn clean_with_report(
    schema: &NodeSchema,
    record: &Map<String, Value>,
) -> (Map<String, Value>, SanitizeReport) {
    let refs = collect_property_refs(schema);
    let mut report = SanitizeReport::default();
    let cleaned = clean_map(record, &refs, &mut report);
    (cleaned, report)
}

/// Every record-sourced ref reachable from the schema, keyed by record field name.
fn collect_property_refs(schema: &NodeSchema) -> BTreeMap<String, PropertyRef> {
    let mut refs = BTreeMap::new();
    let mut add = |prop: &PropertyRef| {
        if !prop.set_in_kwargs {
            refs.insert(prop.name.clone(), prop.clone());
        }
    };

    for prop in schema.properties().values() {
        add(prop);
    }
    if let Some(rel) = schema.sub_resource_relationship() {
        for prop in rel.properties().values() {
            add(prop);
        }
        for (_, prop) in rel.target_node_matcher().iter() {
            add(prop);
        }
    }
    for rel in schema.other_relationships() {
        for prop in rel.properties().values() {
            add(prop);
        }
        for (_, prop) in rel.target_node_matcher().iter() {
            add(prop);
        }
    }
    refs
}

fn clean_map(
    data: &Map<String, Value>,
    refs: &BTreeMap<String, PropertyRef>,
    report: &mut SanitizeReport,
) -> Map<String, Value> {
    let mut cleaned = Map::new();
    let mut nested: BTreeMap<&str, BTreeMap<String, PropertyRef>> = BTreeMap::new();

    for (key, prop) in refs {
        match key.split_once('.') {
            None => {
                if let Some(value) = data.get(key) {
                    cleaned.insert(key.clone(), format_field(prop, value, report));
                }
            }
            Some((prefix, suffix)) => {
                if data.get(prefix).is_some_and(|v| !v.is_null()) {
                    nested
                        .entry(prefix)
                        .or_default()
                        .insert(suffix.to_string(), prop.clone());
                }
            }
        }
    }

    for (prefix, suffixes) in nested {
        let Some(Value::Object(sub)) = data.get(prefix) else {
            // A dotted ref pointing into a non-object field; nothing to keep.
            continue;
        };
        let sub_cleaned = clean_map(sub, &suffixes, report);
        if !sub_cleaned.is_empty() {
            cleaned.insert(prefix.to_string(), Value::Object(sub_cleaned));
        }
    }
    cleaned
}

/// Apply `auto_format`, falling back to the string rendering on failure.
fn format_field(prop: &PropertyRef, value: &Value, report: &mut SanitizeReport) -> Value {
    let Some(format) = prop.auto_format else {
        return value.clone();
    };
    if value.is_null() {
        return Value::Null;
    }
    match coerce(format, value) {
        Ok(coerced) => coerced,
        Err(reason) => {
            report.fallbacks += 1;
            tracing::warn!(
                field = %prop.name,
                %reason,
                "coercion failed, storing string rendering"
            );
            Value::String(render_string(value))
        }
    }
}

#[derive(Error, Debug)]
enum CoerceError {
    #[error("'{0}' is not an integer")]
    NotAnInteger(String),
    #[error("'{0}' is not a float")]
    NotAFloat(String),
    #[error("'{0}' is not a boolean")]
    NotABoolean(String),
    #[error("'{0}' is not a recognized datetime")]
    NotADateTime(String),
    #[error("expected a list, got {0}")]
    NotAList(String),
    #[error("expected a map, got {0}")]
    NotAMap(String),
}

fn coerce(format: AutoFormat, value: &Value) -> Result<Value, CoerceError> {
    match format {
        AutoFormat::String => {
            let rendered = render_string(value);
            if rendered.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::String(rendered))
            }
        }
        AutoFormat::Integer => coerce_integer(value),
        AutoFormat::Float => coerce_float(value),
        AutoFormat::Boolean => coerce_boolean(value),
        AutoFormat::DateTime => coerce_datetime(value),
        AutoFormat::List => match value {
            Value::Array(items) if items.is_empty() => Ok(Value::Null),
            Value::Array(_) => Ok(value.clone()),
            other => Err(CoerceError::NotAList(render_string(other))),
        },
        AutoFormat::Dict => match value {
            Value::Object(fields) if fields.is_empty() => Ok(Value::Null),
            Value::Object(_) => Ok(value.clone()),
            other => Err(CoerceError::NotAMap(render_string(other))),
        },
    }
}

fn coerce_integer(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::from(f.trunc() as i64))
            } else {
                Err(CoerceError::NotAnInteger(render_string(value)))
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| CoerceError::NotAnInteger(s.clone())),
        other => Err(CoerceError::NotAnInteger(render_string(other))),
    }
}

fn coerce_float(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) => Ok(Value::from(f)),
            None => Err(CoerceError::NotAFloat(render_string(value))),
        },
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| CoerceError::NotAFloat(s.clone())),
        other => Err(CoerceError::NotAFloat(render_string(other))),
    }
}

fn coerce_boolean(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::from(true)),
            "false" | "0" | "no" => Ok(Value::from(false)),
            _ => Err(CoerceError::NotABoolean(s.clone())),
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(Value::from(false)),
            Some(1) => Ok(Value::from(true)),
            _ => Err(CoerceError::NotABoolean(render_string(value))),
        },
        other => Err(CoerceError::NotABoolean(render_string(other))),
    }
}

/// Normalize to an RFC 3339 string. Accepts unix timestamps (seconds, int or
/// float) and the date-string formats vendor APIs commonly emit.
fn coerce_datetime(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::Number(n) => {
            let parsed = if let Some(i) = n.as_i64() {
                Utc.timestamp_opt(i, 0).single()
            } else {
                n.as_f64().and_then(|f| {
                    Utc.timestamp_opt(f.trunc() as i64, (f.fract() * 1e9) as u32)
                        .single()
                })
            };
            parsed
                .map(|dt| Value::String(dt.to_rfc3339()))
                .ok_or_else(|| CoerceError::NotADateTime(render_string(value)))
        }
        Value::String(s) => parse_datetime_str(s)
            .map(|dt| Value::String(dt.to_rfc3339()))
            .ok_or_else(|| CoerceError::NotADateTime(s.clone())),
        other => Err(CoerceError::NotADateTime(render_string(other))),
    }
}

fn parse_datetime_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Plain rendering for strings, JSON rendering for everything else.
fn render_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LinkDirection, NodeMatcher, RelSchema};
    use serde_json::json;

    fn schema() -> NodeSchema {
        let account = RelSchema::builder("RESOURCE", "CloudAccount")
            .direction(LinkDirection::Inward)
            .target_matcher(NodeMatcher::on("id", PropertyRef::kwarg("AccountId")))
            .property("lastupdated", PropertyRef::kwarg("lastupdated"))
            .build()
            .unwrap();
        let volume = RelSchema::builder("ATTACHED_TO", "Volume")
            .target_matcher(NodeMatcher::on("id", PropertyRef::new("VolumeId")))
            .property("lastupdated", PropertyRef::kwarg("lastupdated"))
            .build()
            .unwrap();
        NodeSchema::builder("Instance")
            .property("id", PropertyRef::new("InstanceId"))
            .property("lastupdated", PropertyRef::kwarg("lastupdated"))
            .property(
                "cpu_count",
                PropertyRef::new("CpuCount").with_auto_format(AutoFormat::Integer),
            )
            .property(
                "public",
                PropertyRef::new("Public").with_auto_format(AutoFormat::Boolean),
            )
            .property(
                "launched",
                PropertyRef::new("LaunchTime").with_auto_format(AutoFormat::DateTime),
            )
            .property(
                "state",
                PropertyRef::new("State.Name").with_auto_format(AutoFormat::String),
            )
            .property(
                "tags",
                PropertyRef::new("Tags").with_auto_format(AutoFormat::List),
            )
            .sub_resource(account)
            .other_relationship(volume)
            .build()
            .unwrap()
    }

    fn as_map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn keeps_schema_fields_and_drops_the_rest() {
        let record = as_map(json!({
            "InstanceId": "i-01",
            "VolumeId": "vol-9",
            "SomethingElse": "dropped",
        }));
        let cleaned = clean(&schema(), &record);
        assert_eq!(cleaned.get("InstanceId"), Some(&Value::from("i-01")));
        // Matcher refs on other relationships are part of the schema.
        assert_eq!(cleaned.get("VolumeId"), Some(&Value::from("vol-9")));
        assert!(!cleaned.contains_key("SomethingElse"));
        // Run-parameter refs never come from the record.
        assert!(!cleaned.contains_key("lastupdated"));
        assert!(!cleaned.contains_key("AccountId"));
    }

    #[test]
    fn numeric_string_becomes_integer() {
        let record = as_map(json!({ "InstanceId": "i-01", "CpuCount": "8" }));
        let (cleaned, report) = clean_with_report(&schema(), &record);
        assert_eq!(cleaned.get("CpuCount"), Some(&Value::from(8)));
        assert_eq!(report.fallbacks, 0);
    }

    #[test]
    fn non_numeric_string_falls_back_and_is_counted() {
        let record = as_map(json!({ "InstanceId": "i-01", "CpuCount": "lots" }));
        let (cleaned, report) = clean_with_report(&schema(), &record);
        // Documented fallback: the original string, not a crash.
        assert_eq!(cleaned.get("CpuCount"), Some(&Value::from("lots")));
        assert_eq!(report.fallbacks, 1);
    }

    #[test]
    fn boolean_coercion_accepts_the_usual_spellings() {
        for (raw, expected) in [
            (json!("True"), true),
            (json!("yes"), true),
            (json!(1), true),
            (json!("0"), false),
            (json!("No"), false),
            (json!(false), false),
        ] {
            let record = as_map(json!({ "Public": raw }));
            let cleaned = clean(&schema(), &record);
            assert_eq!(cleaned.get("Public"), Some(&Value::from(expected)));
        }
    }

    #[test]
    fn unknown_boolean_string_falls_back() {
        let record = as_map(json!({ "Public": "maybe" }));
        let (cleaned, report) = clean_with_report(&schema(), &record);
        assert_eq!(cleaned.get("Public"), Some(&Value::from("maybe")));
        assert_eq!(report.fallbacks, 1);
    }

    #[test]
    fn datetime_accepts_unix_timestamps_and_date_strings() {
        let record = as_map(json!({ "LaunchTime": 1700000000 }));
        let cleaned = clean(&schema(), &record);
        // Cleaned records stay keyed by record field name, not schema key.
        assert!(cleaned.get("launched").is_none());
        let stamp = cleaned.get("LaunchTime").and_then(Value::as_str).unwrap();
        assert!(stamp.starts_with("2023-11-14T"));

        let record = as_map(json!({ "LaunchTime": "2024-03-01" }));
        let cleaned = clean(&schema(), &record);
        let stamp = cleaned.get("LaunchTime").and_then(Value::as_str).unwrap();
        assert!(stamp.starts_with("2024-03-01T00:00:00"));
    }

    #[test]
    fn empty_string_and_empty_list_become_null() {
        let record = as_map(json!({
            "InstanceId": "i-01",
            "State": { "Name": "" },
            "Tags": [],
        }));
        let cleaned = clean(&schema(), &record);
        let state = cleaned.get("State").and_then(Value::as_object).unwrap();
        assert_eq!(state.get("Name"), Some(&Value::Null));
        assert_eq!(cleaned.get("Tags"), Some(&Value::Null));
    }

    #[test]
    fn dotted_refs_recurse_and_prune_empty_subrecords() {
        // Nested record present and matching: kept.
        let record = as_map(json!({ "State": { "Name": "running", "Code": 16 } }));
        let cleaned = clean(&schema(), &record);
        let state = cleaned.get("State").and_then(Value::as_object).unwrap();
        assert_eq!(state.get("Name"), Some(&Value::from("running")));
        assert!(!state.contains_key("Code"));

        // Nested record with nothing the schema wants: dropped entirely.
        let record = as_map(json!({ "State": { "Code": 16 } }));
        let cleaned = clean(&schema(), &record);
        assert!(!cleaned.contains_key("State"));

        // Non-object where the schema expects to recurse: skipped.
        let record = as_map(json!({ "State": "running" }));
        let cleaned = clean(&schema(), &record);
        assert!(!cleaned.contains_key("State"));
    }
}
