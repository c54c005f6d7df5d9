//! Property resolution: where does a property's value come from?
//!
//! Generated queries perform the equivalent lookup inside the store (against
//! the `$DictList` batch and the run parameters); this module is the
//! in-process twin, used by the sanitizer and by the export tee to derive
//! flat events from records without a store round-trip.

use serde_json::{Map, Value};

use crate::params::RunParams;
use crate::schema::PropertyRef;

/// Resolve a property ref against a raw record and the run parameters.
///
/// Run-parameter refs look up the params bag; record refs walk the record
/// through dotted path segments. Any missing segment yields `None`; this
/// never panics on malformed records.
pub fn resolve(prop: &PropertyRef, record: &Map<String, Value>, params: &RunParams) -> Option<Value> {
    if prop.set_in_kwargs {
        return params.lookup(&prop.name);
    }
    resolve_path(record, &prop.name)
}

/// Walk a dotted path (`"a.b.c"`) through nested JSON objects.
pub fn resolve_path(record: &Map<String, Value>, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = record.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}
