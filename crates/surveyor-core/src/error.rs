//! Error types for the surveyor-core crate.

use thiserror::Error;

/// Schema definition and validation errors.
///
/// These are all configuration mistakes: they surface synchronously when a
/// schema is built or compiled, before any store I/O happens.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("node schema '{label}' must declare an '{property}' property")]
    MissingNodeProperty { label: String, property: String },

    #[error("relationship '{rel_label}' must declare a 'lastupdated' property")]
    MissingRelProperty { rel_label: String },

    #[error(
        "'firstseen' is reserved on '{label}': it is stamped automatically on create \
         and cannot be declared in a schema"
    )]
    ReservedProperty { label: String },

    #[error(
        "property ref '{name}': one_to_many cannot be combined with ignore_case \
         or fuzzy_and_ignore_case"
    )]
    OneToManyConflict { name: String },

    #[error("property ref '{name}': ignore_case and fuzzy_and_ignore_case are mutually exclusive")]
    CaseFlagConflict { name: String },

    #[error("node matcher for '{label}' must contain at least one key")]
    EmptyMatcher { label: String },

    #[error(
        "relationship '{rel_label}' is used as a matchlink but has no source node \
         label/matcher defined"
    )]
    MissingSourceMatcher { rel_label: String },

    #[error(
        "matchlink '{rel_label}' properties must include '{property}' as a run-parameter \
         ref; it is required to scope cleanup"
    )]
    MissingScopeProperty { rel_label: String, property: String },

    #[error(
        "sub-resource matcher key '{key}' on '{label}' must be a run-parameter ref \
         (set_in_kwargs) so cleanup jobs can inject the scope id"
    )]
    SubResourceMatcherNotKwarg { label: String, key: String },

    #[error(
        "node schema '{label}' has a sub_resource_relationship but scoped_cleanup=false; \
         unscoped cleanup of a scoped node type would delete other scopes' data"
    )]
    UnscopedWithSubResource { label: String },
}

/// Top-level error type for surveyor-core.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
