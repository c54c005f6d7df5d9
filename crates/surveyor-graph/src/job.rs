//! Named sequences of statements, typically cleanup.
//!
//! A job runs its statements strictly in order and stops on the first
//! failure. Order is a contract: cleanup relies on deleting dependent edges
//! before dependent nodes and children before parents, so a job must never
//! reorder or parallelize its statements.

use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use surveyor_core::params::{PARAM_SUB_RESOURCE_ID, PARAM_SUB_RESOURCE_LABEL};
use surveyor_core::schema::{NodeSchema, RelSchema};
use surveyor_core::RunParams;

use crate::cleanupbuilder::{build_cleanup_queries, build_matchlink_cleanup_query};
use crate::client::{GraphClient, GraphError};
use crate::statement::{GraphStatement, DEFAULT_ITERATION_SIZE};

/// Parameter name of the freshness tag in cleanup statements.
pub const UPDATE_TAG_PARAM: &str = "UPDATE_TAG";

#[derive(Deserialize)]
struct JobFile {
    name: String,
    statements: Vec<GraphStatement>,
}

/// An ordered list of statements executed as one named unit of work.
#[derive(Debug, Clone)]
pub struct GraphJob {
    /// E.g. "Cleanup Instance".
    pub name: String,
    /// Compact name for log lines, e.g. the schema label or job file stem.
    pub short_name: Option<String>,
    statements: Vec<GraphStatement>,
}

impl GraphJob {
    pub fn new(name: impl Into<String>, statements: Vec<GraphStatement>) -> Self {
        Self {
            name: name.into(),
            short_name: None,
            statements,
        }
    }

    /// The cleanup job for a node schema: compiled delete queries, in
    /// compiler order, with the run's parameters bound to each statement.
    pub fn from_node_schema(schema: &NodeSchema, params: &RunParams) -> Result<Self, GraphError> {
        let queries = build_cleanup_queries(schema)?;

        let mut parameters = params.to_query_params();
        parameters.insert(UPDATE_TAG_PARAM.to_string(), Value::from(params.lastupdated()));
        let parameters: Map<String, Value> = parameters.into_iter().collect();

        let statements = queries
            .into_iter()
            .map(|query| {
                GraphStatement::iterative(query, DEFAULT_ITERATION_SIZE)
                    .with_parameters(parameters.clone())
            })
            .collect();

        Ok(Self {
            name: format!("Cleanup {}", schema.label()),
            short_name: Some(schema.label().to_string()),
            statements,
        })
    }

    /// The cleanup job for matchlink edges. The scope must be passed
    /// explicitly; a matchlink has no implicit owner to derive it from.
    pub fn from_matchlink(
        rel: &RelSchema,
        sub_resource_label: &str,
        sub_resource_id: &str,
        update_tag: i64,
    ) -> Result<Self, GraphError> {
        let query = build_matchlink_cleanup_query(rel)?;

        let mut parameters = Map::new();
        parameters.insert(UPDATE_TAG_PARAM.to_string(), Value::from(update_tag));
        parameters.insert(
            PARAM_SUB_RESOURCE_LABEL.to_string(),
            Value::from(sub_resource_label),
        );
        parameters.insert(PARAM_SUB_RESOURCE_ID.to_string(), Value::from(sub_resource_id));

        Ok(Self {
            name: format!("Cleanup {} matchlinks", rel.rel_label()),
            short_name: Some(rel.rel_label().to_string()),
            statements: vec![
                GraphStatement::iterative(query, DEFAULT_ITERATION_SIZE)
                    .with_parameters(parameters),
            ],
        })
    }

    /// Load an externally-authored job from a JSON document.
    pub fn from_json(blob: &str) -> Result<Self, GraphError> {
        let file: JobFile = serde_json::from_str(blob)?;
        Ok(Self {
            name: file.name,
            short_name: None,
            statements: file.statements,
        })
    }

    /// Load an externally-authored job from a JSON file. The file stem
    /// becomes the job's short name.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let path = path.as_ref();
        let blob = std::fs::read_to_string(path)?;
        let mut job = Self::from_json(&blob)?;
        job.short_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());
        Ok(job)
    }

    /// Merge parameters into every statement.
    pub fn merge_parameters(&mut self, parameters: &Map<String, Value>) {
        for statement in &mut self.statements {
            statement.merge_parameters(parameters);
        }
    }

    pub fn statements(&self) -> &[GraphStatement] {
        &self.statements
    }

    /// Execute all statements sequentially, halting on the first failure.
    ///
    /// A failure mid-job leaves the earlier statements applied; that partial
    /// cleanup is accepted and logged under the job's name for operator
    /// follow-up.
    pub async fn run(&self, client: &GraphClient) -> Result<(), GraphError> {
        tracing::debug!(job = %self.name, "starting job");
        for (index, statement) in self.statements.iter().enumerate() {
            if let Err(error) = statement.run(client).await {
                tracing::error!(
                    job = %self.name,
                    statement = index + 1,
                    %error,
                    "job statement failed; remaining statements skipped"
                );
                return Err(error);
            }
        }
        let outcome = self.short_name.as_deref().unwrap_or(&self.name);
        tracing::info!(job = %outcome, statements = self.statements.len(), "finished job");
        Ok(())
    }
}
