//! A single parameterized statement run against the graph.

use neo4rs::query;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bolt::apply_params;
use crate::client::{GraphClient, GraphError};

/// Parameter name bound to the page size of iterative statements.
pub const LIMIT_SIZE_PARAM: &str = "LIMIT_SIZE";

/// Default page size for iterative (batched delete) statements.
pub const DEFAULT_ITERATION_SIZE: i64 = 10_000;

fn default_iteration_size() -> i64 {
    DEFAULT_ITERATION_SIZE
}

/// One statement of a [`crate::job::GraphJob`]: a query plus its parameters.
///
/// Iterative statements page through their work: the query must limit itself
/// with `$LIMIT_SIZE` and `RETURN` the number of affected rows as `deleted`;
/// it is re-run (each pass in its own transaction) until that count reaches
/// zero. The cleanup compiler emits exactly this shape. Non-iterative
/// statements run once inside a write transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStatement {
    pub query: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub iterative: bool,
    #[serde(default = "default_iteration_size", rename = "iterationsize")]
    pub iteration_size: i64,
}

impl GraphStatement {
    /// A one-shot statement.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: Map::new(),
            iterative: false,
            iteration_size: DEFAULT_ITERATION_SIZE,
        }
    }

    /// An iterative statement paging through `$LIMIT_SIZE`-bounded passes.
    pub fn iterative(query: impl Into<String>, iteration_size: i64) -> Self {
        Self {
            query: query.into(),
            parameters: Map::new(),
            iterative: true,
            iteration_size,
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Merge parameters into the statement; incoming keys win.
    pub fn merge_parameters(&mut self, parameters: &Map<String, Value>) {
        for (key, value) in parameters {
            self.parameters.insert(key.clone(), value.clone());
        }
    }

    /// Execute against the graph.
    pub async fn run(&self, client: &GraphClient) -> Result<(), GraphError> {
        if self.iterative {
            self.run_iterative(client).await
        } else {
            self.run_once(client).await
        }
    }

    async fn run_once(&self, client: &GraphClient) -> Result<(), GraphError> {
        let q = apply_params(query(&self.query), &self.parameters);
        let mut txn = client.start_txn().await?;
        txn.run(q).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Re-run in bounded passes until a pass affects nothing. Each pass is
    /// its own transaction, keeping delete transactions small.
    async fn run_iterative(&self, client: &GraphClient) -> Result<(), GraphError> {
        let mut parameters = self.parameters.clone();
        parameters.insert(LIMIT_SIZE_PARAM.to_string(), Value::from(self.iteration_size));

        let mut total: i64 = 0;
        loop {
            let q = apply_params(query(&self.query), &parameters);
            let deleted = match client.query_one(q).await? {
                Some(row) => row.get::<i64>("deleted").unwrap_or(0),
                // No count column returned; nothing to iterate on.
                None => 0,
            };
            total += deleted;
            if deleted == 0 {
                break;
            }
        }
        tracing::debug!(total, "iterative statement drained");
        Ok(())
    }
}
