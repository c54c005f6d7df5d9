//! Neo4j connection management and the shared graph client.

use neo4rs::{ConfigBuilder, Graph, Query};

use surveyor_core::config::GraphSettings;
use surveyor_core::error::SchemaError;

/// Errors from the graph engine.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run parameter '{0}' is required but was not provided")]
    MissingParameter(String),

    #[error("index creation failed after {attempts} attempts: {source}")]
    IndexCreation {
        attempts: u32,
        #[source]
        source: neo4rs::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Thread-safe Neo4j client with connection pooling.
///
/// The engine never constructs, pools, or closes connections on its own:
/// callers build one of these from [`GraphSettings`] and pass it in.
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given settings.
    pub async fn connect(settings: &GraphSettings) -> Result<Self, GraphError> {
        let mut builder = ConfigBuilder::default()
            .uri(&settings.uri)
            .user(&settings.user)
            .password(&settings.password)
            .max_connections(settings.max_connections as usize)
            .fetch_size(settings.fetch_size);
        if let Some(database) = &settings.database {
            builder = builder.db(database.as_str());
        }
        let neo_config = builder
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(uri = %settings.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph for direct operations.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }

    /// Execute a write query in autocommit mode (required for index DDL).
    pub async fn run(&self, query: Query) -> Result<(), GraphError> {
        self.graph.run(query).await?;
        Ok(())
    }

    /// Execute a query and collect all rows.
    pub async fn query_rows(&self, query: Query) -> Result<Vec<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute a query and return the first row, if any.
    pub async fn query_one(&self, query: Query) -> Result<Option<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        Ok(stream.next().await?)
    }

    /// Begin an explicit write transaction.
    pub async fn start_txn(&self) -> Result<neo4rs::Txn, GraphError> {
        Ok(self.graph.start_txn().await?)
    }
}

/// Whether a store error is worth retrying.
///
/// Classified on the rendered message rather than driver variants: the
/// retryable surface (routing errors, dropped connections, server-side
/// transient codes) spans several variants and changes across driver
/// versions, while the code strings are stable Neo4j API.
pub(crate) fn is_transient_error(err: &neo4rs::Error) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    [
        "serviceunavailable",
        "service unavailable",
        "sessionexpired",
        "session expired",
        "transient",
        "connection reset",
        "connection refused",
        "broken pipe",
        "timed out",
    ]
    .iter()
    .any(|needle| msg.contains(needle))
}
