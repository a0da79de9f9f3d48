//! BatchExecutor over tiberius connections

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use procbatch::{BatchExecutor, BatchTarget, ExecuteRequest, ServerVersion};
use procbatch_core::{BatchError, BufferedCursor, Result, ResultCursor};

use crate::connection::MssqlConnection;

/// Executes batches on one connection per connection string.
///
/// tiberius' query stream does not surface statement row counts, so every
/// command sees zero affected rows: `SqlBatch::add_non_query` results are
/// always `0` through this executor. Return a count from the procedure
/// (an output parameter or a `SELECT @@ROWCOUNT`) when the number matters.
#[derive(Debug, Default)]
pub struct MssqlExecutor {
    connections: HashMap<String, Arc<MssqlConnection>>,
}

impl MssqlExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection for every distinct connection string of `targets`
    pub async fn connect(targets: &[BatchTarget]) -> Result<Self> {
        let mut executor = Self::new();
        for target in targets {
            if executor.connections.contains_key(&target.connection_string) {
                continue;
            }
            let connection = MssqlConnection::connect(&target.connection_string).await?;
            executor.insert(target.connection_string.clone(), Arc::new(connection));
        }
        Ok(executor)
    }

    /// Use `connection` for targets with `connection_string`
    pub fn insert(&mut self, connection_string: impl Into<String>, connection: Arc<MssqlConnection>) {
        self.connections.insert(connection_string.into(), connection);
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn connection(&self, target: &BatchTarget) -> Result<&Arc<MssqlConnection>> {
        self.connections
            .get(&target.connection_string)
            .ok_or_else(|| BatchError::Driver(format!("no connection for target {}", target)))
    }
}

#[async_trait]
impl BatchExecutor for MssqlExecutor {
    fn server_version(&self, target: &BatchTarget) -> Option<ServerVersion> {
        self.connections
            .get(&target.connection_string)
            .map(|c| c.server_version())
    }

    async fn execute(&self, request: ExecuteRequest<'_>) -> Result<Box<dyn ResultCursor>> {
        let connection = self.connection(request.target)?;
        tracing::trace!(
            target = %request.target,
            behavior = ?request.behavior,
            "sending batch to MS SQL Server"
        );
        let items = connection
            .run_batch(request.sql, request.parameters)
            .await?;
        Ok(Box::new(BufferedCursor::new(items)?))
    }
}
