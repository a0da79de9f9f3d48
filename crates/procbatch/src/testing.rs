//! In-memory executor and response scripts for tests and dry runs

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use procbatch_core::{
    BatchError, BufferedCursor, ColumnMeta, CursorItem, Result, ResultCursor, SqlType, Value,
};

use crate::constants::{END_MARKER_COLUMN, OUTPUT_MARKER_COLUMN};
use crate::executor::{BatchExecutor, ExecuteRequest};
use crate::parameters::BoundParameter;
use crate::program::BatchTarget;
use crate::version::ServerVersion;

/// Shorthand for a column at an unspecified ordinal
pub fn column(name: &str, sql_type: SqlType) -> ColumnMeta {
    ColumnMeta::new(name, sql_type, 0)
}

/// Builds the response a server would send for a batch, command by command
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    items: Vec<CursorItem>,
    command: usize,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A result set with its rows
    pub fn result_set(mut self, columns: Vec<ColumnMeta>, rows: Vec<Vec<Value>>) -> Self {
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(ordinal, column)| ColumnMeta { ordinal, ..column })
            .collect();
        self.items.push(CursorItem::ResultSet(columns));
        self.items.extend(rows.into_iter().map(CursorItem::Row));
        self
    }

    /// A statement that affected `rows` rows
    pub fn statement_completed(mut self, rows: u64) -> Self {
        self.items.push(CursorItem::StatementCompleted(rows));
        self
    }

    /// The output marker of the current command
    pub fn outputs(mut self, values: Vec<Value>) -> Self {
        let mut columns = vec![ColumnMeta::new(OUTPUT_MARKER_COLUMN, SqlType::Int, 0)];
        columns.extend(
            (0..values.len()).map(|i| ColumnMeta::new(format!("@out{}", i), SqlType::Variant, i + 1)),
        );
        let mut row = vec![Value::Int32(self.command as i32)];
        row.extend(values);
        self.items.push(CursorItem::ResultSet(columns));
        self.items.push(CursorItem::Row(row));
        self
    }

    /// The end marker of the current command; moves on to the next one
    pub fn end_command(mut self) -> Self {
        self.items.push(CursorItem::ResultSet(vec![ColumnMeta::new(
            END_MARKER_COLUMN,
            SqlType::Int,
            0,
        )]));
        self.items
            .push(CursorItem::Row(vec![Value::Int32(self.command as i32)]));
        self.command += 1;
        self
    }

    /// A server error; nothing after it is delivered
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.items.push(CursorItem::Error(message.into()));
        self
    }

    pub fn build(self) -> Vec<CursorItem> {
        self.items
    }
}

#[derive(Debug, Clone)]
enum Response {
    Script(Vec<CursorItem>),
    Fail(String),
    Hang,
}

/// A recorded [`ExecuteRequest`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub target: BatchTarget,
    pub sql: String,
    pub parameters: Vec<BoundParameter>,
}

/// Answers each target with a prepared response and records what was sent
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    responses: HashMap<String, Response>,
    versions: HashMap<String, ServerVersion>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to `connection_string` with `items`
    pub fn with_script(mut self, connection_string: &str, items: Vec<CursorItem>) -> Self {
        self.responses
            .insert(connection_string.to_string(), Response::Script(items));
        self
    }

    /// Fail execution on `connection_string`
    pub fn with_failure(mut self, connection_string: &str, message: impl Into<String>) -> Self {
        self.responses
            .insert(connection_string.to_string(), Response::Fail(message.into()));
        self
    }

    /// Never answer on `connection_string`
    pub fn with_hang(mut self, connection_string: &str) -> Self {
        self.responses
            .insert(connection_string.to_string(), Response::Hang);
        self
    }

    pub fn with_server_version(mut self, connection_string: &str, version: ServerVersion) -> Self {
        self.versions.insert(connection_string.to_string(), version);
        self
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl BatchExecutor for ScriptedExecutor {
    fn server_version(&self, target: &BatchTarget) -> Option<ServerVersion> {
        self.versions.get(&target.connection_string).copied()
    }

    async fn execute(&self, request: ExecuteRequest<'_>) -> Result<Box<dyn ResultCursor>> {
        self.requests.lock().push(RecordedRequest {
            target: request.target.clone(),
            sql: request.sql.to_string(),
            parameters: request.parameters.to_vec(),
        });

        match self.responses.get(&request.target.connection_string) {
            Some(Response::Script(items)) => Ok(Box::new(BufferedCursor::new(items.clone())?)),
            Some(Response::Fail(message)) => Err(BatchError::Driver(message.clone())),
            Some(Response::Hang) => std::future::pending().await,
            None => Err(BatchError::Driver(format!(
                "no script for {}",
                request.target.connection_string
            ))),
        }
    }
}
