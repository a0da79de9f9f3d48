//! Physical cursor contract and the buffered implementation

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::{BatchError, ColumnMeta, Result, Value};

/// A provider-level, forward-only cursor over a multi-result-set response.
///
/// After execution the cursor is positioned on the first result set (if the
/// response has one). `read` advances within the current result set,
/// `next_result` skips whatever is left of it and moves to the next one.
///
/// Statement-completion row counts are reported in arrival order and each
/// count is handed out exactly once by `take_statement_counts`.
#[async_trait]
pub trait ResultCursor: Send {
    /// Columns of the current result set, empty once the cursor is exhausted
    fn columns(&self) -> &[ColumnMeta];

    /// Advance to the next row of the current result set
    async fn read(&mut self) -> Result<bool>;

    /// Advance to the next result set
    async fn next_result(&mut self) -> Result<bool>;

    /// Value of a column in the current row
    fn value(&self, ordinal: usize) -> Result<&Value>;

    /// Row counts of statements completed since the last call
    fn take_statement_counts(&mut self) -> Vec<u64>;
}

/// One element of a recorded response stream
#[derive(Debug, Clone, PartialEq)]
pub enum CursorItem {
    /// Start of a result set
    ResultSet(Vec<ColumnMeta>),
    /// A row of the current result set
    Row(Vec<Value>),
    /// A statement completed, affecting the given number of rows
    StatementCompleted(u64),
    /// The server reported an error; nothing after it is delivered
    Error(String),
}

/// A cursor over a response that has already been received in full.
///
/// Errors keep their position in the stream: everything recorded before an
/// error is readable, and the error surfaces when the consumer reaches it.
#[derive(Debug)]
pub struct BufferedCursor {
    items: VecDeque<CursorItem>,
    columns: Vec<ColumnMeta>,
    row: Option<Vec<Value>>,
    counts: Vec<u64>,
}

impl BufferedCursor {
    /// Position a new cursor on the first result set of `items`.
    ///
    /// Returns the recorded error if the server failed before producing any
    /// result set.
    pub fn new(items: impl IntoIterator<Item = CursorItem>) -> Result<Self> {
        let mut cursor = Self {
            items: items.into_iter().collect(),
            columns: Vec::new(),
            row: None,
            counts: Vec::new(),
        };
        cursor.advance_to_result_set()?;
        Ok(cursor)
    }

    /// Number of items not yet consumed
    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    fn advance_to_result_set(&mut self) -> Result<bool> {
        self.row = None;
        while let Some(item) = self.items.pop_front() {
            match item {
                CursorItem::ResultSet(columns) => {
                    self.columns = columns;
                    return Ok(true);
                }
                CursorItem::Row(_) => {}
                CursorItem::StatementCompleted(rows) => self.counts.push(rows),
                CursorItem::Error(message) => {
                    self.columns.clear();
                    self.items.clear();
                    return Err(BatchError::Driver(message));
                }
            }
        }
        self.columns.clear();
        Ok(false)
    }
}

#[async_trait]
impl ResultCursor for BufferedCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    async fn read(&mut self) -> Result<bool> {
        self.row = None;
        if self.columns.is_empty() {
            return Ok(false);
        }
        loop {
            match self.items.front() {
                Some(CursorItem::Row(_)) => {
                    if let Some(CursorItem::Row(values)) = self.items.pop_front() {
                        self.row = Some(values);
                    }
                    return Ok(true);
                }
                Some(CursorItem::StatementCompleted(rows)) => {
                    self.counts.push(*rows);
                    self.items.pop_front();
                }
                Some(CursorItem::Error(_)) => {
                    if let Some(CursorItem::Error(message)) = self.items.pop_front() {
                        self.items.clear();
                        return Err(BatchError::Driver(message));
                    }
                }
                Some(CursorItem::ResultSet(_)) | None => return Ok(false),
            }
        }
    }

    async fn next_result(&mut self) -> Result<bool> {
        if self.columns.is_empty() && self.items.is_empty() {
            return Ok(false);
        }
        self.advance_to_result_set()
    }

    fn value(&self, ordinal: usize) -> Result<&Value> {
        let row = self
            .row
            .as_ref()
            .ok_or_else(|| BatchError::InvalidOperation("no current row".into()))?;
        row.get(ordinal).ok_or_else(|| {
            BatchError::InvalidOperation(format!(
                "column ordinal {} is out of range ({} columns)",
                ordinal,
                row.len()
            ))
        })
    }

    fn take_statement_counts(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.counts)
    }
}
