//! Forward-only reader over one command's slice of the result stream

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use procbatch_core::{BatchError, ColumnMeta, FromValue, Result, ResultCursor, SqlType, Value};
use uuid::Uuid;

use crate::behavior::CommandBehavior;
use crate::constants::{END_MARKER_COLUMN, OUTPUT_MARKER_COLUMN};
use crate::parameters::OutputToken;
use crate::xml::XmlDocument;

/// Lifecycle of a [`BatchReader`]; it only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ReaderState {
    Open = 0,
    Finished = 1,
    Closed = 2,
}

impl ReaderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Finished,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn load(&self) -> ReaderState {
        ReaderState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` unless the state is already there or beyond
    fn advance(&self, to: ReaderState) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current >= to as u8 {
                return false;
            }
            match self
                .0
                .compare_exchange(current, to as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Closes a reader from outside the task that drives it
#[derive(Debug, Clone)]
pub struct ReaderCloseHandle {
    state: Arc<StateCell>,
}

impl ReaderCloseHandle {
    pub fn close(&self) {
        self.state.advance(ReaderState::Closed);
    }

    pub fn state(&self) -> ReaderState {
        self.state.load()
    }
}

enum MarkerKind {
    Data,
    Output,
    End,
}

fn marker_kind(columns: &[ColumnMeta]) -> MarkerKind {
    match columns.first().map(|c| c.name.as_str()) {
        Some(OUTPUT_MARKER_COLUMN) => MarkerKind::Output,
        Some(END_MARKER_COLUMN) if columns.len() == 1 => MarkerKind::End,
        _ => MarkerKind::Data,
    }
}

/// What the batch keeps after a command's slice has been consumed
pub(crate) struct ReaderResidue {
    pub cursor: Box<dyn ResultCursor>,
    pub captured: Vec<(OutputToken, Value)>,
    pub records_affected: u64,
}

/// A view of the physical cursor restricted to one command's results.
///
/// Marker result sets never reach the consumer. The reader enforces the
/// command's single-row, single-result and schema-only restrictions, and once
/// the slice ends it reports `Finished`.
pub struct BatchReader {
    cursor: Box<dyn ResultCursor>,
    state: Arc<StateCell>,
    behavior: CommandBehavior,
    skip_remaining: bool,
    command_index: usize,
    outputs: Vec<OutputToken>,
    captured: Vec<(OutputToken, Value)>,
    records_affected: u64,
    slice_ended: bool,
}

impl BatchReader {
    /// Wrap `cursor`, positioned at the start of command `index`'s slice
    pub(crate) async fn begin(
        cursor: Box<dyn ResultCursor>,
        behavior: CommandBehavior,
        index: usize,
        outputs: Vec<OutputToken>,
    ) -> Result<Self> {
        let mut reader = Self {
            cursor,
            state: Arc::new(StateCell(AtomicU8::new(ReaderState::Open as u8))),
            behavior: behavior & CommandBehavior::READER_RESTRICTIONS,
            skip_remaining: false,
            command_index: index,
            outputs,
            captured: Vec::new(),
            records_affected: 0,
            slice_ended: false,
        };
        reader.settle().await?;
        Ok(reader)
    }

    pub fn state(&self) -> ReaderState {
        self.state.load()
    }

    pub fn close_handle(&self) -> ReaderCloseHandle {
        ReaderCloseHandle {
            state: self.state.clone(),
        }
    }

    /// Close the reader; every later call fails
    pub fn close(&self) {
        if self.state.advance(ReaderState::Closed) {
            tracing::trace!(command = self.command_index, "reader closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ReaderState::Closed
    }

    pub fn behavior(&self) -> CommandBehavior {
        self.behavior
    }

    /// Sum of the statement-completion counts seen in this slice so far
    pub fn records_affected(&self) -> u64 {
        self.records_affected
    }

    /// Advance to the next row of the current result set
    pub async fn read(&mut self) -> Result<bool> {
        match self.state() {
            ReaderState::Closed => return Err(BatchError::ReaderClosed { member: "read" }),
            ReaderState::Finished => return Ok(false),
            ReaderState::Open => {}
        }
        if self.skip_remaining || self.behavior.contains(CommandBehavior::SCHEMA_ONLY) {
            return Ok(false);
        }

        let has_row = self.cursor.read().await?;
        self.collect_counts();
        if has_row && self.behavior.is_single_row() {
            self.skip_remaining = true;
        }
        Ok(has_row)
    }

    /// Advance to the next result set of this command
    pub async fn next_result(&mut self) -> Result<bool> {
        match self.state() {
            ReaderState::Closed => {
                return Err(BatchError::ReaderClosed {
                    member: "next_result",
                });
            }
            ReaderState::Finished => return Ok(false),
            ReaderState::Open => {}
        }
        // Restricted readers stay on their current result set
        if self.skip_remaining || self.behavior.is_single_result() {
            return Ok(false);
        }

        self.advance().await?;
        Ok(!self.slice_ended)
    }

    /// Consume every remaining result set of the slice, ignoring row and
    /// result restrictions
    pub async fn drain(&mut self) -> Result<()> {
        if self.is_closed() {
            return Err(BatchError::ReaderClosed { member: "drain" });
        }
        while !self.slice_ended && self.state() == ReaderState::Open {
            self.advance().await?;
        }
        Ok(())
    }

    /// Columns of the current result set
    pub fn columns(&self) -> Result<&[ColumnMeta]> {
        self.ensure_open("columns")?;
        Ok(self.cursor.columns())
    }

    pub fn field_count(&self) -> Result<usize> {
        self.ensure_open("field_count")?;
        Ok(self.cursor.columns().len())
    }

    /// Ordinal of the column called `name`, compared case-insensitively
    pub fn get_ordinal(&self, name: &str) -> Result<usize> {
        self.ensure_open("get_ordinal")?;
        self.cursor
            .columns()
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| BatchError::InvalidOperation(format!("no column named {}", name)))
    }

    pub fn get_value(&self, ordinal: usize) -> Result<&Value> {
        self.ensure_open("get_value")?;
        self.cursor.value(ordinal)
    }

    /// Value of a column converted to `T`
    pub fn get<T: FromValue>(&self, ordinal: usize) -> Result<T> {
        self.ensure_open("get")?;
        T::from_value(self.cursor.value(ordinal)?)
    }

    pub fn is_null(&self, ordinal: usize) -> Result<bool> {
        self.ensure_open("is_null")?;
        Ok(self.cursor.value(ordinal)?.is_null())
    }

    pub fn get_i32(&self, ordinal: usize) -> Result<i32> {
        self.get(ordinal)
    }

    pub fn get_i64(&self, ordinal: usize) -> Result<i64> {
        self.get(ordinal)
    }

    pub fn get_f64(&self, ordinal: usize) -> Result<f64> {
        self.get(ordinal)
    }

    pub fn get_bool(&self, ordinal: usize) -> Result<bool> {
        self.get(ordinal)
    }

    pub fn get_string(&self, ordinal: usize) -> Result<String> {
        self.get(ordinal)
    }

    pub fn get_uuid(&self, ordinal: usize) -> Result<Uuid> {
        self.get(ordinal)
    }

    /// The current result set as XML.
    ///
    /// It must have exactly one column. A text-like column is read to the end
    /// and its rows concatenated into a fragment; an XML column yields the
    /// value of its single row, or an empty document when there is no row.
    pub async fn xml(&mut self) -> Result<XmlDocument> {
        let columns = self.columns()?;
        if columns.len() != 1 {
            return Err(BatchError::InvalidOperation(format!(
                "an XML result must have exactly one column, found {}",
                columns.len()
            )));
        }
        let sql_type = columns[0].sql_type;

        if sql_type == SqlType::Xml {
            if !self.read().await? {
                return Ok(XmlDocument::empty());
            }
            let value = self.cursor.value(0)?;
            return Ok(match value.as_str() {
                Some(text) => XmlDocument::document(text),
                None if value.is_null() => XmlDocument::empty(),
                None => {
                    return Err(BatchError::InvalidOperation(format!(
                        "expected XML text, found {}",
                        value.kind()
                    )));
                }
            });
        }

        if sql_type.is_text_like() {
            let mut text = String::new();
            while self.read().await? {
                if let Some(chunk) = self.cursor.value(0)?.as_str() {
                    text.push_str(chunk);
                }
            }
            return Ok(XmlDocument::fragment(text));
        }

        Err(BatchError::InvalidOperation(format!(
            "an XML result must be a text or XML column, found {}",
            sql_type
        )))
    }

    /// Consume the rest of the slice regardless of state, handing back the
    /// cursor positioned on the end marker
    pub(crate) async fn finish(mut self) -> Result<ReaderResidue> {
        while !self.slice_ended {
            self.advance().await?;
        }
        self.mark_finished();
        Ok(ReaderResidue {
            cursor: self.cursor,
            captured: self.captured,
            records_affected: self.records_affected,
        })
    }

    fn ensure_open(&self, member: &'static str) -> Result<()> {
        match self.state() {
            ReaderState::Open => Ok(()),
            ReaderState::Finished => Err(BatchError::ReaderFinished { member }),
            ReaderState::Closed => Err(BatchError::ReaderClosed { member }),
        }
    }

    fn mark_finished(&self) {
        if self.state.advance(ReaderState::Finished) {
            tracing::trace!(command = self.command_index, "reader finished");
        }
    }

    fn collect_counts(&mut self) {
        self.records_affected += self.cursor.take_statement_counts().iter().sum::<u64>();
    }

    async fn advance(&mut self) -> Result<()> {
        self.cursor.next_result().await?;
        self.settle().await
    }

    /// Move off marker result sets until a data set or the end marker
    async fn settle(&mut self) -> Result<()> {
        loop {
            self.collect_counts();
            if self.cursor.columns().is_empty() {
                return Err(self.out_of_sync("the stream ended before the end of the command"));
            }
            match marker_kind(self.cursor.columns()) {
                MarkerKind::Data => return Ok(()),
                MarkerKind::Output => {
                    self.capture_outputs().await?;
                    self.cursor.next_result().await?;
                }
                MarkerKind::End => {
                    if !self.cursor.read().await? {
                        return Err(self.out_of_sync("the end marker has no row"));
                    }
                    let index = self.cursor.value(0)?.as_i64();
                    if index != Some(self.command_index as i64) {
                        return Err(self.out_of_sync(&format!(
                            "found the end marker of command {:?}",
                            index
                        )));
                    }
                    self.collect_counts();
                    self.slice_ended = true;
                    self.mark_finished();
                    return Ok(());
                }
            }
        }
    }

    async fn capture_outputs(&mut self) -> Result<()> {
        if !self.cursor.read().await? {
            return Err(self.out_of_sync("the output marker has no row"));
        }
        let index = self.cursor.value(0)?.as_i64();
        if index != Some(self.command_index as i64) {
            return Err(self.out_of_sync(&format!(
                "found the output marker of command {:?}",
                index
            )));
        }
        for (position, token) in self.outputs.iter().enumerate() {
            let value = self.cursor.value(position + 1)?.clone();
            self.captured.push((*token, value));
        }
        Ok(())
    }

    fn out_of_sync(&self, detail: &str) -> BatchError {
        BatchError::InvalidOperation(format!(
            "result stream out of sync at command {}: {}",
            self.command_index, detail
        ))
    }
}

impl std::fmt::Debug for BatchReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchReader")
            .field("command_index", &self.command_index)
            .field("state", &self.state())
            .field("behavior", &self.behavior)
            .field("skip_remaining", &self.skip_remaining)
            .field("records_affected", &self.records_affected)
            .finish()
    }
}
