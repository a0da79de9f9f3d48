//! The batch owner: builds, sends and splits one batch per target

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use procbatch_core::{BatchError, FromValue, Result, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::behavior::CommandBehavior;
use crate::command::{
    BatchCommand, CommandKind, PendingWrite, pending, row_handler, scalar_handler, with_cancel,
    xml_handler,
};
use crate::config::BatchConfig;
use crate::context::{BatchProcessContext, PreparedBatch};
use crate::executor::{BatchExecutor, ExecuteRequest};
use crate::parameters::{
    DefaultParameterSetBuilder, OutputToken, ParameterCallback, ParameterSetBuilder,
};
use crate::program::{BatchTarget, ProgramResolver};
use crate::reader::BatchReader;
use crate::slot::BatchResultSlot;
use crate::version::ServerVersion;
use crate::xml::XmlDocument;

/// An ordered list of stored-procedure calls sent as one batch per target.
///
/// Commands run in the order they were added. Each `add_*` call returns the
/// slot its results land in, keyed by target ordinal.
///
/// ```ignore
/// let mut batch = SqlBatch::new();
/// let id = batch.declare_output();
/// batch.add_non_query(create.clone(), CommandBehavior::empty(), Some(parameters(move |p| {
///     p.set("name", "widget")?.produce("id", id)?;
///     Ok(())
/// })));
/// let total = batch.add_scalar::<i64>(count.clone(), CommandBehavior::SINGLE_ROW, Some(parameters(move |p| {
///     p.consume("id", id)?;
///     Ok(())
/// })));
/// let outcome = batch.execute(&executor, &targets, &CancellationToken::new()).await?;
/// ```
pub struct SqlBatch {
    id: Uuid,
    commands: Vec<BatchCommand>,
    outputs: Vec<Arc<BatchResultSlot<Value>>>,
    config: BatchConfig,
    builder: Arc<dyn ParameterSetBuilder>,
    executed: AtomicBool,
}

impl SqlBatch {
    pub fn new() -> Self {
        Self::with_config(BatchConfig::default())
    }

    pub fn with_config(config: BatchConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            commands: Vec::new(),
            outputs: Vec::new(),
            config,
            builder: Arc::new(DefaultParameterSetBuilder),
            executed: AtomicBool::new(false),
        }
    }

    /// Replace the builder that turns parameter callbacks into parameter sets
    pub fn with_parameter_builder(mut self, builder: Arc<dyn ParameterSetBuilder>) -> Self {
        self.builder = builder;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[BatchCommand] {
        &self.commands
    }

    /// A new output token, to be produced by one command and consumed by
    /// later ones
    pub fn declare_output(&mut self) -> OutputToken {
        self.outputs.push(Arc::new(BatchResultSlot::new()));
        OutputToken(self.outputs.len() - 1)
    }

    /// The value `token` received on target `ordinal`
    pub fn output_value(&self, token: OutputToken, ordinal: usize) -> Option<Value> {
        self.outputs.get(token.index())?.get(ordinal)
    }

    /// First column of the first row, converted to `T`; `T::default()` when
    /// there is no row or the value is NULL
    pub fn add_scalar<T>(
        &mut self,
        program: Arc<dyn ProgramResolver>,
        behavior: CommandBehavior,
        parameters: Option<ParameterCallback>,
    ) -> Arc<BatchResultSlot<T>>
    where
        T: FromValue + Default + Send + Sync + 'static,
    {
        let slot = Arc::new(BatchResultSlot::new());
        let kind = CommandKind::Scalar(scalar_handler(slot.clone()));
        self.push(program, behavior, parameters, kind);
        slot
    }

    /// Total rows affected across the command's statements
    pub fn add_non_query(
        &mut self,
        program: Arc<dyn ProgramResolver>,
        behavior: CommandBehavior,
        parameters: Option<ParameterCallback>,
    ) -> Arc<BatchResultSlot<u64>> {
        let slot = Arc::new(BatchResultSlot::new());
        let kind = CommandKind::NonQuery(slot.clone());
        self.push(program, behavior, parameters, kind);
        slot
    }

    /// Hand the command's reader to `f`
    pub fn add_reader<F>(
        &mut self,
        program: Arc<dyn ProgramResolver>,
        behavior: CommandBehavior,
        parameters: Option<ParameterCallback>,
        f: F,
    ) -> Arc<BatchResultSlot<()>>
    where
        F: for<'r> Fn(&'r mut BatchReader) -> BoxFuture<'r, Result<()>> + Send + Sync + 'static,
    {
        self.add_reader_with(program, behavior, parameters, f)
    }

    /// Hand the command's reader to `f` and keep what it returns
    pub fn add_reader_with<T, F>(
        &mut self,
        program: Arc<dyn ProgramResolver>,
        behavior: CommandBehavior,
        parameters: Option<ParameterCallback>,
        f: F,
    ) -> Arc<BatchResultSlot<T>>
    where
        T: Send + Sync + 'static,
        F: for<'r> Fn(&'r mut BatchReader) -> BoxFuture<'r, Result<T>> + Send + Sync + 'static,
    {
        let slot = Arc::new(BatchResultSlot::new());
        let target_slot = slot.clone();
        let handler = row_handler(move |reader, ordinal| {
            let read = f(reader);
            let slot = target_slot.clone();
            Box::pin(async move {
                let value = read.await?;
                Ok(pending(&slot, ordinal, value))
            })
        });
        self.push(program, behavior, parameters, CommandKind::RowReader(handler));
        slot
    }

    /// The command's single-column result as XML
    pub fn add_xml_reader(
        &mut self,
        program: Arc<dyn ProgramResolver>,
        behavior: CommandBehavior,
        parameters: Option<ParameterCallback>,
    ) -> Arc<BatchResultSlot<XmlDocument>> {
        self.add_xml_reader_with(program, behavior, parameters, Ok)
    }

    /// The command's single-column result as XML, mapped through `f`
    pub fn add_xml_reader_with<T, F>(
        &mut self,
        program: Arc<dyn ProgramResolver>,
        behavior: CommandBehavior,
        parameters: Option<ParameterCallback>,
        f: F,
    ) -> Arc<BatchResultSlot<T>>
    where
        T: Send + Sync + 'static,
        F: Fn(XmlDocument) -> Result<T> + Send + Sync + 'static,
    {
        let slot = Arc::new(BatchResultSlot::new());
        let kind = CommandKind::XmlReader(xml_handler(slot.clone(), f));
        self.push(program, behavior, parameters, kind);
        slot
    }

    /// Build the batch for one target without sending it
    pub fn prepare(&self, target: &BatchTarget, version: ServerVersion) -> Result<PreparedBatch> {
        let mut ctx = BatchProcessContext::new(
            target.clone(),
            version,
            self.outputs.len(),
            self.config.max_parameters(),
        );
        for command in &self.commands {
            command.process(&mut ctx, self.builder.as_ref())?;
        }
        Ok(ctx.finish())
    }

    /// Send the batch to every target.
    ///
    /// Returns `Err` only when the batch as a whole cannot run: mapping,
    /// wiring and parameter errors are found for every target before anything
    /// is sent. Per-target failures are reported in the outcome.
    #[tracing::instrument(
        skip(self, executor, targets, cancel),
        fields(batch = %self.id, commands = self.commands.len(), targets = targets.len())
    )]
    pub async fn execute(
        &self,
        executor: &dyn BatchExecutor,
        targets: &[BatchTarget],
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        let mut ordinals = HashSet::new();
        for target in targets {
            if !ordinals.insert(target.ordinal) {
                return Err(BatchError::Configuration(format!(
                    "target ordinal {} is used more than once",
                    target.ordinal
                )));
            }
        }

        if self.commands.is_empty() {
            self.mark_executed()?;
            tracing::debug!("empty batch, nothing to send");
            let targets = targets
                .iter()
                .map(|t| TargetOutcome {
                    ordinal: t.ordinal,
                    result: Ok(()),
                    failed_commands: Vec::new(),
                    elapsed: Duration::ZERO,
                })
                .collect();
            return Ok(BatchOutcome { targets });
        }

        let default_version = self.config.default_server_version()?;
        let prepared = targets
            .iter()
            .map(|target| {
                let version = executor
                    .server_version(target)
                    .unwrap_or(default_version);
                self.prepare(target, version)
            })
            .collect::<Result<Vec<_>>>()?;
        // Only a batch that is about to be sent counts as executed
        self.mark_executed()?;

        let mut outcomes: Vec<TargetOutcome> = stream::iter(
            prepared
                .into_iter()
                .map(|batch| self.run_target(executor, batch, cancel)),
        )
        .buffer_unordered(self.config.max_concurrent_targets())
        .collect()
        .await;
        outcomes.sort_by_key(|o| o.ordinal);

        let outcome = BatchOutcome { targets: outcomes };
        tracing::debug!(
            succeeded = outcome.targets.len() - outcome.failures().count(),
            failed = outcome.failures().count(),
            "batch completed"
        );
        Ok(outcome)
    }

    fn mark_executed(&self) -> Result<()> {
        if self.executed.swap(true, Ordering::SeqCst) {
            return Err(BatchError::InvalidOperation(
                "a batch can only be executed once".into(),
            ));
        }
        Ok(())
    }

    fn push(
        &mut self,
        program: Arc<dyn ProgramResolver>,
        behavior: CommandBehavior,
        parameters: Option<ParameterCallback>,
        kind: CommandKind,
    ) {
        self.commands
            .push(BatchCommand::new(program, behavior, parameters, kind));
    }

    #[tracing::instrument(skip_all, fields(target = %prepared.target))]
    async fn run_target(
        &self,
        executor: &dyn BatchExecutor,
        prepared: PreparedBatch,
        cancel: &CancellationToken,
    ) -> TargetOutcome {
        let start = Instant::now();
        let ordinal = prepared.target.ordinal;
        let mut staged = Vec::new();
        let mut failed = Vec::new();

        let consumed = self
            .consume(executor, &prepared, cancel, &mut staged, &mut failed)
            .await;
        let failed_commands: Vec<usize> = failed.iter().map(|(index, _)| *index).collect();
        let result = match consumed {
            Err(BatchError::Cancelled) => {
                tracing::debug!(discarded = staged.len(), "target cancelled");
                staged.clear();
                Err(BatchError::Cancelled)
            }
            result => {
                let committed = commit(staged);
                let first_failure = failed.into_iter().next().map(|(_, e)| e);
                match (result, first_failure) {
                    (Ok(()), Some(e)) => Err(e),
                    (result, _) => result.and(committed),
                }
            }
        };

        let elapsed = start.elapsed();
        match &result {
            Ok(()) => tracing::debug!(
                duration_ms = elapsed.as_millis() as u64,
                "target completed"
            ),
            Err(BatchError::Cancelled) => {}
            Err(e) => tracing::warn!(
                error = %e,
                duration_ms = elapsed.as_millis() as u64,
                "target failed"
            ),
        }

        TargetOutcome {
            ordinal,
            result,
            failed_commands,
            elapsed,
        }
    }

    async fn consume(
        &self,
        executor: &dyn BatchExecutor,
        prepared: &PreparedBatch,
        cancel: &CancellationToken,
        staged: &mut Vec<PendingWrite>,
        failed: &mut Vec<(usize, BatchError)>,
    ) -> Result<()> {
        let _gates = prepared
            .gates
            .acquire(self.config.gate_acquire_timeout(), cancel)
            .await?;

        if self.config.log_sql() {
            tracing::debug!(sql = %prepared.sql, "sending batch");
        }
        tracing::debug!(
            commands = prepared.commands.len(),
            parameters = prepared.parameters.len(),
            gates = prepared.gates.len(),
            "executing batch"
        );

        let request = ExecuteRequest {
            target: &prepared.target,
            sql: &prepared.sql,
            parameters: &prepared.parameters,
            behavior: prepared.behavior,
        };
        let mut cursor = with_cancel(cancel, executor.execute(request)).await?;
        let ordinal = prepared.target.ordinal;

        for processed in &prepared.commands {
            let command = self.commands.get(processed.index).ok_or_else(|| {
                BatchError::InvalidOperation(format!("no command at index {}", processed.index))
            })?;
            if processed.index > 0 {
                with_cancel(cancel, cursor.next_result()).await?;
            }

            let mut reader = with_cancel(
                cancel,
                BatchReader::begin(
                    cursor,
                    command.behavior(),
                    processed.index,
                    processed.outputs.clone(),
                ),
            )
            .await?;
            let handled = command.handle_result(&mut reader, ordinal, cancel).await;
            let finished = with_cancel(cancel, reader.finish()).await;
            let residue = match (handled, finished) {
                (Err(BatchError::Cancelled), _) | (_, Err(BatchError::Cancelled)) => {
                    return Err(BatchError::Cancelled);
                }
                (Ok(write), Ok(residue)) => {
                    staged.push(write);
                    residue
                }
                // The slice is intact, only this command failed
                (Err(e), Ok(residue)) => {
                    tracing::debug!(command = processed.index, error = %e, "command failed");
                    failed.push((processed.index, e));
                    residue
                }
                // The stream itself broke; report what the command saw first
                (Err(e), Err(_)) | (Ok(_), Err(e)) => return Err(e),
            };

            tracing::trace!(
                command = processed.index,
                affected_rows = residue.records_affected,
                outputs = residue.captured.len(),
                "command consumed"
            );
            for (token, value) in residue.captured {
                if let Some(slot) = self.outputs.get(token.index()) {
                    staged.push(pending(slot, ordinal, value));
                }
            }
            cursor = residue.cursor;
        }

        // Surfaces anything the server sent after the last command
        with_cancel(cancel, cursor.next_result()).await?;
        Ok(())
    }
}

impl Default for SqlBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SqlBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlBatch")
            .field("id", &self.id)
            .field("commands", &self.commands)
            .field("outputs", &self.outputs.len())
            .field("config", &self.config)
            .finish()
    }
}

fn commit(staged: Vec<PendingWrite>) -> Result<()> {
    let mut first_error = None;
    for write in staged {
        if let Err(e) = write() {
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// How one target's execution ended.
///
/// A command whose result could not be extracted (an XML shape mismatch, a
/// failing reader callback) fails on its own: later commands still run and
/// keep their results. Its index is listed in `failed_commands` and the first
/// such error becomes `result`.
#[derive(Debug)]
pub struct TargetOutcome {
    pub ordinal: usize,
    pub result: std::result::Result<(), BatchError>,
    pub failed_commands: Vec<usize>,
    pub elapsed: Duration,
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_cancelled())
    }

    pub fn error(&self) -> Option<&BatchError> {
        self.result.as_ref().err()
    }
}

/// Per-target results of [`SqlBatch::execute`], ordered by target ordinal
#[derive(Debug)]
pub struct BatchOutcome {
    pub targets: Vec<TargetOutcome>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.targets.iter().all(TargetOutcome::is_success)
    }

    pub fn target(&self, ordinal: usize) -> Option<&TargetOutcome> {
        self.targets.iter().find(|t| t.ordinal == ordinal)
    }

    /// Failed targets with their errors
    pub fn failures(&self) -> impl Iterator<Item = (usize, &BatchError)> {
        self.targets
            .iter()
            .filter_map(|t| t.error().map(|e| (t.ordinal, e)))
    }

    /// The first failure, if any
    pub fn into_result(self) -> Result<()> {
        for target in self.targets {
            target.result?;
        }
        Ok(())
    }
}
