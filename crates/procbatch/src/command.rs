//! Logical commands: SQL emission and result extraction

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use procbatch_core::{BatchError, FromValue, Result, SqlType, Value};
use tokio_util::sync::CancellationToken;

use crate::behavior::CommandBehavior;
use crate::constants::{
    COMMAND_INDEX_VARIABLE, END_MARKER_COLUMN, NOCOUNT_VARIABLE, OUTPUT_MARKER_COLUMN,
};
use crate::context::BatchProcessContext;
use crate::parameters::{ArgumentSource, ParameterCallback, ParameterSetBuilder};
use crate::program::{ParameterDirection, ProgramResolver};
use crate::reader::BatchReader;
use crate::slot::BatchResultSlot;
use crate::sql::{comment, quote_identifier, quote_raiserror_message, success_variable};
use crate::xml::XmlDocument;

/// A result write, applied when the target's outcome is known
pub type PendingWrite = Box<dyn FnOnce() -> Result<()> + Send>;

pub(crate) fn pending<T>(slot: &Arc<BatchResultSlot<T>>, ordinal: usize, value: T) -> PendingWrite
where
    T: Send + Sync + 'static,
{
    let slot = slot.clone();
    Box::new(move || slot.set(ordinal, value))
}

/// Run `fut` unless `cancel` fires first
pub(crate) async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BatchError::Cancelled),
        result = fut => result,
    }
}

pub(crate) type ScalarHandler =
    Box<dyn Fn(usize, Option<Value>) -> Result<PendingWrite> + Send + Sync>;

pub(crate) type RowHandler = Arc<
    dyn for<'r> Fn(&'r mut BatchReader, usize) -> BoxFuture<'r, Result<PendingWrite>>
        + Send
        + Sync,
>;

pub(crate) type XmlHandler = Box<dyn Fn(usize, XmlDocument) -> Result<PendingWrite> + Send + Sync>;

/// How a command's slice is turned into a result
pub(crate) enum CommandKind {
    /// First column of the first row, or the type's default
    Scalar(ScalarHandler),
    /// Total statement-completion count of the slice
    NonQuery(Arc<BatchResultSlot<u64>>),
    /// Caller-supplied reader callback
    RowReader(RowHandler),
    /// XML view of the single-column result
    XmlReader(XmlHandler),
}

impl CommandKind {
    fn name(&self) -> &'static str {
        match self {
            CommandKind::Scalar(_) => "scalar",
            CommandKind::NonQuery(_) => "non-query",
            CommandKind::RowReader(_) => "reader",
            CommandKind::XmlReader(_) => "xml-reader",
        }
    }
}

pub(crate) fn scalar_handler<T>(slot: Arc<BatchResultSlot<T>>) -> ScalarHandler
where
    T: FromValue + Default + Send + Sync + 'static,
{
    Box::new(move |ordinal, value| {
        let value = match value {
            None | Some(Value::Null) => T::default(),
            Some(value) => T::from_value(&value)?,
        };
        Ok(pending(&slot, ordinal, value))
    })
}

pub(crate) fn row_handler<F>(f: F) -> RowHandler
where
    F: for<'r> Fn(&'r mut BatchReader, usize) -> BoxFuture<'r, Result<PendingWrite>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

pub(crate) fn xml_handler<T, F>(slot: Arc<BatchResultSlot<T>>, f: F) -> XmlHandler
where
    T: Send + Sync + 'static,
    F: Fn(XmlDocument) -> Result<T> + Send + Sync + 'static,
{
    Box::new(move |ordinal, document| Ok(pending(&slot, ordinal, f(document)?)))
}

/// One stored-procedure call inside a batch
pub struct BatchCommand {
    program: Arc<dyn ProgramResolver>,
    behavior: CommandBehavior,
    set_parameters: Option<ParameterCallback>,
    kind: CommandKind,
}

impl BatchCommand {
    pub(crate) fn new(
        program: Arc<dyn ProgramResolver>,
        behavior: CommandBehavior,
        set_parameters: Option<ParameterCallback>,
        kind: CommandKind,
    ) -> Self {
        Self {
            program,
            behavior,
            set_parameters,
            kind,
        }
    }

    pub fn program(&self) -> &dyn ProgramResolver {
        self.program.as_ref()
    }

    pub fn behavior(&self) -> CommandBehavior {
        self.behavior
    }

    /// Append this command's statements, parameters and gates to `ctx`
    pub fn process(
        &self,
        ctx: &mut BatchProcessContext,
        builder: &dyn ParameterSetBuilder,
    ) -> Result<()> {
        let mapping =
            self.program
                .mapping(ctx.target())
                .ok_or_else(|| BatchError::MappingNotFound {
                    program: self.program.name().to_string(),
                    target: ctx.target().to_string(),
                })?;
        let set = builder.build(mapping, self.set_parameters.as_ref())?;
        let definition = &mapping.definition;
        let index = ctx.index();

        ctx.push_line(&comment(&definition.qualified_name()));
        ctx.push_line(&format!("SET {} = {};", COMMAND_INDEX_VARIABLE, index));

        let mut arguments = Vec::with_capacity(set.arguments.len());
        let mut guards: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        let mut outputs = Vec::new();
        let mut output_columns = Vec::new();

        let mut return_binding = None;
        if let Some((return_definition, token)) = &set.return_value {
            let binding = ctx.bind(SqlType::Int, Value::Null, ParameterDirection::Output)?;
            ctx.register_producer(*token, &binding)?;
            outputs.push(*token);
            output_columns.push(format!(
                "{} AS {}",
                binding,
                quote_identifier(&return_definition.name)
            ));
            return_binding = Some(binding);
        }

        for argument in &set.arguments {
            let parameter = &argument.definition;
            match &argument.source {
                ArgumentSource::Value(value) => {
                    let binding =
                        ctx.bind(parameter.sql_type, value.clone(), ParameterDirection::Input)?;
                    arguments.push(format!("{} = {}", parameter.name, binding));
                }
                ArgumentSource::Consume(token) => {
                    let (binding, producer) = ctx.resolve_consumer(*token, &parameter.name)?;
                    guards
                        .entry(producer)
                        .or_default()
                        .push(parameter.name.clone());
                    arguments.push(format!("{} = {}", parameter.name, binding));
                }
                ArgumentSource::Produce { token, initial } => {
                    let binding = ctx.bind(
                        parameter.sql_type,
                        initial.clone(),
                        ParameterDirection::Output,
                    )?;
                    ctx.register_producer(*token, &binding)?;
                    outputs.push(*token);
                    output_columns.push(format!(
                        "{} AS {}",
                        binding,
                        quote_identifier(&parameter.name)
                    ));
                    arguments.push(format!("{} = {} OUT", parameter.name, binding));
                }
            }
        }

        for (producer, names) in &guards {
            let message = if names.len() == 1 {
                format!(
                    "Parameter {} depends on an output of command {} that did not complete successfully.",
                    names[0], producer
                )
            } else {
                format!(
                    "Parameters {} depend on outputs of command {} that did not complete successfully.",
                    names.join(", "),
                    producer
                )
            };
            ctx.push_line(&format!(
                "IF (ISNULL({},0) <> 1) RAISERROR({},16,0);",
                success_variable(*producer),
                quote_raiserror_message(&message)
            ));
        }

        let key_info = self.behavior.contains(CommandBehavior::KEY_INFO);
        let schema_only = self.behavior.contains(CommandBehavior::SCHEMA_ONLY);
        if key_info {
            ctx.push_line("SET NO_BROWSETABLE ON;");
        }
        if schema_only {
            ctx.push_line("SET FMTONLY ON;");
        }

        let mut execute = String::new();
        if let Some(binding) = &return_binding {
            execute.push_str(binding);
            execute.push_str(" = ");
        }
        execute.push_str("EXECUTE ");
        execute.push_str(&definition.qualified_name());
        if !arguments.is_empty() {
            execute.push(' ');
            execute.push_str(&arguments.join(", "));
        }
        execute.push(';');
        ctx.push_line(&execute);

        if schema_only {
            ctx.push_line("SET FMTONLY OFF;");
        }
        if key_info {
            ctx.push_line("SET NO_BROWSETABLE OFF;");
        }

        if !outputs.is_empty() {
            let flag = success_variable(index);
            if ctx.server_version().supports_inline_declare() {
                ctx.push_line(&format!("DECLARE {} bit = 1;", flag));
            } else {
                ctx.push_line(&format!("DECLARE {} bit;", flag));
                ctx.push_line(&format!("SET {} = 1;", flag));
            }
            ctx.push_line("SET NOCOUNT ON;");
            ctx.push_line(&format!(
                "SELECT {} AS {}, {};",
                index,
                quote_identifier(OUTPUT_MARKER_COLUMN),
                output_columns.join(", ")
            ));
            ctx.push_line(&format!("IF {} = 0 SET NOCOUNT OFF;", NOCOUNT_VARIABLE));
        }

        ctx.push_line("SET NOCOUNT ON;");
        ctx.push_line(&format!(
            "SELECT {} AS {};",
            index,
            quote_identifier(END_MARKER_COLUMN)
        ));
        ctx.push_line(&format!("IF {} = 0 SET NOCOUNT OFF;", NOCOUNT_VARIABLE));

        ctx.intersect_behavior(self.behavior);
        if let Some(gate) = &mapping.connection.semaphore {
            ctx.add_connection_gate(gate.clone());
        }
        if let Some(pool) = &mapping.load_balanced {
            if let Some(gate) = &pool.connection_semaphore {
                ctx.add_pool_gate(gate.clone());
            }
            if let Some(gate) = &pool.database_semaphore {
                ctx.add_database_gate(gate.clone());
            }
        }
        ctx.complete_command(outputs);
        Ok(())
    }

    /// Extract this command's result from its slice for target `ordinal`
    pub async fn handle_result(
        &self,
        reader: &mut BatchReader,
        ordinal: usize,
        cancel: &CancellationToken,
    ) -> Result<PendingWrite> {
        tracing::trace!(
            kind = self.kind.name(),
            program = self.program.name(),
            ordinal,
            "handling command result"
        );
        match &self.kind {
            CommandKind::Scalar(handler) => {
                let value = if with_cancel(cancel, reader.read()).await? {
                    Some(reader.get_value(0)?.clone())
                } else {
                    None
                };
                handler(ordinal, value)
            }
            CommandKind::NonQuery(slot) => {
                with_cancel(cancel, reader.drain()).await?;
                Ok(pending(slot, ordinal, reader.records_affected()))
            }
            CommandKind::RowReader(handler) => with_cancel(cancel, handler(reader, ordinal)).await,
            CommandKind::XmlReader(handler) => {
                let document = with_cancel(cancel, reader.xml()).await?;
                handler(ordinal, document)
            }
        }
    }
}

impl std::fmt::Debug for BatchCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCommand")
            .field("program", &self.program.name())
            .field("behavior", &self.behavior)
            .field("kind", &self.kind.name())
            .finish()
    }
}
