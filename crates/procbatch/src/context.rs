//! Accumulator for one physical batch

use std::collections::HashMap;
use std::fmt::Write as _;

use procbatch_core::{BatchError, Result, SqlType, Value, WiringError};

use crate::behavior::CommandBehavior;
use crate::constants::{COMMAND_INDEX_VARIABLE, NOCOUNT_VARIABLE};
use crate::gate::{Gate, GateSet};
use crate::parameters::{BoundParameter, OutputToken};
use crate::program::{BatchTarget, ParameterDirection};
use crate::sql::binding_name;
use crate::version::ServerVersion;

/// State threaded through every command while one target's batch is built.
///
/// Nothing here performs I/O; the result is a [`PreparedBatch`].
#[derive(Debug)]
pub struct BatchProcessContext {
    target: BatchTarget,
    server_version: ServerVersion,
    declared_outputs: usize,
    max_parameters: usize,
    sql: String,
    parameters: Vec<BoundParameter>,
    /// token -> binding of the producing parameter
    output_parameters: HashMap<OutputToken, String>,
    /// token -> index of the producing command
    output_commands: HashMap<OutputToken, usize>,
    command_outputs: Vec<Vec<OutputToken>>,
    index: usize,
    behavior: CommandBehavior,
    connection_gates: GateSet,
    pool_gates: GateSet,
    database_gates: GateSet,
}

impl BatchProcessContext {
    pub fn new(
        target: BatchTarget,
        server_version: ServerVersion,
        declared_outputs: usize,
        max_parameters: usize,
    ) -> Self {
        let mut sql = String::new();
        let _ = writeln!(
            sql,
            "DECLARE {} int, {} int;",
            COMMAND_INDEX_VARIABLE, NOCOUNT_VARIABLE
        );
        let _ = writeln!(sql, "SET {} = @@OPTIONS & 512;", NOCOUNT_VARIABLE);
        sql.push_str("BEGIN TRY\n");

        Self {
            target,
            server_version,
            declared_outputs,
            max_parameters,
            sql,
            parameters: Vec::new(),
            output_parameters: HashMap::new(),
            output_commands: HashMap::new(),
            command_outputs: Vec::new(),
            index: 0,
            behavior: CommandBehavior::all(),
            connection_gates: GateSet::new(),
            pool_gates: GateSet::new(),
            database_gates: GateSet::new(),
        }
    }

    pub fn target(&self) -> &BatchTarget {
        &self.target
    }

    pub fn server_version(&self) -> ServerVersion {
        self.server_version
    }

    /// Index of the command being processed
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn behavior(&self) -> CommandBehavior {
        self.behavior
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &[BoundParameter] {
        &self.parameters
    }

    /// Append one indented line to the batch text
    pub fn push_line(&mut self, line: &str) {
        self.sql.push_str("    ");
        self.sql.push_str(line);
        self.sql.push('\n');
    }

    /// Add a positional parameter; returns its binding name
    pub fn bind(
        &mut self,
        sql_type: SqlType,
        value: Value,
        direction: ParameterDirection,
    ) -> Result<String> {
        if self.parameters.len() >= self.max_parameters {
            return Err(BatchError::Parameter(format!(
                "batch for target {} needs more than {} parameters",
                self.target, self.max_parameters
            )));
        }
        let name = binding_name(self.parameters.len() + 1);
        self.parameters.push(BoundParameter {
            name: name.clone(),
            sql_type,
            value,
            direction,
        });
        Ok(name)
    }

    /// Record that the current command writes `token` through `binding`
    pub fn register_producer(&mut self, token: OutputToken, binding: &str) -> Result<()> {
        self.check_declared(token)?;
        if let Some(first) = self.output_commands.get(&token) {
            return Err(WiringError::DuplicateProducer {
                token: token.index(),
                first: *first,
                second: self.index,
            }
            .into());
        }
        self.output_commands.insert(token, self.index);
        self.output_parameters.insert(token, binding.to_string());
        Ok(())
    }

    /// Binding and producing command of `token`, which must come from an
    /// earlier command
    pub fn resolve_consumer(&self, token: OutputToken, parameter: &str) -> Result<(String, usize)> {
        self.check_declared(token)?;
        let missing = || WiringError::MissingProducer {
            token: token.index(),
            command: self.index,
            parameter: parameter.to_string(),
        };
        let producer = match self.output_commands.get(&token) {
            Some(producer) if *producer < self.index => *producer,
            _ => return Err(missing().into()),
        };
        let binding = self
            .output_parameters
            .get(&token)
            .cloned()
            .ok_or_else(missing)?;
        Ok((binding, producer))
    }

    pub fn intersect_behavior(&mut self, behavior: CommandBehavior) {
        self.behavior &= behavior;
    }

    pub fn add_connection_gate(&mut self, gate: Gate) {
        self.connection_gates.insert(gate);
    }

    pub fn add_pool_gate(&mut self, gate: Gate) {
        self.pool_gates.insert(gate);
    }

    pub fn add_database_gate(&mut self, gate: Gate) {
        self.database_gates.insert(gate);
    }

    /// Close the current command, recording the tokens its output marker
    /// carries, and move to the next index
    pub fn complete_command(&mut self, outputs: Vec<OutputToken>) {
        self.command_outputs.push(outputs);
        self.index += 1;
    }

    /// Close the envelope and hand over the assembled batch
    pub fn finish(mut self) -> PreparedBatch {
        self.sql.push_str("END TRY\nBEGIN CATCH\n");
        if self.server_version.supports_inline_declare() {
            self.push_line("DECLARE @ErrorMessage nvarchar(4000) = ERROR_MESSAGE();");
        } else {
            self.push_line("DECLARE @ErrorMessage nvarchar(4000);");
            self.push_line("SET @ErrorMessage = ERROR_MESSAGE();");
        }
        let restore = format!("IF {} = 0 SET NOCOUNT OFF;", NOCOUNT_VARIABLE);
        self.push_line(&restore);
        let raise = format!(
            "RAISERROR(N'Batch command %d failed: %s', 16, 1, {}, @ErrorMessage);",
            COMMAND_INDEX_VARIABLE
        );
        self.push_line(&raise);
        self.sql.push_str("END CATCH\n");

        let mut gates = GateSet::new();
        gates.extend(&self.database_gates);
        gates.extend(&self.pool_gates);
        gates.extend(&self.connection_gates);

        let commands = self
            .command_outputs
            .into_iter()
            .enumerate()
            .map(|(index, outputs)| ProcessedCommand { index, outputs })
            .collect();

        PreparedBatch {
            target: self.target,
            server_version: self.server_version,
            sql: self.sql,
            parameters: self.parameters,
            behavior: self.behavior,
            gates,
            commands,
        }
    }

    fn check_declared(&self, token: OutputToken) -> Result<()> {
        if token.index() >= self.declared_outputs {
            return Err(WiringError::UnknownToken {
                token: token.index(),
            }
            .into());
        }
        Ok(())
    }
}

/// Where a command's slice sits in the physical stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedCommand {
    pub index: usize,
    /// Tokens carried by the output marker, in column order
    pub outputs: Vec<OutputToken>,
}

/// One target's batch, ready to send
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub target: BatchTarget,
    pub server_version: ServerVersion,
    pub sql: String,
    pub parameters: Vec<BoundParameter>,
    /// Intersection of every command's behavior
    pub behavior: CommandBehavior,
    /// Database, then pool, then connection gates
    pub gates: GateSet,
    pub commands: Vec<ProcessedCommand>,
}
