//! Stored-procedure metadata and the program-to-target mapping lookup

use std::sync::Arc;

use procbatch_core::SqlType;

use crate::gate::Gate;
use crate::sql::quote_identifier;

/// Direction of a procedure parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterDirection {
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

impl ParameterDirection {
    /// Whether the server writes a value back into this parameter
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Output | Self::InputOutput | Self::ReturnValue)
    }
}

/// One parameter of a stored procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDefinition {
    /// Name including the leading `@`
    pub name: String,
    pub sql_type: SqlType,
    pub direction: ParameterDirection,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, sql_type: SqlType, direction: ParameterDirection) -> Self {
        let name = name.into();
        let name = if name.starts_with('@') {
            name
        } else {
            format!("@{}", name)
        };
        Self {
            name,
            sql_type,
            direction,
        }
    }

    pub fn input(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self::new(name, sql_type, ParameterDirection::Input)
    }

    pub fn output(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self::new(name, sql_type, ParameterDirection::Output)
    }

    pub fn input_output(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self::new(name, sql_type, ParameterDirection::InputOutput)
    }

    pub fn return_value() -> Self {
        Self::new("@RETURN_VALUE", SqlType::Int, ParameterDirection::ReturnValue)
    }

    /// Name without the leading `@`
    pub fn bare_name(&self) -> &str {
        self.name.trim_start_matches('@')
    }

    /// Case-insensitive match, with or without the leading `@`
    pub fn matches(&self, name: &str) -> bool {
        self.bare_name()
            .eq_ignore_ascii_case(name.trim_start_matches('@'))
    }
}

/// Schema-qualified procedure with its parameter list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramDefinition {
    pub schema: String,
    pub name: String,
    pub parameters: Vec<ParameterDefinition>,
}

impl ProgramDefinition {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterDefinition) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// `[schema].[name]`
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.name)
        )
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDefinition> {
        self.parameters.iter().find(|p| p.matches(name))
    }

    pub fn return_value(&self) -> Option<&ParameterDefinition> {
        self.parameters
            .iter()
            .find(|p| p.direction == ParameterDirection::ReturnValue)
    }
}

/// A physical connection a program can run on
#[derive(Debug, Clone)]
pub struct PhysicalConnection {
    pub connection_string: String,
    pub semaphore: Option<Gate>,
}

impl PhysicalConnection {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            semaphore: None,
        }
    }

    pub fn with_semaphore(mut self, gate: Gate) -> Self {
        self.semaphore = Some(gate);
        self
    }
}

/// A pooled group of connections serving the same database
#[derive(Debug, Clone)]
pub struct LoadBalancedConnection {
    pub name: String,
    pub connection_semaphore: Option<Gate>,
    pub database_semaphore: Option<Gate>,
}

impl LoadBalancedConnection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection_semaphore: None,
            database_semaphore: None,
        }
    }

    pub fn with_connection_semaphore(mut self, gate: Gate) -> Self {
        self.connection_semaphore = Some(gate);
        self
    }

    pub fn with_database_semaphore(mut self, gate: Gate) -> Self {
        self.database_semaphore = Some(gate);
        self
    }
}

/// Where and how a program runs for one physical connection
#[derive(Debug, Clone)]
pub struct ProgramMapping {
    pub definition: Arc<ProgramDefinition>,
    pub connection: PhysicalConnection,
    pub load_balanced: Option<Arc<LoadBalancedConnection>>,
}

impl ProgramMapping {
    pub fn new(definition: Arc<ProgramDefinition>, connection: PhysicalConnection) -> Self {
        Self {
            definition,
            connection,
            load_balanced: None,
        }
    }

    pub fn with_load_balanced(mut self, pool: Arc<LoadBalancedConnection>) -> Self {
        self.load_balanced = Some(pool);
        self
    }
}

/// One physical destination of a batch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchTarget {
    /// Stable key for result slots
    pub ordinal: usize,
    pub connection_string: String,
}

impl BatchTarget {
    pub fn new(ordinal: usize, connection_string: impl Into<String>) -> Self {
        Self {
            ordinal,
            connection_string: connection_string.into(),
        }
    }
}

impl std::fmt::Display for BatchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.ordinal, self.connection_string)
    }
}

/// Resolves a logical program to its mapping on a given target
pub trait ProgramResolver: Send + Sync {
    /// Logical program name, used in error messages
    fn name(&self) -> &str;

    /// The mapping serving `target`, if any
    fn mapping(&self, target: &BatchTarget) -> Option<&ProgramMapping>;
}

/// A program with a fixed list of mappings matched by connection string
#[derive(Debug, Clone)]
pub struct SqlProgram {
    name: String,
    mappings: Vec<ProgramMapping>,
}

impl SqlProgram {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mappings: Vec::new(),
        }
    }

    pub fn with_mapping(mut self, mapping: ProgramMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn mappings(&self) -> &[ProgramMapping] {
        &self.mappings
    }
}

impl ProgramResolver for SqlProgram {
    fn name(&self) -> &str {
        &self.name
    }

    fn mapping(&self, target: &BatchTarget) -> Option<&ProgramMapping> {
        self.mappings
            .iter()
            .find(|m| m.connection.connection_string == target.connection_string)
    }
}
