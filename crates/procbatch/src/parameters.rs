//! Parameter sets, output tokens and the default parameter-set builder

use std::collections::HashSet;
use std::sync::Arc;

use procbatch_core::{BatchError, Result, SqlType, Value};

use crate::program::{ParameterDefinition, ParameterDirection, ProgramDefinition, ProgramMapping};

/// Handle linking a producing command's output parameter to later consumers.
///
/// Tokens index the output table of the batch that declared them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputToken(pub(crate) usize);

impl OutputToken {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for OutputToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How one procedure argument gets its value
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentSource {
    /// A literal value
    Value(Value),
    /// The value an earlier command produced
    Consume(OutputToken),
    /// Passed `OUT`; the value the server writes back feeds the token
    Produce { token: OutputToken, initial: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchArgument {
    pub definition: ParameterDefinition,
    pub source: ArgumentSource,
}

/// Arguments of one command for one target
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchParameterSet {
    /// Return-value parameter captured into a token
    pub return_value: Option<(ParameterDefinition, OutputToken)>,
    /// Arguments in the order the procedure declares them
    pub arguments: Vec<BatchArgument>,
}

impl BatchParameterSet {
    /// Arguments bound to a literal value
    pub fn values(&self) -> impl Iterator<Item = (&ParameterDefinition, &Value)> {
        self.arguments.iter().filter_map(|a| match &a.source {
            ArgumentSource::Value(v) => Some((&a.definition, v)),
            _ => None,
        })
    }

    /// Arguments consuming a token
    pub fn consumed(&self) -> impl Iterator<Item = (&ParameterDefinition, OutputToken)> {
        self.arguments.iter().filter_map(|a| match &a.source {
            ArgumentSource::Consume(token) => Some((&a.definition, *token)),
            _ => None,
        })
    }

    /// Every produced token, return value first
    pub fn produced(&self) -> Vec<(&ParameterDefinition, OutputToken)> {
        let mut produced: Vec<_> = self
            .return_value
            .iter()
            .map(|(def, token)| (def, *token))
            .collect();
        produced.extend(self.arguments.iter().filter_map(|a| match &a.source {
            ArgumentSource::Produce { token, .. } => Some((&a.definition, *token)),
            _ => None,
        }));
        produced
    }
}

/// A parameter as sent to the executor, named by position
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    /// `@P1`, `@P2`, ...
    pub name: String,
    pub sql_type: SqlType,
    pub value: Value,
    /// Input for literals, Output for variables the batch writes into
    pub direction: ParameterDirection,
}

/// User callback filling in a command's arguments
pub type ParameterCallback = Arc<dyn Fn(&mut ParameterSetter<'_>) -> Result<()> + Send + Sync>;

/// Wrap a closure as a [`ParameterCallback`]
pub fn parameters<F>(f: F) -> ParameterCallback
where
    F: Fn(&mut ParameterSetter<'_>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Assigns arguments of one procedure call, validated against its definition
pub struct ParameterSetter<'a> {
    definition: &'a ProgramDefinition,
    set: BatchParameterSet,
    assigned: HashSet<String>,
}

impl<'a> ParameterSetter<'a> {
    pub fn new(definition: &'a ProgramDefinition) -> Self {
        Self {
            definition,
            set: BatchParameterSet::default(),
            assigned: HashSet::new(),
        }
    }

    /// Pass a literal value
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let definition = self.claim(name)?;
        match definition.direction {
            ParameterDirection::Input | ParameterDirection::InputOutput => {}
            other => {
                return Err(BatchError::Parameter(format!(
                    "parameter {} of {} is {:?} and cannot take a value",
                    definition.name, self.definition.qualified_name(), other
                )));
            }
        }
        self.push(definition, ArgumentSource::Value(value.into()));
        Ok(self)
    }

    /// Pass the value an earlier command produced into `token`
    pub fn consume(&mut self, name: &str, token: OutputToken) -> Result<&mut Self> {
        let definition = self.claim(name)?;
        match definition.direction {
            ParameterDirection::Input | ParameterDirection::InputOutput => {}
            other => {
                return Err(BatchError::Parameter(format!(
                    "parameter {} of {} is {:?} and cannot consume an output",
                    definition.name, self.definition.qualified_name(), other
                )));
            }
        }
        self.push(definition, ArgumentSource::Consume(token));
        Ok(self)
    }

    /// Capture the value the server writes into `name`
    pub fn produce(&mut self, name: &str, token: OutputToken) -> Result<&mut Self> {
        self.produce_with(name, token, Value::Null)
    }

    /// Like [`produce`](Self::produce), passing `initial` in as well
    pub fn produce_with(
        &mut self,
        name: &str,
        token: OutputToken,
        initial: impl Into<Value>,
    ) -> Result<&mut Self> {
        let definition = self.claim(name)?;
        let initial = initial.into();
        match definition.direction {
            ParameterDirection::ReturnValue => {
                if !initial.is_null() {
                    return Err(BatchError::Parameter(format!(
                        "return value {} of {} cannot take an initial value",
                        definition.name, self.definition.qualified_name()
                    )));
                }
                self.set.return_value = Some((definition, token));
            }
            ParameterDirection::Output | ParameterDirection::InputOutput => {
                self.push(definition, ArgumentSource::Produce { token, initial });
            }
            ParameterDirection::Input => {
                return Err(BatchError::Parameter(format!(
                    "parameter {} of {} is an input parameter and cannot produce an output",
                    definition.name, self.definition.qualified_name()
                )));
            }
        }
        Ok(self)
    }

    /// The arguments assigned so far, in declaration order
    pub fn finish(mut self) -> BatchParameterSet {
        let definition = self.definition;
        let position = |def: &ParameterDefinition| {
            definition
                .parameters
                .iter()
                .position(|p| p.name == def.name)
                .unwrap_or(usize::MAX)
        };
        self.set
            .arguments
            .sort_by_key(|argument| position(&argument.definition));
        self.set
    }

    fn claim(&mut self, name: &str) -> Result<ParameterDefinition> {
        let definition = self.definition.parameter(name).ok_or_else(|| {
            BatchError::Parameter(format!(
                "{} has no parameter named {}",
                self.definition.qualified_name(),
                name
            ))
        })?;
        if !self
            .assigned
            .insert(definition.bare_name().to_ascii_lowercase())
        {
            return Err(BatchError::Parameter(format!(
                "parameter {} of {} is assigned more than once",
                definition.name,
                self.definition.qualified_name()
            )));
        }
        Ok(definition.clone())
    }

    fn push(&mut self, definition: ParameterDefinition, source: ArgumentSource) {
        self.set.arguments.push(BatchArgument { definition, source });
    }
}

/// Produces the parameter set of a command for one mapping
pub trait ParameterSetBuilder: Send + Sync {
    fn build(
        &self,
        mapping: &ProgramMapping,
        callback: Option<&ParameterCallback>,
    ) -> Result<BatchParameterSet>;
}

/// Runs the command's callback against a [`ParameterSetter`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParameterSetBuilder;

impl ParameterSetBuilder for DefaultParameterSetBuilder {
    fn build(
        &self,
        mapping: &ProgramMapping,
        callback: Option<&ParameterCallback>,
    ) -> Result<BatchParameterSet> {
        let mut setter = ParameterSetter::new(&mapping.definition);
        if let Some(callback) = callback {
            callback(&mut setter)?;
        }
        Ok(setter.finish())
    }
}
