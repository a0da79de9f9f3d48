//! procbatch - many stored-procedure calls, one round trip
//!
//! A [`SqlBatch`] collects stored-procedure calls, renders them into a single
//! T-SQL batch per target, sends it once and hands every call its own slice
//! of the result stream through a [`BatchReader`].
//!
//! Calls can feed each other: an output parameter of one call is captured in
//! an [`OutputToken`] and passed to later calls. If the producer did not
//! complete, the consumer fails on the server instead of seeing a default.
//!
//! Execution is gated by [`Gate`]s (connection, pool, database semaphores),
//! acquired once per target before anything is sent.

mod batch;
mod behavior;
mod command;
mod config;
mod constants;
mod context;
mod executor;
mod gate;
mod parameters;
mod program;
mod reader;
mod slot;
pub mod sql;
pub mod testing;
mod version;
mod xml;

#[cfg(test)]
mod batch_tests;
#[cfg(test)]
mod command_tests;
#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod context_tests;
#[cfg(test)]
mod gate_tests;
#[cfg(test)]
mod parameters_tests;
#[cfg(test)]
mod reader_tests;
#[cfg(test)]
mod slot_tests;
#[cfg(test)]
mod sql_tests;
#[cfg(test)]
mod version_tests;
#[cfg(test)]
mod xml_tests;

pub use batch::{BatchOutcome, SqlBatch, TargetOutcome};
pub use behavior::CommandBehavior;
pub use command::{BatchCommand, PendingWrite};
pub use config::BatchConfig;
pub use constants::*;
pub use context::{BatchProcessContext, PreparedBatch, ProcessedCommand};
pub use executor::{BatchExecutor, ExecuteRequest};
pub use gate::{Gate, GateGuard, GateKind, GateSet};
pub use parameters::{
    ArgumentSource, BatchArgument, BatchParameterSet, BoundParameter, DefaultParameterSetBuilder,
    OutputToken, ParameterCallback, ParameterSetBuilder, ParameterSetter, parameters,
};
pub use program::{
    BatchTarget, LoadBalancedConnection, ParameterDefinition, ParameterDirection,
    PhysicalConnection, ProgramDefinition, ProgramMapping, ProgramResolver, SqlProgram,
};
pub use reader::{BatchReader, ReaderCloseHandle, ReaderState};
pub use slot::BatchResultSlot;
pub use version::ServerVersion;
pub use xml::XmlDocument;

pub use procbatch_core::{
    BatchError, BufferedCursor, ColumnMeta, CursorItem, FromValue, Result, ResultCursor, SqlType,
    Value, WiringError,
};
