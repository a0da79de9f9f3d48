//! procbatch core - shared vocabulary for batched stored-procedure execution
//!
//! This crate provides the types that the batch engine and the provider
//! drivers agree on. It defines:
//!
//! - `Value`, `SqlType`, `ColumnMeta` - the data model of a result stream
//! - `FromValue` - typed extraction of cell values
//! - `BatchError` / `WiringError` - the error taxonomy
//! - `ResultCursor` - the contract of a physical multi-result-set cursor
//! - `BufferedCursor` - an in-memory cursor over a recorded response

mod cursor;
mod error;
mod types;


pub use cursor::*;
pub use error::*;
pub use types::*;
