//! MS SQL Server executor for procbatch
//!
//! Sends a prepared batch over a tiberius connection and records the
//! response as a [`procbatch::BufferedCursor`].
//!
//! Positional parameters (`@P1`, `@P2`, ...) map directly onto tiberius'
//! own parameter naming. Statement-completion counts are not reported by
//! tiberius' query stream, so non-query commands observe zero affected rows.

mod connection;
mod convert;
mod executor;

#[cfg(test)]
mod connection_tests;
#[cfg(test)]
mod convert_tests;
#[cfg(test)]
mod executor_tests;

pub use connection::{MssqlConnection, MssqlConnectionError};
pub use executor::MssqlExecutor;
