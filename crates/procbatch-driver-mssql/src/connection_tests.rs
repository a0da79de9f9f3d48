//! Tests for MS SQL Server connection module

use pretty_assertions::assert_eq;
use procbatch::ServerVersion;
use procbatch_core::BatchError;

use crate::connection::{MssqlConnectionError, parse_product_version};

#[test]
fn test_parse_product_version() {
    assert_eq!(
        parse_product_version("16.0.1000.6").unwrap(),
        ServerVersion::new(16, 0, 1000)
    );
    assert_eq!(
        parse_product_version("9.00.5000.00").unwrap(),
        ServerVersion::new(9, 0, 5000)
    );
}

#[test]
fn test_parse_product_version_rejects_garbage() {
    let err = parse_product_version("Microsoft SQL Server").unwrap_err();
    assert!(matches!(err, MssqlConnectionError::UnknownVersion(_)));
}

#[test]
fn test_connection_error_converts_to_driver_error() {
    let err: BatchError = MssqlConnectionError::ConnectionClosed.into();
    assert!(matches!(err, BatchError::Driver(msg) if msg == "Connection is closed"));
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
    let err: MssqlConnectionError = io.into();
    assert!(err.to_string().contains("refused"));
}
