//! Tests for the T-SQL text helpers

use crate::sql::*;

#[test]
fn test_quote_identifier() {
    assert_eq!(quote_identifier("users"), "[users]");
    assert_eq!(quote_identifier("my table"), "[my table]");
    assert_eq!(quote_identifier("a]b]c"), "[a]]b]]c]");
    assert_eq!(quote_identifier("@Id"), "[@Id]");
}

#[test]
fn test_quote_string() {
    assert_eq!(quote_string("hello"), "N'hello'");
    assert_eq!(quote_string("it's"), "N'it''s'");
}

#[test]
fn test_raiserror_message_escapes_percent() {
    assert_eq!(quote_raiserror_message("100% done"), "N'100%% done'");
    assert_eq!(quote_raiserror_message("%d's"), "N'%%d''s'");
}

#[test]
fn test_comment_stays_on_one_line() {
    assert_eq!(comment("[dbo].[Proc]"), "-- [dbo].[Proc]");
    assert_eq!(comment("a\r\nb"), "-- a  b");
}

#[test]
fn test_generated_names() {
    assert_eq!(success_variable(4), "@Cmd4Success");
    assert_eq!(binding_name(1), "@P1");
    assert_eq!(binding_name(12), "@P12");
}
