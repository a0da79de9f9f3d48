//! Tests for tiberius value conversion

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use pretty_assertions::assert_eq;
use procbatch::{BoundParameter, ParameterDirection};
use procbatch_core::{SqlType, Value};
use rstest::rstest;
use tiberius::time::{Date, DateTime2, Time};
use tiberius::{ColumnData, ColumnType, ToSql};

use crate::convert::{bound_to_params, column_data_to_value, column_type_to_sql_type};

fn bound(sql_type: SqlType, value: Value) -> BoundParameter {
    BoundParameter {
        name: "@P1".to_string(),
        sql_type,
        value,
        direction: ParameterDirection::Input,
    }
}

// Column data conversion tests

#[test]
fn test_column_data_to_value_nulls() {
    for data in [
        ColumnData::I32(None),
        ColumnData::String(None),
        ColumnData::Bit(None),
        ColumnData::Guid(None),
        ColumnData::Date(None),
        ColumnData::Xml(None),
    ] {
        assert_eq!(column_data_to_value(data).unwrap(), Value::Null);
    }
}

#[test]
fn test_column_data_to_value_integers() {
    assert_eq!(
        column_data_to_value(ColumnData::U8(Some(7))).unwrap(),
        Value::UInt8(7)
    );
    assert_eq!(
        column_data_to_value(ColumnData::I16(Some(-3))).unwrap(),
        Value::Int16(-3)
    );
    assert_eq!(
        column_data_to_value(ColumnData::I32(Some(42))).unwrap(),
        Value::Int32(42)
    );
    assert_eq!(
        column_data_to_value(ColumnData::I64(Some(9_999_999_999))).unwrap(),
        Value::Int64(9_999_999_999)
    );
}

#[test]
fn test_column_data_to_value_string() {
    let result =
        column_data_to_value(ColumnData::String(Some(Cow::Owned("hello".to_string())))).unwrap();
    assert_eq!(result, Value::String("hello".to_string()));
}

#[test]
fn test_column_data_to_value_guid() {
    let id = uuid::Uuid::new_v4();
    assert_eq!(
        column_data_to_value(ColumnData::Guid(Some(id))).unwrap(),
        Value::Uuid(id)
    );
}

fn days_from_year_one(date: NaiveDate) -> u32 {
    (date - NaiveDate::from_ymd_opt(1, 1, 1).unwrap()).num_days() as u32
}

#[test]
fn test_column_data_to_value_date() {
    let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    let data = ColumnData::Date(Some(Date::new(days_from_year_one(date))));
    assert_eq!(column_data_to_value(data).unwrap(), Value::Date(date));
}

#[test]
fn test_column_data_to_value_datetime2() {
    let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    let seconds = 14 * 3600 + 30 * 60 + 5;
    // 100ns increments at scale 7
    let time = Time::new(seconds * 10_000_000 + 2_500_000, 7);
    let data = ColumnData::DateTime2(Some(DateTime2::new(
        Date::new(days_from_year_one(date)),
        time,
    )));
    let expected = NaiveDateTime::new(date, NaiveTime::from_hms_milli_opt(14, 30, 5, 250).unwrap());
    assert_eq!(column_data_to_value(data).unwrap(), Value::DateTime(expected));
}

#[test]
fn test_column_data_to_value_time_at_lower_scale() {
    let data = ColumnData::Time(Some(Time::new(86_399_500, 3)));
    let expected = NaiveTime::from_hms_milli_opt(23, 59, 59, 500).unwrap();
    assert_eq!(column_data_to_value(data).unwrap(), Value::Time(expected));
}

// Column type mapping

#[rstest]
#[case(ColumnType::Int4, SqlType::Int)]
#[case(ColumnType::Intn, SqlType::Int)]
#[case(ColumnType::Int8, SqlType::BigInt)]
#[case(ColumnType::NVarchar, SqlType::NVarChar)]
#[case(ColumnType::NText, SqlType::NText)]
#[case(ColumnType::Xml, SqlType::Xml)]
#[case(ColumnType::Guid, SqlType::UniqueIdentifier)]
#[case(ColumnType::SSVariant, SqlType::Variant)]
#[case(ColumnType::Bitn, SqlType::Bit)]
fn test_column_type_to_sql_type(#[case] column_type: ColumnType, #[case] expected: SqlType) {
    assert_eq!(column_type_to_sql_type(column_type), expected);
}

// Parameter conversion tests

#[test]
fn test_bound_to_params_keeps_order_and_type() {
    let params = bound_to_params(&[
        bound(SqlType::NVarChar, Value::String("ACME".into())),
        bound(SqlType::Int, Value::Null),
    ]);
    assert_eq!(params.len(), 2);
    assert_eq!(params[0].sql_type(), SqlType::NVarChar);
    assert_eq!(params[1].sql_type(), SqlType::Int);
}

#[rstest]
#[case(SqlType::Int, ColumnData::I32(None))]
#[case(SqlType::BigInt, ColumnData::I64(None))]
#[case(SqlType::Bit, ColumnData::Bit(None))]
#[case(SqlType::NVarChar, ColumnData::String(None))]
#[case(SqlType::VarBinary, ColumnData::Binary(None))]
#[case(SqlType::UniqueIdentifier, ColumnData::Guid(None))]
fn test_null_parameter_keeps_declared_type(
    #[case] sql_type: SqlType,
    #[case] expected: ColumnData<'static>,
) {
    let params = bound_to_params(&[bound(sql_type, Value::Null)]);
    assert_eq!(params[0].to_sql(), expected);
}

#[test]
fn test_value_parameters() {
    let params = bound_to_params(&[
        bound(SqlType::Bit, Value::Bool(true)),
        bound(SqlType::Int, Value::Int32(42)),
        bound(SqlType::Decimal, Value::Decimal("12.50".into())),
        bound(SqlType::Xml, Value::Xml("<a/>".into())),
    ]);
    assert_eq!(params[0].to_sql(), ColumnData::Bit(Some(true)));
    assert_eq!(params[1].to_sql(), ColumnData::I32(Some(42)));
    assert_eq!(
        params[2].to_sql(),
        ColumnData::String(Some(Cow::Borrowed("12.50")))
    );
    assert_eq!(params[3].to_sql(), ColumnData::String(Some(Cow::Borrowed("<a/>"))));
}
