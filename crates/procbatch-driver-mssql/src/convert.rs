//! Conversions between tiberius column data and procbatch values

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use procbatch::{BoundParameter, ColumnMeta};
use procbatch_core::{BatchError, Result, SqlType, Value};
use tiberius::{Column, ColumnData, ColumnType, ToSql};

/// Convert tiberius ColumnData to a procbatch Value
pub(crate) fn column_data_to_value(col_data: ColumnData<'static>) -> Result<Value> {
    let value = match col_data {
        ColumnData::Bit(v) => v.map(Value::Bool),
        ColumnData::U8(v) => v.map(Value::UInt8),
        ColumnData::I16(v) => v.map(Value::Int16),
        ColumnData::I32(v) => v.map(Value::Int32),
        ColumnData::I64(v) => v.map(Value::Int64),
        ColumnData::F32(v) => v.map(Value::Float32),
        ColumnData::F64(v) => v.map(Value::Float64),
        ColumnData::String(v) => v.map(|s| Value::String(s.into_owned())),
        ColumnData::Guid(v) => v.map(Value::Uuid),
        ColumnData::Binary(v) => v.map(|b| Value::Bytes(b.into_owned())),
        ColumnData::Numeric(v) => v.map(|n| Value::Decimal(n.to_string())),
        ColumnData::Xml(v) => v.map(|x| Value::Xml(x.into_owned().into_string())),
        ColumnData::DateTime(None)
        | ColumnData::SmallDateTime(None)
        | ColumnData::DateTime2(None)
        | ColumnData::DateTimeOffset(None)
        | ColumnData::Date(None)
        | ColumnData::Time(None) => None,
        ColumnData::DateTime(Some(v)) => {
            let time = time_of_day((v.seconds_fragments() as u64 * 10) / 3, 0)?;
            Some(Value::DateTime(NaiveDateTime::new(
                days_since(1900, v.days() as i64)?,
                time,
            )))
        }
        ColumnData::SmallDateTime(Some(v)) => {
            let time = time_of_day(v.seconds_fragments() as u64 * 60_000, 0)?;
            Some(Value::DateTime(NaiveDateTime::new(
                days_since(1900, v.days() as i64)?,
                time,
            )))
        }
        ColumnData::DateTime2(Some(v)) => Some(Value::DateTime(NaiveDateTime::new(
            days_since(1, v.date().days() as i64)?,
            increments_to_time(v.time().increments(), v.time().scale())?,
        ))),
        ColumnData::DateTimeOffset(Some(v)) => {
            let dt2 = v.datetime2();
            let naive = NaiveDateTime::new(
                days_since(1, dt2.date().days() as i64)?,
                increments_to_time(dt2.time().increments(), dt2.time().scale())?,
            );
            Some(Value::DateTimeUtc(naive.and_utc()))
        }
        ColumnData::Date(Some(v)) => Some(Value::Date(days_since(1, v.days() as i64)?)),
        ColumnData::Time(Some(v)) => Some(Value::Time(increments_to_time(
            v.increments(),
            v.scale(),
        )?)),
    };
    Ok(value.unwrap_or(Value::Null))
}

fn days_since(year: i32, days: i64) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|base| base.checked_add_signed(chrono::Duration::days(days)))
        .ok_or_else(|| BatchError::TypeConversion(format!("date out of range: {} days", days)))
}

/// Milliseconds since midnight plus a sub-millisecond nanosecond remainder
fn time_of_day(millis: u64, extra_nanos: u32) -> Result<NaiveTime> {
    let seconds = (millis / 1000) as u32;
    let nanos = ((millis % 1000) as u32) * 1_000_000 + extra_nanos;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos)
        .ok_or_else(|| BatchError::TypeConversion(format!("time out of range: {} ms", millis)))
}

/// Time stored as `increments` units of 10^-scale seconds
fn increments_to_time(increments: u64, scale: u8) -> Result<NaiveTime> {
    let per_second = 10u64.pow(scale as u32);
    let seconds = (increments / per_second) as u32;
    let nanos = ((increments % per_second) * 10u64.pow(9 - scale.min(9) as u32)) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos).ok_or_else(|| {
        BatchError::TypeConversion(format!("time out of range: {} increments", increments))
    })
}

/// Map a tiberius column type to the closest SqlType
pub(crate) fn column_type_to_sql_type(column_type: ColumnType) -> SqlType {
    match column_type {
        ColumnType::Bit | ColumnType::Bitn => SqlType::Bit,
        ColumnType::Int1 => SqlType::TinyInt,
        ColumnType::Int2 => SqlType::SmallInt,
        ColumnType::Int4 | ColumnType::Intn | ColumnType::Null => SqlType::Int,
        ColumnType::Int8 => SqlType::BigInt,
        ColumnType::Float4 => SqlType::Real,
        ColumnType::Float8 | ColumnType::Floatn => SqlType::Float,
        ColumnType::Money | ColumnType::Money4 => SqlType::Money,
        ColumnType::Decimaln | ColumnType::Numericn => SqlType::Decimal,
        ColumnType::Datetime | ColumnType::Datetimen => SqlType::DateTime,
        ColumnType::Datetime4 => SqlType::SmallDateTime,
        ColumnType::Datetime2 => SqlType::DateTime2,
        ColumnType::DatetimeOffsetn => SqlType::DateTimeOffset,
        ColumnType::Daten => SqlType::Date,
        ColumnType::Timen => SqlType::Time,
        ColumnType::Guid => SqlType::UniqueIdentifier,
        ColumnType::BigChar => SqlType::Char,
        ColumnType::BigVarChar => SqlType::VarChar,
        ColumnType::Text => SqlType::Text,
        ColumnType::NChar => SqlType::NChar,
        ColumnType::NVarchar => SqlType::NVarChar,
        ColumnType::NText => SqlType::NText,
        ColumnType::BigBinary => SqlType::Binary,
        ColumnType::BigVarBin | ColumnType::Udt => SqlType::VarBinary,
        ColumnType::Image => SqlType::Image,
        ColumnType::Xml => SqlType::Xml,
        ColumnType::SSVariant => SqlType::Variant,
    }
}

/// Convert a tiberius column to ColumnMeta
pub(crate) fn column_to_meta(column: &Column, ordinal: usize) -> ColumnMeta {
    ColumnMeta::new(
        column.name(),
        column_type_to_sql_type(column.column_type()),
        ordinal,
    )
}

/// A bound parameter in the shape tiberius sends.
///
/// NULLs keep the declared type so the server-side variable is typed the same
/// as the procedure parameter it feeds.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TiberiusParam {
    sql_type: SqlType,
    value: Value,
}

impl TiberiusParam {
    pub(crate) fn sql_type(&self) -> SqlType {
        self.sql_type
    }
}

impl ToSql for TiberiusParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match &self.value {
            Value::Null => typed_null(self.sql_type),
            Value::Bool(v) => ColumnData::Bit(Some(*v)),
            Value::UInt8(v) => ColumnData::U8(Some(*v)),
            Value::Int16(v) => ColumnData::I16(Some(*v)),
            Value::Int32(v) => ColumnData::I32(Some(*v)),
            Value::Int64(v) => ColumnData::I64(Some(*v)),
            Value::Float32(v) => ColumnData::F32(Some(*v)),
            Value::Float64(v) => ColumnData::F64(Some(*v)),
            Value::Decimal(v) | Value::String(v) | Value::Xml(v) => {
                ColumnData::String(Some(Cow::Borrowed(v.as_str())))
            }
            Value::Bytes(v) => ColumnData::Binary(Some(Cow::Borrowed(v.as_slice()))),
            Value::Uuid(v) => ColumnData::Guid(Some(*v)),
            Value::Date(v) => v.to_sql(),
            Value::Time(v) => v.to_sql(),
            Value::DateTime(v) => v.to_sql(),
            Value::DateTimeUtc(v) => v.to_sql(),
        }
    }
}

fn typed_null(sql_type: SqlType) -> ColumnData<'static> {
    match sql_type {
        SqlType::Bit => ColumnData::Bit(None),
        SqlType::TinyInt => ColumnData::U8(None),
        SqlType::SmallInt => ColumnData::I16(None),
        SqlType::Int => ColumnData::I32(None),
        SqlType::BigInt => ColumnData::I64(None),
        SqlType::Real => ColumnData::F32(None),
        SqlType::Float => ColumnData::F64(None),
        SqlType::Binary | SqlType::VarBinary | SqlType::Image => ColumnData::Binary(None),
        SqlType::UniqueIdentifier => ColumnData::Guid(None),
        SqlType::Date => ColumnData::Date(None),
        SqlType::Time => ColumnData::Time(None),
        SqlType::DateTime | SqlType::DateTime2 | SqlType::SmallDateTime => {
            ColumnData::DateTime2(None)
        }
        SqlType::DateTimeOffset => ColumnData::DateTimeOffset(None),
        SqlType::Decimal
        | SqlType::Money
        | SqlType::Char
        | SqlType::VarChar
        | SqlType::Text
        | SqlType::NChar
        | SqlType::NVarChar
        | SqlType::NText
        | SqlType::Xml
        | SqlType::Variant => ColumnData::String(None),
    }
}

/// Convert bound parameters to tiberius parameters, in binding order
pub(crate) fn bound_to_params(parameters: &[BoundParameter]) -> Vec<TiberiusParam> {
    parameters
        .iter()
        .map(|p| TiberiusParam {
            sql_type: p.sql_type,
            value: p.value.clone(),
        })
        .collect()
}
