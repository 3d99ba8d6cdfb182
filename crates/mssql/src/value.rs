use std::borrow::Cow;

use dbshape_core::SqlValue;
use tiberius::{ColumnData, ToSql};

/// Borrowed query parameter bound as `@P<n>`.
pub(crate) struct Param<'a>(pub(crate) &'a SqlValue);

impl ToSql for Param<'_> {
    fn to_sql(&self) -> ColumnData<'_> {
        match self.0 {
            SqlValue::Null => ColumnData::String(None),
            SqlValue::Bool(value) => ColumnData::Bit(Some(*value)),
            SqlValue::Int(value) => ColumnData::I64(Some(*value)),
            SqlValue::Text(value) => ColumnData::String(Some(Cow::Borrowed(value.as_str()))),
        }
    }
}

/// Catalog queries cast their projections to text or integers; anything
/// else is carried as its display form.
pub(crate) fn column_value(data: ColumnData<'_>) -> SqlValue {
    match data {
        ColumnData::U8(value) => value.map_or(SqlValue::Null, |value| SqlValue::Int(i64::from(value))),
        ColumnData::I16(value) => value.map_or(SqlValue::Null, |value| SqlValue::Int(i64::from(value))),
        ColumnData::I32(value) => value.map_or(SqlValue::Null, |value| SqlValue::Int(i64::from(value))),
        ColumnData::I64(value) => value.map_or(SqlValue::Null, SqlValue::Int),
        ColumnData::Bit(value) => value.map_or(SqlValue::Null, SqlValue::Bool),
        ColumnData::String(value) => {
            value.map_or(SqlValue::Null, |value| SqlValue::Text(value.into_owned()))
        }
        ColumnData::F32(value) => value.map_or(SqlValue::Null, |value| SqlValue::Text(value.to_string())),
        ColumnData::F64(value) => value.map_or(SqlValue::Null, |value| SqlValue::Text(value.to_string())),
        ColumnData::Numeric(value) => {
            value.map_or(SqlValue::Null, |value| SqlValue::Text(value.to_string()))
        }
        ColumnData::Guid(value) => value.map_or(SqlValue::Null, |value| SqlValue::Text(value.to_string())),
        _ => SqlValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use dbshape_core::SqlValue;
    use tiberius::{ColumnData, ToSql};

    use super::{Param, column_value};

    #[test]
    fn params_bind_as_native_types() {
        let text = SqlValue::from("main");
        let number = SqlValue::from(42_i64);

        assert_eq!(
            Param(&text).to_sql(),
            ColumnData::String(Some(Cow::Borrowed("main")))
        );
        assert_eq!(Param(&number).to_sql(), ColumnData::I64(Some(42)));
        assert_eq!(Param(&SqlValue::Null).to_sql(), ColumnData::String(None));
    }

    #[test]
    fn columns_decode_to_sql_values() {
        assert_eq!(column_value(ColumnData::I32(Some(7))), SqlValue::Int(7));
        assert_eq!(column_value(ColumnData::U8(None)), SqlValue::Null);
        assert_eq!(column_value(ColumnData::Bit(Some(true))), SqlValue::Bool(true));
        assert_eq!(
            column_value(ColumnData::String(Some(Cow::Owned("varchar".to_string())))),
            SqlValue::Text("varchar".to_string())
        );
    }
}
