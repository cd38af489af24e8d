//! Dynamically typed SQL values and sort direction

use serde_json::Value as JsonValue;
use sqlx::Sqlite;
use sqlx::query::{Query, QueryScalar};
use sqlx::sqlite::SqliteArguments;

use crate::catalog::ColumnType;

/// Sort direction for ORDER BY clauses.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum OrderDirection {
    #[default]
    #[serde(rename = "ASC", alias = "asc")]
    Asc,
    #[serde(rename = "DESC", alias = "desc")]
    Desc,
}

impl OrderDirection {
    /// Convert to SQL order string
    pub fn to_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// Represents a SQL value that can be bound to a query or was read from a row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Json(JsonValue),
    Null,
}

impl SqlValue {
    /// Bind this value to a sqlx query builder
    pub fn bind_to_query<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            SqlValue::String(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Bool(b) => query.bind(if *b { 1i32 } else { 0i32 }),
            SqlValue::Json(v) => query.bind(v.to_string()),
            SqlValue::Null => query.bind(None::<String>),
        }
    }

    /// Bind this value to a scalar query (COUNT and friends)
    pub fn bind_to_scalar<'q, O>(
        &'q self,
        query: QueryScalar<'q, Sqlite, O, SqliteArguments<'q>>,
    ) -> QueryScalar<'q, Sqlite, O, SqliteArguments<'q>> {
        match self {
            SqlValue::String(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Bool(b) => query.bind(if *b { 1i32 } else { 0i32 }),
            SqlValue::Json(v) => query.bind(v.to_string()),
            SqlValue::Null => query.bind(None::<String>),
        }
    }

    /// Convert a JSON input value for a column of type `column_type`.
    ///
    /// Returns `None` when the value cannot be stored in that column.
    pub fn from_json(value: &JsonValue, column_type: ColumnType) -> Option<SqlValue> {
        if value.is_null() {
            return Some(SqlValue::Null);
        }
        match column_type {
            ColumnType::String | ColumnType::DateTime | ColumnType::Date => match value {
                JsonValue::String(s) => Some(SqlValue::String(s.clone())),
                JsonValue::Number(n) => Some(SqlValue::String(n.to_string())),
                _ => None,
            },
            ColumnType::Int => match value {
                JsonValue::Number(n) => n.as_i64().map(SqlValue::Int),
                JsonValue::Bool(b) => Some(SqlValue::Int(i64::from(*b))),
                JsonValue::String(s) => s.parse().ok().map(SqlValue::Int),
                _ => None,
            },
            ColumnType::Float => match value {
                JsonValue::Number(n) => n.as_f64().map(SqlValue::Float),
                JsonValue::String(s) => s.parse().ok().map(SqlValue::Float),
                _ => None,
            },
            ColumnType::Bool => match value {
                JsonValue::Bool(b) => Some(SqlValue::Bool(*b)),
                JsonValue::Number(n) => n.as_i64().map(|i| SqlValue::Bool(i != 0)),
                _ => None,
            },
            ColumnType::Json => Some(SqlValue::Json(value.clone())),
        }
    }

    /// Apply a column type to a value decoded from SQLite's storage classes.
    pub fn coerce(self, column_type: ColumnType) -> SqlValue {
        match (column_type, self) {
            (ColumnType::Bool, SqlValue::Int(i)) => SqlValue::Bool(i != 0),
            (ColumnType::Float, SqlValue::Int(i)) => SqlValue::Float(i as f64),
            (ColumnType::Json, SqlValue::String(s)) => match serde_json::from_str(&s) {
                Ok(json) => SqlValue::Json(json),
                Err(_) => SqlValue::String(s),
            },
            (_, value) => value,
        }
    }

    /// Primary/foreign key representation of the value.
    pub fn as_key(&self) -> Option<String> {
        match self {
            SqlValue::String(s) => Some(s.clone()),
            SqlValue::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::String(s) => JsonValue::String(s.clone()),
            SqlValue::Int(i) => JsonValue::from(*i),
            SqlValue::Float(f) => JsonValue::from(*f),
            SqlValue::Bool(b) => JsonValue::Bool(*b),
            SqlValue::Json(v) => v.clone(),
            SqlValue::Null => JsonValue::Null,
        }
    }

    pub fn to_graphql(&self) -> async_graphql::Value {
        use async_graphql::Value;

        match self {
            SqlValue::String(s) => Value::String(s.clone()),
            SqlValue::Int(i) => Value::from(*i),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Bool(b) => Value::Boolean(*b),
            SqlValue::Json(v) => Value::from_json(v.clone()).unwrap_or(Value::Null),
            SqlValue::Null => Value::Null,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::String(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::String(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_json_respects_column_type() {
        assert_eq!(
            SqlValue::from_json(&json!(true), ColumnType::Bool),
            Some(SqlValue::Bool(true))
        );
        assert_eq!(
            SqlValue::from_json(&json!("12"), ColumnType::Int),
            Some(SqlValue::Int(12))
        );
        assert_eq!(SqlValue::from_json(&json!([1]), ColumnType::String), None);
        assert_eq!(
            SqlValue::from_json(&json!(null), ColumnType::Float),
            Some(SqlValue::Null)
        );
    }

    #[test]
    fn test_coerce_decoded_values() {
        assert_eq!(SqlValue::Int(0).coerce(ColumnType::Bool), SqlValue::Bool(false));
        assert_eq!(
            SqlValue::String("{\"a\":1}".into()).coerce(ColumnType::Json),
            SqlValue::Json(json!({"a": 1}))
        );
        assert_eq!(
            SqlValue::String("plain".into()).coerce(ColumnType::Json),
            SqlValue::String("plain".into())
        );
    }

    #[test]
    fn test_order_direction_deserializes_from_enum_name() {
        let dir: OrderDirection = serde_json::from_value(json!("DESC")).unwrap();
        assert_eq!(dir.to_sql(), "DESC");
    }
}
