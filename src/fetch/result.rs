//! Nested result rows produced by the fetch engine

use async_graphql::Value;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::orm::SqlValue;

/// Value of one field in a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(SqlValue),
    /// Key-holder relation: the linked row, if any
    One(Option<Row>),
    /// Inverse or many-to-many relation: children keyed by primary key
    Many(IndexMap<String, Row>),
}

impl FieldValue {
    pub fn to_graphql(&self) -> Value {
        match self {
            FieldValue::Scalar(value) => value.to_graphql(),
            FieldValue::One(row) => row.as_ref().map(Row::to_graphql).unwrap_or(Value::Null),
            FieldValue::Many(rows) => Value::List(rows.values().map(Row::to_graphql).collect()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Scalar(value) => value.to_json(),
            FieldValue::One(row) => row.as_ref().map(Row::to_json).unwrap_or(JsonValue::Null),
            FieldValue::Many(rows) => JsonValue::Array(rows.values().map(Row::to_json).collect()),
        }
    }
}

/// One fetched object: field name -> value, in selection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: IndexMap<String, FieldValue>,
}

impl Row {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn scalar(&self, name: &str) -> Option<&SqlValue> {
        match self.fields.get(name) {
            Some(FieldValue::Scalar(value)) => Some(value),
            _ => None,
        }
    }

    pub fn to_graphql(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(name, value)| (async_graphql::Name::new(name), value.to_graphql()))
                .collect(),
        )
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.fields
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }
}

/// Root rows keyed by primary key, in query order.
pub type ResultSet = IndexMap<String, Row>;

/// Shape of a fetch: plain rows, or the paginated envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Rows(ResultSet),
    Page {
        data: Option<ResultSet>,
        on_page_count: Option<usize>,
    },
}

impl FetchResult {
    /// First row, for single-object actions.
    pub fn into_first(self) -> Option<Row> {
        let rows = match self {
            FetchResult::Rows(rows) => rows,
            FetchResult::Page { data, .. } => data?,
        };
        rows.into_iter().next().map(|(_, row)| row)
    }

    /// Plain rows become a list; the envelope becomes `{data, onPageCount}`
    /// with only the requested keys present.
    pub fn to_graphql(&self) -> Value {
        match self {
            FetchResult::Rows(rows) => list(rows),
            FetchResult::Page {
                data,
                on_page_count,
            } => {
                let mut envelope = IndexMap::new();
                if let Some(rows) = data {
                    envelope.insert(async_graphql::Name::new("data"), list(rows));
                }
                if let Some(count) = on_page_count {
                    envelope.insert(
                        async_graphql::Name::new("onPageCount"),
                        Value::from(*count as i64),
                    );
                }
                Value::Object(envelope)
            }
        }
    }

    pub fn to_json(&self) -> JsonValue {
        self.to_graphql().into_json().unwrap_or(JsonValue::Null)
    }
}

fn list(rows: &ResultSet) -> Value {
    Value::List(rows.values().map(Row::to_graphql).collect())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_page_envelope_only_carries_requested_keys() {
        let mut row = Row::default();
        row.insert("uuid", FieldValue::Scalar(SqlValue::from("a")));
        row.insert("author", FieldValue::One(None));
        row.insert("tags", FieldValue::Many(IndexMap::new()));

        let mut rows = ResultSet::new();
        rows.insert("a".into(), row);

        let page = FetchResult::Page {
            data: Some(rows),
            on_page_count: None,
        };
        assert_eq!(
            page.to_json(),
            json!({"data": [{"uuid": "a", "author": null, "tags": []}]})
        );
        assert_eq!(
            page.into_first().unwrap().scalar("uuid"),
            Some(&SqlValue::from("a"))
        );
    }
}
