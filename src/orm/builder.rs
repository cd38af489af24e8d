//! Projection query builder
//!
//! Builds parameterized `SELECT` statements over one entity table (aliased
//! `this`) with an explicit projection list, optional joins, filters,
//! ordering and pagination. Rows are decoded into ordered maps of
//! [`SqlValue`]s because the projection is only known at request time.

use std::sync::Arc;

use indexmap::IndexMap;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqliteConnection, TypeInfo, ValueRef};

use super::traits::{OrderDirection, SqlValue};
use crate::catalog::{ColumnType, EntityStructure, ID_NAME};

/// One decoded row: projection alias -> value, in projection order.
pub type SqlRow = IndexMap<String, SqlValue>;

/// A projected expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub alias: String,
    pub expr: String,
    /// Column type used to interpret the stored value, if known
    pub column_type: Option<ColumnType>,
}

/// A query builder for one entity.
#[derive(Debug, Clone)]
pub struct EntityQuery {
    entity: Arc<EntityStructure>,
    projections: Vec<Projection>,
    joins: Vec<String>,
    where_clauses: Vec<String>,
    values: Vec<SqlValue>,
    order_by: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    /// Select modifiers registered on this query only (collection sources)
    modifiers: IndexMap<String, String>,
}

impl EntityQuery {
    /// Create a new query builder for the entity.
    pub fn new(entity: Arc<EntityStructure>) -> Self {
        Self {
            entity,
            projections: Vec::new(),
            joins: Vec::new(),
            where_clauses: Vec::new(),
            values: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            modifiers: IndexMap::new(),
        }
    }

    pub fn entity(&self) -> &Arc<EntityStructure> {
        &self.entity
    }

    /// Add a projected expression.
    pub fn select(
        mut self,
        alias: impl Into<String>,
        expr: impl Into<String>,
        column_type: Option<ColumnType>,
    ) -> Self {
        let alias = alias.into();
        self.projections.retain(|p| p.alias != alias);
        self.projections.push(Projection {
            alias,
            expr: expr.into(),
            column_type,
        });
        self
    }

    /// Drop every projection, keeping joins, filters and ordering.
    pub fn clear_select(mut self) -> Self {
        self.projections.clear();
        self
    }

    /// Add a raw JOIN clause (e.g. `JOIN author AS relation ON ...`).
    pub fn join(mut self, clause: impl Into<String>) -> Self {
        self.joins.push(clause.into());
        self
    }

    /// Add a raw WHERE clause condition with its bound values.
    pub fn where_raw(mut self, condition: impl Into<String>, values: Vec<SqlValue>) -> Self {
        self.where_clauses.push(condition.into());
        self.values.extend(values);
        self
    }

    pub fn where_eq(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.where_raw(format!("{column} = ?"), vec![value.into()])
    }

    /// `column IN (...)`; an empty list matches nothing.
    pub fn where_in(self, column: &str, values: Vec<SqlValue>) -> Self {
        if values.is_empty() {
            return self.where_raw("0 = 1", Vec::new());
        }
        let condition = format!("{column} IN ({})", placeholders(values.len()));
        self.where_raw(condition, values)
    }

    /// Add sorting to the query.
    pub fn order_by(mut self, expr: impl AsRef<str>, direction: OrderDirection) -> Self {
        self.order_by
            .push(format!("{} {}", expr.as_ref(), direction.to_sql()));
        self
    }

    pub fn has_order(&self) -> bool {
        !self.order_by.is_empty()
    }

    /// Drop ordering and pagination (used by total counts).
    pub fn unpaged(mut self) -> Self {
        self.order_by.clear();
        self.limit = None;
        self.offset = None;
        self
    }

    /// Set limit directly.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set offset directly.
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Register a computed column for this query only.
    pub fn select_modifier(mut self, alias: impl Into<String>, expr: impl Into<String>) -> Self {
        self.modifiers.insert(alias.into(), expr.into());
        self
    }

    /// Look up a computed column on this query, then on the entity.
    pub fn modifier(&self, alias: &str) -> Option<&str> {
        self.modifiers
            .get(alias)
            .map(String::as_str)
            .or_else(|| self.entity.select_modifier(alias))
    }

    fn push_from(&self, sql: &mut String) {
        sql.push_str(&format!(" FROM {} AS this", self.entity.name));

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }

        if !self.where_clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_clauses.join(" AND "));
        }
    }

    /// Build the SQL query string.
    pub fn build_sql(&self) -> String {
        let projection = if self.projections.is_empty() {
            format!("this.{ID_NAME} AS {ID_NAME}")
        } else {
            self.projections
                .iter()
                .map(|p| format!("{} AS {}", p.expr, p.alias))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {projection}");
        self.push_from(&mut sql);

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) if offset > 0 => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
            }
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) if offset > 0 => {
                sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset));
            }
            _ => {}
        }

        sql
    }

    /// Build a COUNT query string, ignoring ordering and pagination.
    pub fn build_count_sql(&self) -> String {
        let mut sql = format!("SELECT COUNT(DISTINCT this.{ID_NAME})");
        self.push_from(&mut sql);
        sql
    }

    /// Execute the query and decode every row.
    pub async fn fetch_rows(&self, conn: &mut SqliteConnection) -> Result<Vec<SqlRow>, sqlx::Error> {
        let sql = self.build_sql();
        tracing::debug!(sql = %sql, binds = self.values.len(), "Executing entity query");

        let mut query = sqlx::query(&sql);
        for value in &self.values {
            query = value.bind_to_query(query);
        }

        let rows = query.fetch_all(&mut *conn).await?;
        rows.iter().map(|row| self.decode_row(row)).collect()
    }

    /// Execute a COUNT query.
    pub async fn count(&self, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
        let sql = self.build_count_sql();
        tracing::debug!(sql = %sql, "Executing count query");

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in &self.values {
            query = value.bind_to_scalar(query);
        }

        query.fetch_one(&mut *conn).await
    }

    fn decode_row(&self, row: &SqliteRow) -> Result<SqlRow, sqlx::Error> {
        let mut decoded = SqlRow::with_capacity(row.columns().len());

        for (index, column) in row.columns().iter().enumerate() {
            let raw = row.try_get_raw(index)?;
            let value = if raw.is_null() {
                SqlValue::Null
            } else {
                let type_name = raw.type_info().name().to_ascii_uppercase();
                match type_name.as_str() {
                    "INTEGER" | "BOOLEAN" | "INT8" => SqlValue::Int(row.try_get_unchecked(index)?),
                    "REAL" | "NUMERIC" => SqlValue::Float(row.try_get_unchecked(index)?),
                    _ => SqlValue::String(row.try_get_unchecked(index)?),
                }
            };

            let column_type = self
                .projections
                .iter()
                .find(|p| p.alias == column.name())
                .and_then(|p| p.column_type);
            let value = match column_type {
                Some(ty) => value.coerce(ty),
                None => value,
            };

            decoded.insert(column.name().to_string(), value);
        }

        Ok(decoded)
    }
}

/// Largest number of keys bound into one `IN (...)` list; SQLite caps
/// bound parameters per statement.
pub const KEY_CHUNK_SIZE: usize = 500;

/// `?, ?, ?` for `count` bound values.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
