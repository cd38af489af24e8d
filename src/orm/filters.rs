//! JSON filter expressions for many queries
//!
//! A filter is a JSON object keyed by column name (`this.` prefix optional):
//! - a scalar value means equality, `null` means `IS NULL`
//! - an object maps operators to operands:
//!   `Eq`, `Ne`, `Lt`, `Lte`, `Gt`, `Gte`, `In`, `NotIn`,
//!   `Contains`, `StartsWith`, `EndsWith`, `IsNull`
//! - `And` / `Or` take arrays of filter objects, `Not` takes one filter object
//!
//! Sibling keys are combined with AND. Every operand is bound as a parameter.

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use super::builder::placeholders;
use super::traits::SqlValue;
use crate::catalog::{ColumnType, EntityStructure, ID_NAME};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter must be a JSON object")]
    NotAnObject,

    #[error("'{0}' expects an array of filter objects")]
    NotAList(String),

    #[error("unknown filter column '{0}'")]
    UnknownColumn(String),

    #[error("unknown filter operator '{0}'")]
    UnknownOperator(String),

    #[error("invalid operand for {column} {op}")]
    InvalidValue { column: String, op: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
}

impl FilterOp {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "Eq" => FilterOp::Eq,
            "Ne" => FilterOp::Ne,
            "Lt" => FilterOp::Lt,
            "Lte" => FilterOp::Lte,
            "Gt" => FilterOp::Gt,
            "Gte" => FilterOp::Gte,
            "In" => FilterOp::In,
            "NotIn" => FilterOp::NotIn,
            "Contains" => FilterOp::Contains,
            "StartsWith" => FilterOp::StartsWith,
            "EndsWith" => FilterOp::EndsWith,
            "IsNull" => FilterOp::IsNull,
            _ => return None,
        })
    }

    fn comparison(self) -> Option<&'static str> {
        Some(match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            _ => return None,
        })
    }
}

/// Parsed filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
    Condition {
        column: String,
        op: FilterOp,
        operand: JsonValue,
    },
}

impl FilterExpr {
    /// Parse a filter object.
    pub fn parse(value: &JsonValue) -> Result<FilterExpr, FilterError> {
        let object = value.as_object().ok_or(FilterError::NotAnObject)?;
        Self::parse_object(object)
    }

    fn parse_object(object: &Map<String, JsonValue>) -> Result<FilterExpr, FilterError> {
        let mut parts = Vec::with_capacity(object.len());

        for (key, value) in object {
            match key.as_str() {
                "And" | "Or" => {
                    let items = value
                        .as_array()
                        .ok_or_else(|| FilterError::NotAList(key.clone()))?;
                    let children = items
                        .iter()
                        .map(Self::parse)
                        .collect::<Result<Vec<_>, _>>()?;
                    parts.push(if key == "And" {
                        FilterExpr::And(children)
                    } else {
                        FilterExpr::Or(children)
                    });
                }
                "Not" => parts.push(FilterExpr::Not(Box::new(Self::parse(value)?))),
                column => {
                    let column = column.strip_prefix("this.").unwrap_or(column).to_string();
                    match value {
                        JsonValue::Object(ops) => {
                            for (op, operand) in ops {
                                let op = FilterOp::parse(op)
                                    .ok_or_else(|| FilterError::UnknownOperator(op.clone()))?;
                                parts.push(FilterExpr::Condition {
                                    column: column.clone(),
                                    op,
                                    operand: operand.clone(),
                                });
                            }
                        }
                        JsonValue::Null => parts.push(FilterExpr::Condition {
                            column,
                            op: FilterOp::IsNull,
                            operand: JsonValue::Bool(true),
                        }),
                        JsonValue::Array(_) => parts.push(FilterExpr::Condition {
                            column,
                            op: FilterOp::In,
                            operand: value.clone(),
                        }),
                        scalar => parts.push(FilterExpr::Condition {
                            column,
                            op: FilterOp::Eq,
                            operand: scalar.clone(),
                        }),
                    }
                }
            }
        }

        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            FilterExpr::And(parts)
        })
    }

    /// Compile into a WHERE fragment over `this` plus its bound values.
    ///
    /// Translated columns compare against the active translation `key`.
    pub fn compile(
        &self,
        entity: &EntityStructure,
        translation: &str,
    ) -> Result<(String, Vec<SqlValue>), FilterError> {
        let mut values = Vec::new();
        let sql = self.compile_into(entity, translation, &mut values)?;
        Ok((sql, values))
    }

    fn compile_into(
        &self,
        entity: &EntityStructure,
        translation: &str,
        values: &mut Vec<SqlValue>,
    ) -> Result<String, FilterError> {
        match self {
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                if children.is_empty() {
                    return Ok(if matches!(self, FilterExpr::And(_)) {
                        "1 = 1".to_string()
                    } else {
                        "0 = 1".to_string()
                    });
                }
                let joiner = if matches!(self, FilterExpr::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                let parts = children
                    .iter()
                    .map(|c| c.compile_into(entity, translation, values))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(joiner)))
            }
            FilterExpr::Not(inner) => Ok(format!(
                "NOT ({})",
                inner.compile_into(entity, translation, values)?
            )),
            FilterExpr::Condition {
                column,
                op,
                operand,
            } => {
                let (expr, column_type) = resolve_column(entity, column, translation)?;
                let invalid = || FilterError::InvalidValue {
                    column: column.clone(),
                    op: format!("{op:?}"),
                };
                let bind = |value: &JsonValue| SqlValue::from_json(value, column_type);

                if let Some(cmp) = op.comparison() {
                    if operand.is_null() {
                        return match op {
                            FilterOp::Eq => Ok(format!("{expr} IS NULL")),
                            FilterOp::Ne => Ok(format!("{expr} IS NOT NULL")),
                            _ => Err(invalid()),
                        };
                    }
                    if operand.is_array() || operand.is_object() {
                        return Err(invalid());
                    }
                    values.push(bind(operand).ok_or_else(invalid)?);
                    return Ok(format!("{expr} {cmp} ?"));
                }

                match op {
                    FilterOp::In | FilterOp::NotIn => {
                        let items = operand.as_array().ok_or_else(invalid)?;
                        if items.is_empty() {
                            return Ok(if *op == FilterOp::In {
                                "0 = 1".to_string()
                            } else {
                                "1 = 1".to_string()
                            });
                        }
                        for item in items {
                            if item.is_null() || item.is_array() || item.is_object() {
                                return Err(invalid());
                            }
                            values.push(bind(item).ok_or_else(invalid)?);
                        }
                        let keyword = if *op == FilterOp::In { "IN" } else { "NOT IN" };
                        Ok(format!("{expr} {keyword} ({})", placeholders(items.len())))
                    }
                    FilterOp::Contains | FilterOp::StartsWith | FilterOp::EndsWith => {
                        let needle = operand.as_str().ok_or_else(invalid)?;
                        values.push(SqlValue::String(needle.to_string()));
                        Ok(match op {
                            FilterOp::Contains => format!("{expr} LIKE '%' || ? || '%'"),
                            FilterOp::StartsWith => format!("{expr} LIKE ? || '%'"),
                            _ => format!("{expr} LIKE '%' || ?"),
                        })
                    }
                    FilterOp::IsNull => match operand.as_bool().ok_or_else(invalid)? {
                        true => Ok(format!("{expr} IS NULL")),
                        false => Ok(format!("{expr} IS NOT NULL")),
                    },
                    _ => Err(invalid()),
                }
            }
        }
    }
}

/// SQL expression and type of a filterable column.
fn resolve_column(
    entity: &EntityStructure,
    column: &str,
    translation: &str,
) -> Result<(String, ColumnType), FilterError> {
    if column == ID_NAME || entity.foreign_keys().any(|(key, _)| key == column) {
        return Ok((format!("this.{column}"), ColumnType::String));
    }
    match entity.column(column) {
        Some(c) if c.translated => Ok((
            format!(
                "this.{}",
                EntityStructure::translated_column(column, translation)
            ),
            c.column_type,
        )),
        Some(c) => Ok((format!("this.{column}"), c.column_type)),
        None => Err(FilterError::UnknownColumn(column.to_string())),
    }
}
