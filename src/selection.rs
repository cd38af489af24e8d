//! Field selection trees
//!
//! The fetch engine plans queries from a plain tree of selected field names
//! rather than from the GraphQL AST: leaves are scalar fields, nested nodes
//! are relations or envelope fields such as `data`.

use async_graphql::SelectionField;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::{ApiError, ApiResult};

/// Deepest nesting accepted when reading a GraphQL selection.
pub const MAX_DEPTH: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum Selected {
    Leaf,
    Nested(FieldSelection),
}

/// Ordered map of selected field names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSelection {
    fields: IndexMap<String, Selected>,
}

impl FieldSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selection below `field`, with fragments flattened and repeated
    /// fields merged.
    ///
    /// Sub-selections nested deeper than [`MAX_DEPTH`] are rejected.
    pub fn from_field(field: SelectionField<'_>) -> ApiResult<Self> {
        Self::collect(field, 1)
    }

    fn collect(field: SelectionField<'_>, depth: usize) -> ApiResult<Self> {
        let mut selection = Self::new();
        for child in field.selection_set() {
            let has_children = child.selection_set().next().is_some();
            let selected = if !has_children {
                Selected::Leaf
            } else if depth >= MAX_DEPTH {
                return Err(too_deep(child.name()));
            } else {
                Selected::Nested(Self::collect(child, depth + 1)?)
            };
            selection.merge(child.name(), selected);
        }
        Ok(selection)
    }

    fn merge(&mut self, name: &str, selected: Selected) {
        match (self.fields.get_mut(name), selected) {
            (Some(Selected::Nested(existing)), Selected::Nested(incoming)) => {
                for (child, sel) in incoming.fields {
                    existing.merge(&child, sel);
                }
            }
            (Some(_), Selected::Leaf) => {}
            (_, selected) => {
                self.fields.insert(name.to_string(), selected);
            }
        }
    }

    /// Build from a JSON shape such as `{"name": true, "author": {"name": true}}`.
    pub fn from_json(value: &JsonValue) -> Self {
        let mut selection = Self::new();
        if let Some(object) = value.as_object() {
            for (name, child) in object {
                let selected = match child {
                    JsonValue::Object(_) => Selected::Nested(Self::from_json(child)),
                    _ => Selected::Leaf,
                };
                selection.merge(name, selected);
            }
        }
        selection
    }

    pub fn leaf(mut self, name: &str) -> Self {
        self.merge(name, Selected::Leaf);
        self
    }

    pub fn nested(mut self, name: &str, selection: FieldSelection) -> Self {
        self.merge(name, Selected::Nested(selection));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Selected> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Sub-selection of a nested field.
    pub fn sub(&self, name: &str) -> Option<&FieldSelection> {
        match self.fields.get(name) {
            Some(Selected::Nested(selection)) => Some(selection),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Selected)> {
        self.fields.iter().map(|(name, selected)| (name.as_str(), selected))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

}

fn too_deep(name: &str) -> ApiError {
    ApiError::invalid_selection(format!(
        "Selection of '{name}' is nested deeper than {MAX_DEPTH} levels"
    ))
}
