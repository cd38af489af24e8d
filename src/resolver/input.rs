//! Mutation input handling
//!
//! An input object mixes plain column values with relation directives:
//! - `<rel>IDs: {add, remove, replace}` edits the set of linked keys
//! - `<rel>ID: key | null` points a relation at one key (or clears it)
//! - `<rel>OBJs: [object]` / `<rel>OBJ: object` writes nested objects and
//!   links the resulting keys
//!
//! [`split_input`] separates the three kinds; [`persist`] writes one object
//! (nested objects first, then the row, then its relations).

use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use sqlx::SqliteConnection;

use crate::catalog::{Catalog, EntityStructure, ID_NAME};
use crate::error::{ApiError, ApiResult};
use crate::orm::{SqlValue, writer};

pub type InputMap = Map<String, JsonValue>;

const IDS_SUFFIX: &str = "IDs";
const ID_SUFFIX: &str = "ID";
const OBJS_SUFFIX: &str = "OBJs";
const OBJ_SUFFIX: &str = "OBJ";

/// Key edits for one relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelationIds {
    pub add: Vec<String>,
    pub remove: Vec<String>,
    /// `Some(vec![])` detaches everything
    pub replace: Option<Vec<String>>,
}

/// Nested objects written before their owner.
#[derive(Debug, Clone, PartialEq)]
pub enum NestedObjects {
    One(Option<InputMap>),
    Many(Vec<InputMap>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitInput {
    pub plain: InputMap,
    pub relations: IndexMap<String, RelationIds>,
    pub objects: IndexMap<String, NestedObjects>,
}

fn invalid_directive(key: &str) -> ApiError {
    ApiError::bad_request(format!("Invalid value for '{key}'"))
}

/// Separate plain fields from relation directives.
///
/// Keys naming a real column always stay plain.
pub fn split_input(entity: &EntityStructure, input: InputMap) -> ApiResult<SplitInput> {
    let mut split = SplitInput::default();

    for (key, value) in input {
        if key == ID_NAME || entity.column(&key).is_some() {
            split.plain.insert(key, value);
            continue;
        }

        let directive = [IDS_SUFFIX, OBJS_SUFFIX, ID_SUFFIX, OBJ_SUFFIX]
            .into_iter()
            .find_map(|suffix| {
                key.strip_suffix(suffix)
                    .filter(|rel| !rel.is_empty())
                    .map(|rel| (rel.to_string(), suffix))
            });

        let Some((relation, suffix)) = directive else {
            split.plain.insert(key, value);
            continue;
        };

        if entity.relation(&relation).is_none() {
            return Err(ApiError::bad_request(format!(
                "Unknown relation '{relation}' in '{key}'"
            )));
        }

        match suffix {
            IDS_SUFFIX => {
                // Omitted list arguments may arrive as explicit nulls.
                let value = match value {
                    JsonValue::Object(edits) => JsonValue::Object(
                        edits.into_iter().filter(|(_, v)| !v.is_null()).collect(),
                    ),
                    other => other,
                };
                let ids: RelationIds =
                    serde_json::from_value(value).map_err(|_| invalid_directive(&key))?;
                split.relations.insert(relation, ids);
            }
            ID_SUFFIX => {
                let replace = match value {
                    JsonValue::Null => Vec::new(),
                    JsonValue::String(id) => vec![id],
                    _ => return Err(invalid_directive(&key)),
                };
                split.relations.insert(
                    relation,
                    RelationIds {
                        replace: Some(replace),
                        ..Default::default()
                    },
                );
            }
            OBJS_SUFFIX => {
                let objects = match value {
                    JsonValue::Array(items) => items
                        .into_iter()
                        .map(|item| match item {
                            JsonValue::Object(object) => Ok(object),
                            _ => Err(invalid_directive(&key)),
                        })
                        .collect::<ApiResult<Vec<_>>>()?,
                    _ => return Err(invalid_directive(&key)),
                };
                split.objects.insert(relation, NestedObjects::Many(objects));
            }
            _ => {
                let object = match value {
                    JsonValue::Null => None,
                    JsonValue::Object(object) => Some(object),
                    _ => return Err(invalid_directive(&key)),
                };
                split.objects.insert(relation, NestedObjects::One(object));
            }
        }
    }

    Ok(split)
}

/// Map plain input fields to physical column values.
///
/// Translated columns are written for the active translation key only.
pub fn column_values(
    entity: &EntityStructure,
    plain: InputMap,
    translation: &str,
) -> ApiResult<IndexMap<String, SqlValue>> {
    let mut values = IndexMap::new();

    for (key, value) in plain {
        if key == ID_NAME {
            if let JsonValue::String(uuid) = value {
                values.insert(key, SqlValue::String(uuid));
            }
            continue;
        }

        let column = entity
            .column(&key)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown field '{key}'")))?;
        let sql_value = SqlValue::from_json(&value, column.column_type)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid value for '{key}'")))?;

        if column.translated {
            values.insert(
                EntityStructure::translated_column(&key, translation),
                sql_value,
            );
        } else {
            values.insert(key, sql_value);
        }
    }

    Ok(values)
}

/// Write one object and its relation directives, returning its key.
///
/// In update mode the object must carry an existing `uuid`; nested objects
/// are created or updated depending on whether their `uuid` exists.
pub fn persist<'a>(
    conn: &'a mut SqliteConnection,
    catalog: &'a Catalog,
    entity: &'a Arc<EntityStructure>,
    input: InputMap,
    translation: &'a str,
    update: bool,
) -> BoxFuture<'a, ApiResult<String>> {
    Box::pin(async move {
        let existing = match input.get(ID_NAME) {
            Some(JsonValue::String(uuid)) => Some(uuid.clone()),
            Some(JsonValue::Null) | None => None,
            Some(_) => return Err(invalid_directive(ID_NAME)),
        };

        let split = split_input(entity, input)?;

        if update {
            let uuid = existing
                .as_deref()
                .ok_or_else(|| ApiError::bad_request("Missing uuid"))?;
            if !writer::exists(conn, entity, uuid).await? {
                return Err(ApiError::NotFound(uuid.to_string()));
            }
        }

        // Nested objects first so their keys can be linked below.
        let mut object_keys: IndexMap<String, Vec<String>> = IndexMap::new();
        for (relation, objects) in split.objects {
            let target = catalog
                .get(entity.relations[&relation].target())
                .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("Unknown target of '{relation}'")))?;
            let objects = match objects {
                NestedObjects::One(object) => object.into_iter().collect(),
                NestedObjects::Many(objects) => objects,
            };

            let mut keys = Vec::with_capacity(objects.len());
            for object in objects {
                let nested_update = match object.get(ID_NAME) {
                    Some(JsonValue::String(uuid)) => writer::exists(conn, target, uuid).await?,
                    _ => false,
                };
                keys.push(persist(conn, catalog, target, object, translation, nested_update).await?);
            }
            object_keys.insert(relation, keys);
        }

        let values = column_values(entity, split.plain, translation)?;
        let uuid = match existing.filter(|_| update) {
            Some(uuid) => {
                let mut values = values;
                values.shift_remove(ID_NAME);
                writer::update_row(conn, entity, &uuid, values).await?;
                uuid
            }
            None => writer::insert_row(conn, entity, values).await?,
        };

        for (name, ids) in &split.relations {
            let relation = &entity.relations[name];
            writer::unrelate(conn, entity, relation, &uuid, &ids.remove).await?;
            writer::relate(conn, entity, name, relation, &uuid, &ids.add).await?;
            if let Some(replace) = &ids.replace {
                writer::replace_relation(conn, entity, name, relation, &uuid, replace).await?;
            }
        }

        for (name, keys) in &object_keys {
            let relation = &entity.relations[name];
            writer::replace_relation(conn, entity, name, relation, &uuid, keys).await?;
        }

        Ok(uuid)
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::catalog::{Column, ColumnType, Relation};

    fn article() -> Arc<EntityStructure> {
        Catalog::builder()
            .translations(["en", "cs"])
            .entity(
                EntityStructure::builder("article")
                    .column(Column::new("title", ColumnType::String).translated())
                    .column(Column::new("externalID", ColumnType::String).nullable())
                    .relation("author", Relation::to_one("author", "fk_author"))
                    .relation(
                        "tags",
                        Relation::many_to_many("tag", "article_tag", "article", "tag"),
                    ),
            )
            .entity(EntityStructure::builder("author"))
            .entity(EntityStructure::builder("tag"))
            .build()
            .unwrap()
            .get("article")
            .unwrap()
            .clone()
    }

    fn object(value: JsonValue) -> InputMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_directives_are_stripped_from_plain_input() {
        let split = split_input(
            &article(),
            object(json!({
                "title": "Hello",
                "externalID": "x-1",
                "authorID": "a1",
                "tagsIDs": {"add": ["t1", "t2"]},
                "tagsOBJs": [{"uuid": "t3"}],
            })),
        )
        .unwrap();

        assert_eq!(
            split.plain,
            object(json!({"title": "Hello", "externalID": "x-1"}))
        );
        assert_eq!(
            split.relations["author"],
            RelationIds {
                replace: Some(vec!["a1".into()]),
                ..Default::default()
            }
        );
        assert_eq!(split.relations["tags"].add, vec!["t1", "t2"]);
        assert_eq!(
            split.objects["tags"],
            NestedObjects::Many(vec![object(json!({"uuid": "t3"}))])
        );
    }

    #[test]
    fn test_unknown_relation_directive_is_bad_request() {
        let err = split_input(&article(), object(json!({"editorsIDs": {"add": []}}))).unwrap_err();
        assert_matches!(err, ApiError::BadRequest(msg) if msg.contains("editors"));

        let err = split_input(&article(), object(json!({"tagsIDs": ["t1"]}))).unwrap_err();
        assert_matches!(err, ApiError::BadRequest(_));
    }

    #[test]
    fn test_translated_values_use_active_key() {
        let values = column_values(
            &article(),
            object(json!({"uuid": "p1", "title": "Ahoj"})),
            "cs",
        )
        .unwrap();
        assert_eq!(values["uuid"], SqlValue::from("p1"));
        assert_eq!(values["title_cs"], SqlValue::from("Ahoj"));
        assert!(!values.contains_key("title"));

        let err = column_values(&article(), object(json!({"nope": 1})), "en").unwrap_err();
        assert_matches!(err, ApiError::BadRequest(_));
    }
}
