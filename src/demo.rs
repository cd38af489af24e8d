//! Sample blog catalog served by the binary and used in tests.
//!
//! - `author` 1:N `article` (`article.fk_author`)
//! - `article` 1:N `comment` (`comment.fk_article`)
//! - `article` N:M `tag` through `article_tag`

use crate::catalog::{Catalog, CatalogError, Column, ColumnType, EntityStructure, Relation};

pub fn blog_catalog() -> Result<Catalog, CatalogError> {
    Catalog::builder()
        .translations(["en", "cs"])
        .entity(
            EntityStructure::builder("author")
                .column(Column::new("name", ColumnType::String))
                .column(Column::new("email", ColumnType::String).nullable().unique())
                .relation("articles", Relation::to_many("article", "fk_author")),
        )
        .entity(
            EntityStructure::builder("article")
                .column(Column::new("title", ColumnType::String).translated())
                .column(Column::new("body", ColumnType::String).nullable())
                .column(Column::new("views", ColumnType::Int).default("0"))
                .column(Column::new("published", ColumnType::Bool).default("0"))
                .relation("author", Relation::to_one("author", "fk_author"))
                .relation("comments", Relation::to_many("comment", "fk_article"))
                .relation(
                    "tags",
                    Relation::many_to_many("tag", "article_tag", "article", "tag"),
                )
                .select_modifier(
                    "commentCount",
                    "SELECT COUNT(*) FROM comment WHERE comment.fk_article = this.uuid",
                ),
        )
        .entity(
            EntityStructure::builder("comment")
                .column(Column::new("text", ColumnType::String))
                .relation("article", Relation::to_one("article", "fk_article")),
        )
        .entity(
            EntityStructure::builder("tag")
                .column(Column::new("name", ColumnType::String).unique())
                .relation(
                    "articles",
                    Relation::many_to_many("article", "article_tag", "tag", "article"),
                ),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blog_catalog_is_valid() {
        let catalog = blog_catalog().unwrap();
        assert_eq!(catalog.entities().count(), 4);
        assert!(catalog.has_translation("cs"));
        assert_eq!(
            catalog.get("article").unwrap().select_modifier("commentCount"),
            Some("SELECT COUNT(*) FROM comment WHERE comment.fk_article = this.uuid")
        );
    }
}
