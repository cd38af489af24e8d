//! relgraph - GraphQL CRUD over relational entities
//!
//! A [`catalog::Catalog`] describes entities, their columns and relations.
//! From it the crate generates a dynamic GraphQL schema whose root fields
//! (`articleOne`, `articleMany`, `articleCreate`, ...) are answered by
//! [`resolver::CrudResolver`]s. Reads go through the [`fetch::FetchEngine`],
//! which turns the requested selection into one SQL query per relation level.

pub mod app;
pub mod catalog;
pub mod config;
pub mod db;
pub mod demo;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod orm;
pub mod resolver;
pub mod schema;
pub mod selection;
pub mod service;
