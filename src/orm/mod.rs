//! Dynamic ORM layer over SQLite
//!
//! The projection of every query is decided per request from the GraphQL
//! selection, so rows are decoded into ordered maps of [`SqlValue`]s rather
//! than into typed structs.

pub mod builder;
pub mod filters;
pub mod traits;
pub mod writer;

pub use builder::{EntityQuery, KEY_CHUNK_SIZE, Projection, SqlRow};
pub use filters::{FilterError, FilterExpr};
pub use traits::{OrderDirection, SqlValue};
