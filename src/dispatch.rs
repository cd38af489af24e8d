//! Field name -> (resolver, action) routing
//!
//! `articleManyTotalCount` is split into camel-case segments
//! (`article`, `Many`, `Total`, `Count`). The longest prefix that names a
//! registered resolver (`ArticleResolver`) wins, as long as at least one
//! segment is left for the action (`manyTotalCount`). Names that match no
//! resolver are resolved as plain properties of the parent value.

use std::collections::HashMap;
use std::sync::Arc;

use convert_case::{Case, Casing};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use crate::resolver::CrudResolver;

static SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Z]+|[A-Z]+[^A-Z]*").expect("valid segment regex"));

/// A routed field.
#[derive(Clone)]
pub struct Dispatch {
    pub resolver: Arc<CrudResolver>,
    pub action: String,
}

/// Camel-case segments of a field name.
pub fn split_segments(name: &str) -> Vec<&str> {
    SEGMENT_RE.find_iter(name).map(|m| m.as_str()).collect()
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Default)]
pub struct Dispatcher {
    resolvers: HashMap<String, Arc<CrudResolver>>,
    /// field name -> (resolver identifier, action); `None` for plain properties
    memo: RwLock<HashMap<String, Option<(String, String)>>>,
}

impl Dispatcher {
    pub fn new<I>(resolvers: I) -> Self
    where
        I: IntoIterator<Item = Arc<CrudResolver>>,
    {
        let mut dispatcher = Self::default();
        for resolver in resolvers {
            dispatcher.register(resolver);
        }
        dispatcher
    }

    pub fn register(&mut self, resolver: Arc<CrudResolver>) {
        self.resolvers.insert(resolver.identifier(), resolver);
        self.memo.get_mut().clear();
    }

    /// Route `field_name`, or `None` when it is a plain property.
    pub fn resolve_field(&self, field_name: &str) -> Option<Dispatch> {
        let cached = self.memo.read().get(field_name).cloned();
        let route = match cached {
            Some(route) => route,
            None => {
                let route = self.decompose(field_name);
                self.memo
                    .write()
                    .insert(field_name.to_string(), route.clone());
                route
            }
        };

        let (identifier, action) = route?;
        Some(Dispatch {
            resolver: self.resolvers.get(&identifier)?.clone(),
            action,
        })
    }

    fn decompose(&self, field_name: &str) -> Option<(String, String)> {
        let segments = split_segments(field_name);

        for split in (1..segments.len()).rev() {
            let prefix = segments[..split].concat();
            let identifier = format!("{}Resolver", prefix.to_case(Case::Pascal));
            if self.resolvers.contains_key(&identifier) {
                let action = lower_first(&segments[split..].concat());
                tracing::debug!(field = %field_name, resolver = %identifier, action = %action, "Routed field");
                return Some((identifier, action));
            }
        }

        None
    }
}
