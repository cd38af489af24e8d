//! Before-action interceptors
//!
//! Interceptors run in registration order before an action executes. Each
//! one receives the parent value and the arguments, may rewrite them, and may
//! stop the action by returning an error (e.g. `ApiError::Unauthorized`).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use super::RequestContext;
use crate::error::ApiResult;

pub type Args = Map<String, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    GetOne,
    GetAll,
    Create,
    Update,
    Delete,
}

impl Action {
    /// Interceptor slot of a resolver action name.
    pub fn for_action(action: &str) -> Option<Action> {
        Some(match action {
            "one" => Action::GetOne,
            "many" | "manyTotalCount" | "collection" | "collectionTotalCount" => Action::GetAll,
            "create" => Action::Create,
            "update" => Action::Update,
            "delete" => Action::Delete,
            _ => return None,
        })
    }
}

pub trait Interceptor: Send + Sync {
    fn intercept(
        &self,
        root: JsonValue,
        args: Args,
        ctx: &RequestContext,
    ) -> ApiResult<(JsonValue, Args)>;
}

impl<F> Interceptor for F
where
    F: Fn(JsonValue, Args, &RequestContext) -> ApiResult<(JsonValue, Args)> + Send + Sync,
{
    fn intercept(
        &self,
        root: JsonValue,
        args: Args,
        ctx: &RequestContext,
    ) -> ApiResult<(JsonValue, Args)> {
        self(root, args, ctx)
    }
}

/// Ordered interceptor lists per action.
#[derive(Clone, Default)]
pub struct Interceptors {
    by_action: HashMap<Action, Vec<Arc<dyn Interceptor>>>,
}

impl Interceptors {
    pub fn register(&mut self, action: Action, interceptor: Arc<dyn Interceptor>) {
        self.by_action.entry(action).or_default().push(interceptor);
    }

    pub fn run(
        &self,
        action: Action,
        root: JsonValue,
        args: Args,
        ctx: &RequestContext,
    ) -> ApiResult<(JsonValue, Args)> {
        let Some(chain) = self.by_action.get(&action) else {
            return Ok((root, args));
        };

        chain
            .iter()
            .try_fold((root, args), |(root, args), interceptor| {
                interceptor.intercept(root, args, ctx)
            })
    }
}
