//! Mutation descriptors for one-shot data modifications.
//!
//! A [`Mutation`] describes a network-backed modification executed by the
//! store; a [`LocalMutation`] modifies the store's in-memory state only.
//! Like queries, descriptors are immutable values resolved against options
//! at call time, with call-site arguments/context taking precedence over
//! the options the observer was created with, which in turn win over the
//! descriptor's defaults.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};

use crate::error::DataError;

/// Async effect of a mutation. Receives the resolved arguments and context.
pub type MutationEffectFn = Arc<
    dyn Fn(Option<Value>, Option<Value>) -> BoxFuture<'static, Result<Value, DataError>>
        + Send
        + Sync,
>;

/// Applies a local mutation to the store's local state.
pub type LocalUpdateFn = Arc<dyn Fn(&mut Map<String, Value>, Option<&Value>) + Send + Sync>;

/// Store-side hook run after a local mutation's updates have been applied.
/// A rejection here settles the mutation as failed.
pub type AfterUpdatesFn = Arc<dyn Fn(Option<&Value>) -> Result<(), DataError> + Send + Sync>;

/// Options overlaid on a [`Mutation`] when creating an observer or calling
/// `mutate`.
#[derive(Clone, Default)]
pub struct MutationOptions {
    pub arguments: Option<Value>,
    pub context: Option<Value>,
    /// A locally synthesized provisional result the store may apply before
    /// the real mutation settles.
    pub optimistic_response: Option<Value>,
}

impl MutationOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }

    #[must_use]
    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn optimistic_response(mut self, response: Value) -> Self {
        self.optimistic_response = Some(response);
        self
    }
}

struct MutationInner {
    name: String,
    effect: MutationEffectFn,
    defaults: MutationOptions,
}

/// An immutable mutation description.
#[derive(Clone)]
pub struct Mutation {
    inner: Arc<MutationInner>,
}

impl Mutation {
    pub fn new<F, Fut>(name: impl Into<String>, effect: F) -> Self
    where
        F: Fn(Option<Value>, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, DataError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(MutationInner {
                name: name.into(),
                effect: Arc::new(move |args, ctx| effect(args, ctx).boxed()),
                defaults: MutationOptions::default(),
            }),
        }
    }

    /// Returns a copy of this mutation with default options applied.
    #[must_use]
    pub fn with_defaults(self, defaults: MutationOptions) -> Self {
        Self {
            inner: Arc::new(MutationInner {
                name: self.inner.name.clone(),
                effect: self.inner.effect.clone(),
                defaults,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Builds the concrete request for one `mutate` call. `overrides` are
    /// the call-site options and take precedence over `base`, which takes
    /// precedence over the descriptor's defaults.
    #[must_use]
    pub fn resolve(&self, base: &MutationOptions, overrides: MutationOptions) -> ResolvedMutation {
        let defaults = &self.inner.defaults;
        ResolvedMutation {
            mutation: self.clone(),
            arguments: overrides
                .arguments
                .or_else(|| base.arguments.clone())
                .or_else(|| defaults.arguments.clone()),
            context: overrides
                .context
                .or_else(|| base.context.clone())
                .or_else(|| defaults.context.clone()),
            optimistic_response: overrides
                .optimistic_response
                .or_else(|| base.optimistic_response.clone())
                .or_else(|| defaults.optimistic_response.clone()),
        }
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("name", &self.inner.name)
            .finish()
    }
}

/// A mutation with concrete arguments, context and optimistic response
/// applied; the value handed to the store for execution.
#[derive(Clone)]
pub struct ResolvedMutation {
    mutation: Mutation,
    pub arguments: Option<Value>,
    pub context: Option<Value>,
    pub optimistic_response: Option<Value>,
}

impl ResolvedMutation {
    pub fn name(&self) -> &str {
        self.mutation.name()
    }

    /// Runs the mutation's effect with this request's arguments and context.
    pub fn effect(&self) -> BoxFuture<'static, Result<Value, DataError>> {
        (self.mutation.inner.effect)(self.arguments.clone(), self.context.clone())
    }
}

struct LocalMutationInner {
    name: String,
    update: LocalUpdateFn,
    after_query_updates: Option<AfterUpdatesFn>,
}

/// A mutation executed purely against the store's in-memory state.
#[derive(Clone)]
pub struct LocalMutation {
    inner: Arc<LocalMutationInner>,
}

impl LocalMutation {
    pub fn new<F>(name: impl Into<String>, update: F) -> Self
    where
        F: Fn(&mut Map<String, Value>, Option<&Value>) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(LocalMutationInner {
                name: name.into(),
                update: Arc::new(update),
                after_query_updates: None,
            }),
        }
    }

    /// Returns a copy with a hook run by the store after the update has
    /// been applied. The mutation settles only after the hook completes or
    /// rejects.
    #[must_use]
    pub fn with_after_query_updates<F>(self, hook: F) -> Self
    where
        F: Fn(Option<&Value>) -> Result<(), DataError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(LocalMutationInner {
                name: self.inner.name.clone(),
                update: self.inner.update.clone(),
                after_query_updates: Some(Arc::new(hook)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn resolve(&self, input: Option<Value>, sync_mode: bool) -> ResolvedLocalMutation {
        ResolvedLocalMutation {
            mutation: self.clone(),
            input,
            sync_mode,
        }
    }
}

impl fmt::Debug for LocalMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMutation")
            .field("name", &self.inner.name)
            .finish()
    }
}

/// A local mutation with its call-site input applied.
#[derive(Clone)]
pub struct ResolvedLocalMutation {
    mutation: LocalMutation,
    pub input: Option<Value>,
    pub sync_mode: bool,
}

impl ResolvedLocalMutation {
    pub fn name(&self) -> &str {
        self.mutation.name()
    }

    /// Applies the mutation's update to the store's local state.
    pub fn update(&self, state: &mut Map<String, Value>) {
        (self.mutation.inner.update)(state, self.input.as_ref());
    }

    /// Runs the after-updates hook, if any.
    pub fn after_query_updates(&self) -> Result<(), DataError> {
        match &self.mutation.inner.after_query_updates {
            Some(hook) => hook(self.input.as_ref()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mutation() -> Mutation {
        Mutation::new("UpdateItem", |_args, _ctx| async { Ok(json!("ok")) })
    }

    #[test]
    fn test_resolve_precedence_call_site_then_base_then_defaults() {
        let m = mutation().with_defaults(
            MutationOptions::new()
                .arguments(json!({ "from": "defaults" }))
                .context(json!({ "token": "default" })),
        );
        let base = MutationOptions::new().arguments(json!({ "from": "base" }));

        let resolved = m.resolve(&base, MutationOptions::new().arguments(json!({ "from": "call" })));
        assert_eq!(resolved.arguments, Some(json!({ "from": "call" })));
        assert_eq!(resolved.context, Some(json!({ "token": "default" })));

        let resolved = m.resolve(&base, MutationOptions::new());
        assert_eq!(resolved.arguments, Some(json!({ "from": "base" })));
    }

    #[test]
    fn test_local_mutation_update_and_hook() {
        let m = LocalMutation::new("SetFlag", |state, input| {
            state.insert(
                "flag".into(),
                input.cloned().unwrap_or(Value::Bool(true)),
            );
        })
        .with_after_query_updates(|input| match input {
            Some(Value::Bool(false)) => Err(DataError::local_mutation("flag must be true")),
            _ => Ok(()),
        });

        let mut state = Map::new();
        let resolved = m.resolve(Some(json!(true)), false);
        resolved.update(&mut state);
        assert_eq!(state.get("flag"), Some(&json!(true)));
        assert!(resolved.after_query_updates().is_ok());

        let rejected = m.resolve(Some(json!(false)), false);
        assert!(matches!(
            rejected.after_query_updates(),
            Err(DataError::LocalMutationValidation(_))
        ));
    }
}
