//! Reducer-producing helper effects.
//!
//! These cover the common cases so user code rarely writes a raw reducer:
//! `hard_update` merges a fixed patch, `soft_update` merges the output of a
//! state function, and `update` is the generic form accepting either a
//! reducer closure or a literal object. All three merge over the full
//! current state, so the union rule of `set_state` never drops keys.

use std::sync::Arc;

use crate::error::Error;
use crate::state::{json_kind, object_entries, StateMap, Value};

use super::runner::{effect, EffectFn, EffectOutcome};

/// An effect that merges a fixed patch into the declaring container's state.
pub fn hard_update(patch: StateMap) -> EffectFn {
    effect(move |_effects, _args| {
        let patch = patch.clone();
        async move {
            Ok(EffectOutcome::reducer(move |state| merged(state, patch)))
        }
    })
}

/// An effect that merges `f(state, args)` into the declaring container's
/// state.
pub fn soft_update<F>(f: F) -> EffectFn
where
    F: Fn(&StateMap, &[Value]) -> StateMap + Send + Sync + 'static,
{
    let f = Arc::new(f);
    effect(move |_effects, args| {
        let f = Arc::clone(&f);
        async move {
            Ok(EffectOutcome::reducer(move |state| {
                merged(state, f(state, &args))
            }))
        }
    })
}

/// Argument to the generic [`update`] helper.
#[derive(Clone)]
pub enum UpdateArg {
    /// A reducer producer: the patch is computed from the current state.
    Reducer(Arc<dyn Fn(&StateMap) -> StateMap + Send + Sync>),
    /// A literal value; must be an object, checked at call time.
    Literal(Value),
}

impl UpdateArg {
    /// Wrap a reducer closure.
    pub fn reducer<F>(f: F) -> Self
    where
        F: Fn(&StateMap) -> StateMap + Send + Sync + 'static,
    {
        UpdateArg::Reducer(Arc::new(f))
    }
}

impl From<Value> for UpdateArg {
    fn from(value: Value) -> Self {
        UpdateArg::Literal(value)
    }
}

/// Generic update effect: a function argument is treated as a reducer
/// producer, an object value as a literal merge patch. Any other value
/// kind fails with a configuration error when the action runs.
pub fn update(arg: impl Into<UpdateArg>) -> EffectFn {
    let arg = arg.into();
    effect(move |_effects, _args| {
        let arg = arg.clone();
        async move {
            match arg {
                UpdateArg::Reducer(f) => {
                    Ok(EffectOutcome::reducer(move |state| merged(state, f(state))))
                }
                UpdateArg::Literal(value) => match object_entries(&value) {
                    Some(patch) => Ok(EffectOutcome::reducer(move |state| merged(state, patch))),
                    None => Err(Error::InvalidUpdate {
                        kind: json_kind(value.json()),
                    }),
                },
            }
        }
    })
}

fn merged(state: &StateMap, patch: StateMap) -> StateMap {
    let mut next = state.clone();
    for (key, value) in patch {
        next.insert(key, value);
    }
    next
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use serde_json::json;

    use crate::state::ContainerCore;

    use super::super::runner::Effects;
    use super::*;

    fn map(entries: &[(&str, i64)]) -> StateMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    async fn run_single(initial: StateMap, def: EffectFn, args: Vec<Value>) -> Result<StateMap, Error> {
        let core = ContainerCore::new(initial, IndexMap::new());
        let mut defs = IndexMap::new();
        defs.insert("go".to_string(), def);
        let effects = Effects::build(Arc::clone(&core), defs, None);
        effects.run("go", args).await?;
        Ok(core.raw_state())
    }

    #[tokio::test]
    async fn hard_update_merges_without_dropping_keys() {
        let state = run_single(map(&[("a", 1), ("b", 2)]), hard_update(map(&[("b", 9)])), vec![])
            .await
            .unwrap();
        assert_eq!(state.get("a").and_then(|v| v.as_i64()), Some(1));
        assert_eq!(state.get("b").and_then(|v| v.as_i64()), Some(9));
    }

    #[tokio::test]
    async fn soft_update_sees_state_and_args() {
        let def = soft_update(|state, args| {
            let bump = args.first().and_then(|v| v.as_i64()).unwrap_or(1);
            let n = state.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            map(&[("n", n + bump)])
        });
        let state = run_single(map(&[("n", 3), ("keep", 7)]), def, vec![Value::from(4i64)])
            .await
            .unwrap();
        assert_eq!(state.get("n").and_then(|v| v.as_i64()), Some(7));
        assert_eq!(state.get("keep").and_then(|v| v.as_i64()), Some(7));
    }

    #[tokio::test]
    async fn update_accepts_reducers_and_objects() {
        let state = run_single(
            map(&[("n", 1)]),
            update(UpdateArg::reducer(|state| {
                let n = state.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
                map(&[("n", n * 10)])
            })),
            vec![],
        )
        .await
        .unwrap();
        assert_eq!(state.get("n").and_then(|v| v.as_i64()), Some(10));

        let state = run_single(map(&[("n", 1)]), update(Value::new(json!({ "n": 5 }))), vec![])
            .await
            .unwrap();
        assert_eq!(state.get("n").and_then(|v| v.as_i64()), Some(5));
    }

    #[tokio::test]
    async fn update_rejects_non_object_literals_at_call_time() {
        let err = run_single(map(&[("n", 1)]), update(Value::from(42i64)), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUpdate { kind: "number" }));
    }
}
