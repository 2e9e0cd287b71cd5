// Cascade resolution
// Folds each cascading key across the root-to-leaf chain. A registered
// extend rule acts as the reducer for its key; otherwise objects are
// shallow-merged and any other value replaces what came before.

use crate::error::{RapierError, Result};
use crate::normalize::NormalizedNode;
use crate::options::CASCADE_KEY;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Reducer for one cascading key.
///
/// Called once per chain level, root first, with the value declared at that
/// level (if any) and the value accumulated so far (`null` at the root).
/// The last return value is the resolved value.
pub trait ExtendRule: Send + Sync {
    fn extend(
        &self,
        declared: Option<&Value>,
        accumulated: Value,
        level: &NormalizedNode,
    ) -> anyhow::Result<Value>;
}

pub type SharedRule = Arc<dyn ExtendRule>;

pub struct FnRule<F>(F);

impl<F> ExtendRule for FnRule<F>
where
    F: Fn(Option<&Value>, Value, &NormalizedNode) -> anyhow::Result<Value> + Send + Sync,
{
    fn extend(
        &self,
        declared: Option<&Value>,
        accumulated: Value,
        level: &NormalizedNode,
    ) -> anyhow::Result<Value> {
        (self.0)(declared, accumulated, level)
    }
}

impl<F> fmt::Debug for FnRule<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnRule")
    }
}

/// Wrap a closure as a shared extend rule.
pub fn rule<F>(f: F) -> SharedRule
where
    F: Fn(Option<&Value>, Value, &NormalizedNode) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnRule(f))
}

/// The reducer used when no rule is registered for a key
#[derive(Debug, Clone, Copy, Default)]
pub struct ShallowMerge;

impl ExtendRule for ShallowMerge {
    fn extend(
        &self,
        declared: Option<&Value>,
        accumulated: Value,
        _level: &NormalizedNode,
    ) -> anyhow::Result<Value> {
        Ok(match (declared, accumulated) {
            (None, accumulated) => accumulated,
            (Some(Value::Object(declared)), Value::Object(mut merged)) => {
                for (key, value) in declared {
                    merged.insert(key.clone(), value.clone());
                }
                Value::Object(merged)
            }
            (Some(declared), _) => declared.clone(),
        })
    }
}

/// Keys declared on any `cascade` record along the chain, in order of first
/// appearance.
pub fn cascade_keys(chain: &[&NormalizedNode]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for node in chain {
        for key in node.spec.cascade.keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

/// Resolve one cascading key over a root-to-leaf chain.
pub fn resolve_cascade(
    chain: &[&NormalizedNode],
    key: &str,
    rules: &IndexMap<String, SharedRule>,
) -> Result<Value> {
    let reducer: &dyn ExtendRule = match rules.get(key) {
        Some(rule) => rule.as_ref(),
        None => &ShallowMerge,
    };

    let mut accumulated = Value::Null;
    for level in chain {
        let declared = level.spec.cascade.get(key);
        accumulated = reducer
            .extend(declared, accumulated, level)
            .map_err(|e| RapierError::stage(format!("extend:{}", key), e))?;
    }
    trace!("Resolved cascade key '{}' = {}", key, accumulated);
    Ok(accumulated)
}

/// Fold whole `cascade` records instead of single keys.
///
/// Used when an extend rule is registered under the `cascade` key itself.
/// Levels without a cascade record are passed `None`.
pub fn resolve_record(chain: &[&NormalizedNode], reducer: &dyn ExtendRule) -> Result<Value> {
    let mut accumulated = Value::Null;
    for level in chain {
        let record = (!level.spec.cascade.is_empty()).then(|| Value::Object(level.spec.cascade.clone()));
        accumulated = reducer
            .extend(record.as_ref(), accumulated, level)
            .map_err(|e| RapierError::stage(format!("extend:{}", CASCADE_KEY), e))?;
    }
    Ok(accumulated)
}

/// Resolve every cascading key referenced along the chain.
pub fn resolve_all(
    chain: &[&NormalizedNode],
    rules: &IndexMap<String, SharedRule>,
) -> Result<Map<String, Value>> {
    let mut resolved = Map::new();
    for key in cascade_keys(chain) {
        let value = resolve_cascade(chain, &key, rules)?;
        resolved.insert(key, value);
    }
    Ok(resolved)
}
