use crate::api::Api;
use crate::options::Options;
use crate::result::CallResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A step of the invocation pipeline.
///
/// Used for plugin stages, the declaration-level `prefilter` and
/// `process_result` hooks, and function-shorthand nodes. The API the call
/// was made through is passed explicitly; both `options` and `result` may be
/// mutated in place. Returning an error aborts the rest of the pipeline.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self, api: &Api, options: &mut Options, result: &mut CallResult)
        -> anyhow::Result<()>;
}

pub type SharedHook = Arc<dyn Hook>;

/// Adapter turning a synchronous closure into a [`Hook`]
pub struct FnHook<F>(F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&Api, &mut Options, &mut CallResult) -> anyhow::Result<()> + Send + Sync,
{
    async fn run(
        &self,
        api: &Api,
        options: &mut Options,
        result: &mut CallResult,
    ) -> anyhow::Result<()> {
        (self.0)(api, options, result)
    }
}

impl<F> fmt::Debug for FnHook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHook")
    }
}

/// Wrap a closure as a shared hook.
pub fn hook<F>(f: F) -> SharedHook
where
    F: Fn(&Api, &mut Options, &mut CallResult) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}
