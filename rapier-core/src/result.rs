use crate::error::RapierError;
use futures::future::{self, BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;

/// The partial, then final, result of one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallResult {
    pub status: u16,
    /// Response body or locally computed value
    pub data: Value,
    /// Description of the request that was sent
    pub request: Value,
    /// Free-form values stages attach to the result
    pub extensions: Map<String, Value>,
}

impl CallResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure path of a [`Deferred`].
///
/// `result` keeps the status and data exactly as they were when the call
/// settled; `error` is set when a stage, the template or the transport failed
/// rather than the server answering with a non-success status.
#[derive(Debug, Error)]
pub struct CallFailure {
    pub path: String,
    pub result: CallResult,
    #[source]
    pub error: Option<RapierError>,
}

impl CallFailure {
    pub fn status(&self) -> u16 {
        self.result.status
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "call to '{}' failed: {}", self.path, error),
            None => write!(
                f,
                "call to '{}' failed with status {}",
                self.path, self.result.status
            ),
        }
    }
}

pub type Outcome = Result<CallResult, CallFailure>;

/// Pending outcome of an invocation.
///
/// Nothing runs until the deferred is awaited. Continuations registered with
/// [`on_success`](Deferred::on_success), [`on_failure`](Deferred::on_failure)
/// and [`always`](Deferred::always) run in registration order once the
/// pipeline has settled.
#[must_use = "a deferred does nothing unless awaited"]
pub struct Deferred {
    future: BoxFuture<'static, Outcome>,
}

impl Deferred {
    pub(crate) fn new<F>(future: F) -> Self
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        Self {
            future: future.boxed(),
        }
    }

    /// A deferred that is already settled
    pub fn settled(outcome: Outcome) -> Self {
        Self::new(future::ready(outcome))
    }

    pub fn on_success<F>(self, f: F) -> Self
    where
        F: FnOnce(&CallResult) + Send + 'static,
    {
        Self::new(self.future.map(move |outcome| {
            if let Ok(result) = &outcome {
                f(result);
            }
            outcome
        }))
    }

    pub fn on_failure<F>(self, f: F) -> Self
    where
        F: FnOnce(&CallFailure) + Send + 'static,
    {
        Self::new(self.future.map(move |outcome| {
            if let Err(failure) = &outcome {
                f(failure);
            }
            outcome
        }))
    }

    /// Run `f` with the result on either path
    pub fn always<F>(self, f: F) -> Self
    where
        F: FnOnce(&CallResult) + Send + 'static,
    {
        Self::new(self.future.map(move |outcome| {
            match &outcome {
                Ok(result) => f(result),
                Err(failure) => f(&failure.result),
            }
            outcome
        }))
    }
}

impl Future for Deferred {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.poll_unpin(cx)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Deferred")
    }
}
