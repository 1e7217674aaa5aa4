//! Ordered lifecycle hooks with soft/hard failure semantics.
//!
//! # Design Decisions
//! - Hooks run sequentially in registration order, each awaited before the next
//! - A soft hook's failure is logged and skipped; a hard hook's failure
//!   aborts the run and whatever startup sequence invoked it
//! - Nothing prevents a second `run`; it replays every hook

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::{BoxError, SignalHookFailure};

/// Future returned by a lifecycle hook.
pub type HookFuture = BoxFuture<'static, Result<(), BoxError>>;

type Hook<A> = Arc<dyn Fn(A) -> HookFuture + Send + Sync>;

struct Registration<A> {
    hook: Hook<A>,
    soft: bool,
}

impl<A> Clone for Registration<A> {
    fn clone(&self) -> Self {
        Self {
            hook: Arc::clone(&self.hook),
            soft: self.soft,
        }
    }
}

/// A named milestone with an ordered list of hooks.
pub struct LifecycleSignal<A> {
    name: &'static str,
    hooks: RwLock<Vec<Registration<A>>>,
}

impl<A> std::fmt::Debug for LifecycleSignal<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleSignal")
            .field("name", &self.name)
            .field("hooks", &self.len())
            .finish()
    }
}

impl<A> LifecycleSignal<A> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.hooks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: Clone + Send + 'static> LifecycleSignal<A> {

    /// Append a hook. `soft = false` makes its failure fatal.
    pub fn register<F, Fut>(&self, hook: F, soft: bool)
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let hook: Hook<A> = Arc::new(move |args| hook(args).boxed());
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration { hook, soft });
    }

    /// Run every hook in registration order.
    pub async fn run(&self, args: A) -> Result<(), SignalHookFailure> {
        let hooks = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (index, registration) in hooks.into_iter().enumerate() {
            match (registration.hook)(args.clone()).await {
                Ok(()) => {
                    tracing::debug!(signal = self.name, index, "Hook completed");
                }
                Err(e) if registration.soft => {
                    tracing::warn!(signal = self.name, index, error = %e, "Soft hook failed, continuing");
                }
                Err(source) => {
                    tracing::error!(signal = self.name, index, error = %source, "Hook failed");
                    return Err(SignalHookFailure {
                        signal: self.name,
                        index,
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Arguments passed to `service_ready` hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReady {
    pub service: String,
    pub version: String,
    pub node_id: String,
    pub worker: usize,
}

/// The lifecycle milestones a host exposes.
#[derive(Debug)]
pub struct Signals {
    /// Fired once per worker after listeners are up and registration is done.
    pub service_ready: LifecycleSignal<ServiceReady>,
}

impl Signals {
    pub fn new() -> Self {
        Self {
            service_ready: LifecycleSignal::new("service_ready"),
        }
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}
