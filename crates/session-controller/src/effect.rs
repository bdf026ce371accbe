//! Scoped effects with automatic cleanup.
//!
//! An effect is a closure that runs once immediately and re-runs
//! whenever any [`Signal`] it read through its [`EffectCtx`] changes.
//! Each run may register cleanups and spawn background tasks:
//!
//! - Cleanups run in registration order, before the next run and on
//!   disposal.
//! - Spawned tasks receive a `CancellationToken` cancelled on re-run
//!   and on disposal; they observe it at their next suspension point
//!   and are never force-killed mid-step.
//!
//! Every effect is its own tokio task, so a panic inside one effect
//! body ends only that effect; siblings keep running. Closing an
//! [`EffectScope`] disposes its effects in reverse creation order,
//! awaiting each effect's cleanups before moving to the next.

use futures::future::{select_all, BoxFuture};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::signal::Signal;

/// How long a disposal waits for one spawned task to observe its
/// cancellation token before giving up on it.
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-run context handed to an effect body.
///
/// Reads through [`EffectCtx::get`] establish dependencies; the effect
/// re-runs when any of them changes.
pub struct EffectCtx {
    deps: Vec<BoxFuture<'static, ()>>,
    cleanups: Vec<Box<dyn FnOnce() + Send + 'static>>,
    task_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EffectCtx {
    fn new(task_token: CancellationToken) -> Self {
        Self {
            deps: Vec::new(),
            cleanups: Vec::new(),
            task_token,
            tasks: Vec::new(),
        }
    }

    /// Read a signal's current value and subscribe this run to its
    /// changes.
    pub fn get<T: Clone + Send + Sync + 'static>(&mut self, signal: &Signal<T>) -> T {
        let mut rx = signal.watch();
        let value = rx.borrow_and_update().clone();
        self.deps.push(Box::pin(async move {
            // A closed channel ends the wait; the value can no longer
            // change so the dependency is simply inert.
            let _ = rx.changed().await;
        }));
        value
    }

    /// Read a signal without subscribing (the original's `peek`).
    #[must_use]
    pub fn peek<T: Clone + Send + Sync + 'static>(&self, signal: &Signal<T>) -> T {
        signal.get()
    }

    /// Register a cleanup that runs before the next invocation and on
    /// disposal, in registration order.
    pub fn on_cleanup(&mut self, f: impl FnOnce() + Send + 'static) {
        self.cleanups.push(Box::new(f));
    }

    /// Spawn a background task bound to this run.
    ///
    /// The task's token is cancelled when the effect re-runs or is
    /// disposed; the task must check it at every suspension point.
    pub fn spawn<F, Fut>(&mut self, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.task_token.child_token();
        self.tasks.push(tokio::spawn(f(token)));
    }

    /// Cancel spawned tasks, wait for them to stop, then run cleanups
    /// in registration order.
    async fn dispose(mut self) {
        self.task_token.cancel();
        for task in self.tasks.drain(..) {
            match tokio::time::timeout(TASK_DRAIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    warn!(target: "sc.effect", error = ?e, "spawned task panicked");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(target: "sc.effect", "spawned task did not observe cancellation in time");
                }
            }
        }
        for cleanup in self.cleanups.drain(..) {
            cleanup();
        }
    }
}

struct EffectHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns a group of effects with a shared root cancellation token.
pub struct EffectScope {
    token: CancellationToken,
    effects: Vec<EffectHandle>,
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectScope {
    /// Create an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            effects: Vec::new(),
        }
    }

    /// Register an effect: `body` runs once now (asynchronously, on its
    /// own task) and again whenever a signal it read changes.
    pub fn effect<F>(&mut self, mut body: F)
    where
        F: FnMut(&mut EffectCtx) + Send + 'static,
    {
        let token = self.token.child_token();
        let effect_token = token.clone();

        let task = tokio::spawn(async move {
            loop {
                let mut ctx = EffectCtx::new(effect_token.child_token());
                body(&mut ctx);
                let deps = std::mem::take(&mut ctx.deps);

                if deps.is_empty() {
                    // Nothing to react to: hold cleanups until disposal.
                    effect_token.cancelled().await;
                    ctx.dispose().await;
                    return;
                }

                tokio::select! {
                    () = effect_token.cancelled() => {
                        ctx.dispose().await;
                        return;
                    }
                    _ = select_all(deps) => {
                        ctx.dispose().await;
                    }
                }
            }
        });

        self.effects.push(EffectHandle { token, task });
    }

    /// Signal cancellation without waiting for cleanups.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Dispose all effects in reverse creation order, awaiting each
    /// effect's cleanups before the next.
    pub async fn close(mut self) {
        for EffectHandle { token, task } in self.effects.drain(..).rev() {
            token.cancel();
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(target: "sc.effect", error = ?e, "effect body panicked");
                }
            }
        }
        self.token.cancel();
        debug!(target: "sc.effect", "effect scope closed");
    }
}

impl Drop for EffectScope {
    fn drop(&mut self) {
        // Best effort: cleanups still run on the effect tasks.
        self.token.cancel();
    }
}
