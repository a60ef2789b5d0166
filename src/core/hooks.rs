//! Pre- and post-execution hooks.
//!
//! Hooks run on the worker thread around each unit of work, in registration
//! order. A hook that returns an error or panics is logged and skipped; it
//! never aborts the task it wraps.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::error;

use crate::core::task::{Outcome, TaskFault};
use crate::util::serde::Scope;

/// View of the execution handed to hooks.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    /// Execution identifier.
    pub execution_id: &'a str,
    /// Task class.
    pub task_class: &'a str,
    /// Scoping tags.
    pub scope: &'a Scope,
    /// Input payload.
    pub input: &'a Value,
}

/// Callback run before the unit of work.
pub type PreHook = Arc<dyn Fn(&HookContext<'_>) -> Result<(), TaskFault> + Send + Sync>;

/// Callback run after the unit of work with its outcome.
pub type PostHook = Arc<dyn Fn(&HookContext<'_>, &Outcome) -> Result<(), TaskFault> + Send + Sync>;

/// Ordered hook lists shared between the executor and its workers.
#[derive(Default)]
pub struct HookRegistry {
    pre: RwLock<Vec<PreHook>>,
    post: RwLock<Vec<PostHook>>,
}

impl HookRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pre-execution hook.
    pub fn add_pre(&self, hook: PreHook) {
        self.pre.write().push(hook);
    }

    /// Append a post-execution hook.
    pub fn add_post(&self, hook: PostHook) {
        self.post.write().push(hook);
    }

    /// Run every pre-execution hook; returns how many faulted.
    pub fn run_pre(&self, ctx: &HookContext<'_>) -> usize {
        // Snapshot so hooks can register hooks without deadlocking.
        let hooks = self.pre.read().clone();
        hooks
            .iter()
            .enumerate()
            .filter(|(index, hook)| !isolate("pre", *index, ctx, || hook(ctx)))
            .count()
    }

    /// Run every post-execution hook; returns how many faulted.
    pub fn run_post(&self, ctx: &HookContext<'_>, outcome: &Outcome) -> usize {
        let hooks = self.post.read().clone();
        hooks
            .iter()
            .enumerate()
            .filter(|(index, hook)| !isolate("post", *index, ctx, || hook(ctx, outcome)))
            .count()
    }
}

/// Run one hook, logging its fault. Returns `true` on success.
fn isolate<F>(phase: &str, index: usize, ctx: &HookContext<'_>, f: F) -> bool
where
    F: FnOnce() -> Result<(), TaskFault>,
{
    let fault = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => return true,
        Ok(Err(fault)) => fault,
        Err(panic) => TaskFault::from_panic(panic.as_ref()),
    };
    error!(
        phase,
        hook = index,
        execution_id = %ctx.execution_id,
        task_class = %ctx.task_class,
        error = %fault,
        "execution hook failed"
    );
    false
}
