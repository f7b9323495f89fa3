//! Target selection and task submission.
//!
//! The engine knows nothing about what an action does. An
//! [`ActionDispatcher`] decides which environments are relevant and submits
//! one task per accepted target to the run's pool; [`TargetDispatcher`] is
//! the stock policy over any [`TargetAction`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument, Span};
use uuid::Uuid;

use crate::catalog::{Environment, Target};
use crate::error::Result;
use crate::pool::{TaskHandle, WorkerPool};
use crate::request::BulkActionConfig;
use crate::types::ActionResult;

/// Correlation data handed to every task of a run.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub run_id: i64,
    pub endpoint: String,
    pub project_id: Uuid,
    /// Fires when the run is abandoned, e.g. the caller disconnected.
    pub cancel: CancellationToken,
}

impl TaskContext {
    /// Span for the task running against `target`.
    pub fn span(&self, target: &Target) -> Span {
        info_span!(
            "bulk_task",
            run_id = self.run_id,
            project_id = %self.project_id,
            endpoint = %self.endpoint,
            target = %target.display_name(),
        )
    }
}

/// Submits one task per relevant target, in target order. The returned
/// handles must be in submission order.
pub trait ActionDispatcher: Send + Sync {
    fn dispatch(
        &self,
        pool: &WorkerPool,
        targets: Vec<Environment>,
        config: &Arc<BulkActionConfig>,
        ctx: &TaskContext,
    ) -> Result<Vec<TaskHandle<ActionResult>>>;
}

/// The per-target work of one bulk action.
#[async_trait]
pub trait TargetAction: Send + Sync {
    /// Connection kind a target must expose to be eligible, if any.
    fn requires_connection(&self) -> Option<&str> {
        None
    }

    /// Run against one target. `Ok` with `success: false` is an ordinary
    /// result; `Err` faults the whole run.
    async fn execute(
        &self,
        target: &Target,
        config: &BulkActionConfig,
        ctx: &TaskContext,
    ) -> Result<ActionResult>;
}

/// Narrow `environments` to the targets a request addresses.
///
/// An `environmentId` keeps only that environment. A `systemId` narrows each
/// environment to that system and drops environments without it. With
/// `requires_connection` set, targets lacking such a connection are dropped.
/// Catalog order is preserved.
pub fn select_targets(
    environments: Vec<Environment>,
    config: &BulkActionConfig,
    requires_connection: Option<&str>,
) -> Vec<Target> {
    environments
        .into_iter()
        .filter(|env| config.environment_id.map_or(true, |id| env.id == id))
        .filter_map(|env| match config.system_id {
            Some(system_id) => {
                let system = env.system(system_id)?.clone();
                Some(Target::narrowed(env, system))
            }
            None => Some(Target::environment(env)),
        })
        .filter(|target| requires_connection.map_or(true, |kind| target.has_connection(kind)))
        .collect()
}

// ---------------------------------------------------------------------------
// TargetDispatcher
// ---------------------------------------------------------------------------

pub struct TargetDispatcher<A> {
    action: Arc<A>,
}

impl<A: TargetAction + 'static> TargetDispatcher<A> {
    pub fn new(action: A) -> Self {
        Self {
            action: Arc::new(action),
        }
    }

    pub fn action(&self) -> &A {
        &self.action
    }
}

impl<A: TargetAction + 'static> ActionDispatcher for TargetDispatcher<A> {
    fn dispatch(
        &self,
        pool: &WorkerPool,
        targets: Vec<Environment>,
        config: &Arc<BulkActionConfig>,
        ctx: &TaskContext,
    ) -> Result<Vec<TaskHandle<ActionResult>>> {
        let available = targets.len();
        let selected = select_targets(targets, config, self.action.requires_connection());
        debug!(
            run_id = ctx.run_id,
            available,
            selected = selected.len(),
            pool = pool.name(),
            "submitting bulk action tasks"
        );

        let handles = selected
            .into_iter()
            .map(|target| {
                let action = self.action.clone();
                let config = config.clone();
                let ctx = ctx.clone();
                let span = ctx.span(&target);
                pool.submit(
                    target.display_name(),
                    async move { action.execute(&target, &config, &ctx).await }.instrument(span),
                )
            })
            .collect();
        Ok(handles)
    }
}
