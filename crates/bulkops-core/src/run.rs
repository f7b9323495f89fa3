use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;
use uuid::Uuid;

use crate::catalog::TargetResolver;
use crate::request::BulkActionConfig;
use crate::types::ActionResult;

/// Placeholder for names the directory could not resolve.
pub const NOT_FOUND: &str = "Not Found";

// ---------------------------------------------------------------------------
// RunIdGenerator
// ---------------------------------------------------------------------------

/// Issues run ids as epoch milliseconds, bumped when two runs start in the
/// same millisecond so ids stay unique within the process.
#[derive(Debug, Default)]
pub struct RunIdGenerator {
    last: AtomicI64,
}

impl RunIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Snapshot of one finished run, handed to the report sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    pub id: i64,
    pub project_id: Uuid,
    pub project_name: String,
    pub environment_name: String,
    pub system_name: String,
    pub recipients: Vec<String>,
    pub results: Vec<ActionResult>,
}

impl RunContext {
    /// Build the snapshot, resolving display names best-effort. Lookups that
    /// fail or have nothing to look up become [`NOT_FOUND`].
    pub async fn assemble(
        resolver: &dyn TargetResolver,
        run_id: i64,
        config: &BulkActionConfig,
        results: Vec<ActionResult>,
    ) -> Self {
        let project_name = match resolver.project_name(config.project_id).await {
            Ok(name) => name,
            Err(e) => {
                debug!(run_id, error = %e, "project name lookup failed");
                NOT_FOUND.to_string()
            }
        };

        let environment_name = match config.environment_id {
            Some(env_id) => resolver
                .environment_name(env_id)
                .await
                .unwrap_or_else(|e| {
                    debug!(run_id, error = %e, "environment name lookup failed");
                    NOT_FOUND.to_string()
                }),
            None => NOT_FOUND.to_string(),
        };

        let system_name = match (config.environment_id, config.system_id) {
            (Some(env_id), Some(system_id)) => resolver
                .system_name(env_id, system_id)
                .await
                .unwrap_or_else(|e| {
                    debug!(run_id, error = %e, "system name lookup failed");
                    NOT_FOUND.to_string()
                }),
            _ => NOT_FOUND.to_string(),
        };

        Self {
            id: run_id,
            project_id: config.project_id,
            project_name,
            environment_name,
            system_name,
            recipients: config.recipients.clone(),
            results,
        }
    }

    /// `(succeeded, failed)` result counts.
    pub fn tally(&self) -> (usize, usize) {
        let ok = self.results.iter().filter(|r| r.success).count();
        (ok, self.results.len() - ok)
    }
}
