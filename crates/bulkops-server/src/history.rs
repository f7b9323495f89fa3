//! In-memory record of recent bulk runs, newest first.
//!
//! Records live only as long as the process; older entries are evicted once
//! the retention limit is reached.

use bulkops_core::engine::{RunObserver, RunOutcome};
use bulkops_core::error::BulkError;
use bulkops_core::request::BulkActionConfig;
use bulkops_core::types::RunStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub const DEFAULT_RETENTION: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Finished,
    NothingFound,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub action: String,
    pub project_id: Uuid,
    pub status: RunState,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct RunHistory {
    records: Mutex<VecDeque<RunRecord>>,
    retention: usize,
}

impl Default for RunHistory {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl RunHistory {
    pub fn new(retention: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            retention: retention.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RunRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn list(&self) -> Vec<RunRecord> {
        self.lock().iter().cloned().collect()
    }

    pub fn get(&self, id: i64) -> Option<RunRecord> {
        self.lock().iter().find(|r| r.id == id).cloned()
    }

    fn push(&self, record: RunRecord) {
        let mut records = self.lock();
        records.push_front(record);
        records.truncate(self.retention);
    }

    fn update(&self, id: i64, apply: impl FnOnce(&mut RunRecord)) {
        if let Some(record) = self.lock().iter_mut().find(|r| r.id == id) {
            apply(record);
        }
    }

    /// Observer recording runs of `action` into this history.
    pub fn observer(self: &Arc<Self>, action: &str) -> Arc<dyn RunObserver> {
        Arc::new(HistoryObserver {
            history: self.clone(),
            action: action.to_string(),
        })
    }
}

struct HistoryObserver {
    history: Arc<RunHistory>,
    action: String,
}

impl RunObserver for HistoryObserver {
    fn run_started(&self, run_id: i64, _endpoint: &str, config: &BulkActionConfig) {
        self.history.push(RunRecord {
            id: run_id,
            action: self.action.clone(),
            project_id: config.project_id,
            status: RunState::Running,
            started_at: Utc::now(),
            finished_at: None,
            results: 0,
            error: None,
        });
    }

    fn run_finished(&self, outcome: &RunOutcome) {
        let status = match outcome.status {
            RunStatus::NothingFound => RunState::NothingFound,
            _ => RunState::Finished,
        };
        let results = outcome.results.len();
        self.history.update(outcome.run_id, |r| {
            r.status = status;
            r.results = results;
            r.finished_at = Some(Utc::now());
        });
    }

    fn run_failed(&self, run_id: i64, error: &BulkError) {
        let message = error.to_string();
        self.history.update(run_id, |r| {
            r.status = RunState::Failed;
            r.error = Some(message);
            r.finished_at = Some(Utc::now());
        });
    }
}
