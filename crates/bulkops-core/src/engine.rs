//! The bulk-action run pipeline.
//!
//! ```text
//! run id -> lock(endpoint, project) -> resolve -> pool + dispatch
//!        -> STARTED -> results in submission order -> FINISHED -> report
//! ```
//!
//! Everything after the run id executes inside the lock, including result
//! delivery. Any fatal error drops the per-run pool, which cancels and aborts
//! the tasks it still owns.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::catalog::TargetResolver;
use crate::collector::{collect_ordered, FrameWriter};
use crate::config::Config;
use crate::dispatch::{ActionDispatcher, TaskContext};
use crate::error::{BulkError, Result};
use crate::lock::{lock_key, with_lock, LockManager};
use crate::pool::WorkerPool;
use crate::report::{CompletionReporter, ReportSender};
use crate::request::BulkActionConfig;
use crate::run::RunIdGenerator;
use crate::session::SessionChannel;
use crate::types::{ActionResult, RunStatus};

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Longest a run waits for its project's lock.
    pub lock_max_hold: Duration,
    pub parallel_workers: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lock_max_hold: Duration::from_secs(600),
            parallel_workers: 10,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            lock_max_hold: config.lock.max_hold(),
            parallel_workers: config.scheduler.parallel_workers,
        }
    }
}

/// Hooks for run bookkeeping. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn run_started(&self, _run_id: i64, _endpoint: &str, _config: &BulkActionConfig) {}

    fn run_finished(&self, _outcome: &RunOutcome) {}

    fn run_failed(&self, _run_id: i64, _error: &BulkError) {}
}

struct NoopObserver;

impl RunObserver for NoopObserver {}

/// What a completed run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: i64,
    /// `NothingFound` or `Finished`.
    pub status: RunStatus,
    pub results: Vec<ActionResult>,
    /// Detached report delivery, when the request asked for one.
    pub report: Option<JoinHandle<()>>,
}

pub struct BulkActionEngine {
    resolver: Arc<dyn TargetResolver>,
    dispatcher: Arc<dyn ActionDispatcher>,
    locks: Arc<dyn LockManager>,
    reporter: CompletionReporter,
    settings: EngineSettings,
    run_ids: Arc<RunIdGenerator>,
    observer: Arc<dyn RunObserver>,
}

impl BulkActionEngine {
    pub fn new(
        resolver: Arc<dyn TargetResolver>,
        dispatcher: Arc<dyn ActionDispatcher>,
        locks: Arc<dyn LockManager>,
        sender: Arc<dyn ReportSender>,
    ) -> Self {
        Self {
            reporter: CompletionReporter::new(resolver.clone(), sender),
            resolver,
            dispatcher,
            locks,
            settings: EngineSettings::default(),
            run_ids: Arc::new(RunIdGenerator::new()),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share one id sequence between engines serving different endpoints.
    pub fn with_run_ids(mut self, run_ids: Arc<RunIdGenerator>) -> Self {
        self.run_ids = run_ids;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Execute one request against `channel`.
    ///
    /// `endpoint` scopes the lock together with the project id. Cancelling
    /// `cancel` abandons the run at its next suspension point, including
    /// while it waits for the lock.
    pub async fn run(
        &self,
        endpoint: &str,
        config: BulkActionConfig,
        channel: &dyn SessionChannel,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let run_id = self.run_ids.next_id();
        let config = Arc::new(config);
        let project_id = config.project_id;
        self.observer.run_started(run_id, endpoint, &config);

        let key = lock_key(endpoint, project_id);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BulkError::Cancelled),
            res = with_lock(self.locks.as_ref(), &key, self.settings.lock_max_hold, || {
                self.run_locked(run_id, endpoint, &config, channel, cancel)
            }) => res,
        };

        match outcome {
            Ok(outcome) => {
                self.observer.run_finished(&outcome);
                Ok(outcome)
            }
            Err(e) => {
                error!(run_id, %project_id, endpoint, error = %e, "bulk action run failed");
                self.observer.run_failed(run_id, &e);
                Err(e)
            }
        }
    }

    async fn run_locked(
        &self,
        run_id: i64,
        endpoint: &str,
        config: &Arc<BulkActionConfig>,
        channel: &dyn SessionChannel,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let project_id = config.project_id;
        let targets = self
            .resolver
            .list_targets(project_id)
            .await
            .map_err(|e| match e {
                BulkError::Resolution(_) => e,
                other => BulkError::Resolution(other.to_string()),
            })?;

        let pool = WorkerPool::for_run(
            config.execute_in_parallel,
            self.settings.parallel_workers,
            cancel,
        );
        let ctx = TaskContext {
            run_id,
            endpoint: endpoint.to_string(),
            project_id,
            cancel: pool.cancel_token().clone(),
        };
        let handles = self.dispatcher.dispatch(&pool, targets, config, &ctx)?;
        let mut writer = FrameWriter::new(channel, run_id);

        if handles.is_empty() {
            info!(run_id, %project_id, endpoint, "no targets matched");
            writer.status(RunStatus::NothingFound).await?;
            pool.shutdown().await;
            return Ok(RunOutcome {
                run_id,
                status: RunStatus::NothingFound,
                results: Vec::new(),
                report: None,
            });
        }

        info!(
            run_id,
            %project_id,
            endpoint,
            tasks = handles.len(),
            pool = pool.name(),
            "bulk action started"
        );
        writer.status(RunStatus::Started).await?;
        let results = collect_ordered(handles, &mut writer, cancel).await?;
        writer.status(RunStatus::Finished).await?;
        pool.shutdown().await;
        info!(run_id, %project_id, results = results.len(), frames = writer.sent(), "bulk action finished");

        let report = config
            .send_result
            .then(|| self.reporter.dispatch(run_id, config.clone(), results.clone()));

        Ok(RunOutcome {
            run_id,
            status: RunStatus::Finished,
            results,
            report,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::catalog::project_id_for;
    use crate::lock::LocalLockManager;
    use crate::report::testing::RecordingSender;
    use crate::report::LogReportSender;
    use crate::session::testing::RecordingChannel;
    use std::sync::Mutex;
    use uuid::Uuid;

    const ENDPOINT: &str = "/ws/bulk/cleanup";

    fn billing() -> BulkActionConfig {
        BulkActionConfig::for_project(project_id_for("billing"))
    }

    fn statuses(channel: &RecordingChannel) -> Vec<String> {
        channel
            .json_frames()
            .iter()
            .map(|f| match f.get("status") {
                Some(status) => status.as_str().unwrap().to_string(),
                None => f["environmentName"].as_str().unwrap().to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn empty_dispatch_sends_nothing_found_alone() {
        let engine = engine_with(ScriptedDispatcher::new(Vec::new()));
        let channel = RecordingChannel::new();
        let outcome = engine
            .run(ENDPOINT, billing(), &channel, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::NothingFound);
        assert_eq!(statuses(&channel), vec!["NOTHING_FOUND"]);
        assert_eq!(channel.json_frames()[0]["id"], outcome.run_id);
    }

    #[tokio::test]
    async fn n_targets_yield_n_plus_two_frames() {
        let engine = engine_with(ScriptedDispatcher::new(vec![
            Step::ok("t1"),
            Step::unsuccessful("t2"),
            Step::ok("t3"),
        ]));
        let channel = RecordingChannel::new();
        let outcome = engine
            .run(ENDPOINT, billing(), &channel, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(statuses(&channel), vec!["STARTED", "t1", "t2", "t3", "FINISHED"]);
        assert_eq!(outcome.results.len(), 3);
        assert!(!outcome.results[1].success);
        let frames = channel.json_frames();
        assert_eq!(frames[0]["id"], frames[4]["id"]);
    }

    #[tokio::test]
    async fn parallel_run_still_delivers_in_submission_order() {
        let overlap = Arc::new(Overlap::default());
        let engine = engine_with(ScriptedDispatcher::with_overlap(
            vec![Step::slow("t1", 80), Step::slow("t2", 10), Step::slow("t3", 40)],
            overlap.clone(),
        ));
        let mut config = billing();
        config.execute_in_parallel = true;
        let channel = RecordingChannel::new();
        engine
            .run(ENDPOINT, config, &channel, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(statuses(&channel), vec!["STARTED", "t1", "t2", "t3", "FINISHED"]);
        assert!(overlap.max() > 1);
    }

    #[tokio::test]
    async fn sequential_run_never_overlaps_tasks() {
        let overlap = Arc::new(Overlap::default());
        let engine = engine_with(ScriptedDispatcher::with_overlap(
            vec![Step::slow("t1", 20), Step::slow("t2", 5), Step::slow("t3", 10)],
            overlap.clone(),
        ));
        let channel = RecordingChannel::new();
        engine
            .run(ENDPOINT, billing(), &channel, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(overlap.max(), 1);
    }

    #[tokio::test]
    async fn task_failure_stops_later_frames() {
        let engine = engine_with(ScriptedDispatcher::new(vec![
            Step::ok("t1"),
            Step::fail("t2"),
            Step::ok("t3"),
        ]));
        let channel = RecordingChannel::new();
        let err = engine
            .run(ENDPOINT, billing(), &channel, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::TaskFailed { .. }));
        assert_eq!(statuses(&channel), vec!["STARTED", "t1"]);
    }

    #[tokio::test]
    async fn unknown_project_is_resolution_failure_without_frames() {
        let engine = engine_with(ScriptedDispatcher::new(vec![Step::ok("t1")]));
        let channel = RecordingChannel::new();
        let err = engine
            .run(
                ENDPOINT,
                BulkActionConfig::for_project(Uuid::new_v4()),
                &channel,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Resolution(_)));
        assert!(channel.frames().is_empty());
    }

    #[tokio::test]
    async fn held_lock_means_run_never_starts() {
        let locks = Arc::new(LocalLockManager::new());
        let engine = engine_parts(
            ScriptedDispatcher::new(vec![Step::ok("t1")]),
            locks.clone(),
            Arc::new(LogReportSender),
        )
        .with_settings(EngineSettings {
            lock_max_hold: Duration::from_millis(50),
            parallel_workers: 10,
        });
        let _held = locks
            .acquire(&lock_key(ENDPOINT, project_id_for("billing")), Duration::from_secs(1))
            .await
            .unwrap();

        let channel = RecordingChannel::new();
        let err = engine
            .run(ENDPOINT, billing(), &channel, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::LockTimeout { .. }));
        assert!(channel.frames().is_empty());
    }

    async fn overlap_for(first: &str, second: &str) -> usize {
        let overlap = Arc::new(Overlap::default());
        let engine = Arc::new(engine_with(ScriptedDispatcher::with_overlap(
            vec![Step::slow("a", 40), Step::slow("b", 40)],
            overlap.clone(),
        )));
        let runs: Vec<_> = [first, second]
            .into_iter()
            .map(|project| {
                let engine = engine.clone();
                let config = BulkActionConfig::for_project(project_id_for(project));
                tokio::spawn(async move {
                    let channel = RecordingChannel::new();
                    engine
                        .run(ENDPOINT, config, &channel, &CancellationToken::new())
                        .await
                        .map(|o| o.results.len())
                })
            })
            .collect();
        for run in runs {
            assert_eq!(run.await.unwrap().unwrap(), 2);
        }
        overlap.max()
    }

    #[tokio::test]
    async fn same_project_runs_are_serialized() {
        assert_eq!(overlap_for("billing", "billing").await, 1);
    }

    #[tokio::test]
    async fn different_projects_run_concurrently() {
        assert_eq!(overlap_for("billing", "payroll").await, 2);
    }

    #[tokio::test]
    async fn report_sent_once_with_all_results() {
        let sender = Arc::new(RecordingSender::default());
        let engine = engine_parts(
            ScriptedDispatcher::new(vec![Step::ok("t1"), Step::ok("t2"), Step::ok("t3")]),
            Arc::new(LocalLockManager::new()),
            sender.clone(),
        );
        let mut config = billing();
        config.execute_in_parallel = true;
        config.send_result = true;
        config.recipients = vec!["a@b.com".into()];

        let channel = RecordingChannel::new();
        let outcome = engine
            .run(ENDPOINT, config, &channel, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(statuses(&channel), vec!["STARTED", "t1", "t2", "t3", "FINISHED"]);
        outcome.report.unwrap().await.unwrap();

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        let (report, project_id) = &sent[0];
        assert_eq!(*project_id, project_id_for("billing"));
        assert_eq!(report.id, outcome.run_id);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.recipients, vec!["a@b.com".to_string()]);
    }

    #[tokio::test]
    async fn no_report_unless_requested() {
        let sender = Arc::new(RecordingSender::default());
        let engine = engine_parts(
            ScriptedDispatcher::new(vec![Step::ok("t1")]),
            Arc::new(LocalLockManager::new()),
            sender.clone(),
        );
        let channel = RecordingChannel::new();
        let outcome = engine
            .run(ENDPOINT, billing(), &channel, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.report.is_none());
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn closed_channel_does_not_fail_the_run() {
        let engine = engine_with(ScriptedDispatcher::new(vec![Step::ok("t1")]));
        let channel = RecordingChannel::new();
        channel.set_open(false);
        let outcome = engine
            .run(ENDPOINT, billing(), &channel, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert!(channel.frames().is_empty());
    }

    #[tokio::test]
    async fn cancellation_aborts_the_run() {
        let engine = engine_with(ScriptedDispatcher::new(vec![
            Step::ok("t1"),
            Step::slow("t2", 30_000),
        ]));
        let channel = RecordingChannel::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = engine
            .run(ENDPOINT, billing(), &channel, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Cancelled));
        assert_eq!(statuses(&channel), vec!["STARTED", "t1"]);
    }

    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl RunObserver for Journal {
        fn run_started(&self, _run_id: i64, endpoint: &str, _config: &BulkActionConfig) {
            self.0.lock().unwrap().push(format!("started {endpoint}"));
        }

        fn run_finished(&self, outcome: &RunOutcome) {
            self.0.lock().unwrap().push(format!("finished {}", outcome.status));
        }

        fn run_failed(&self, _run_id: i64, error: &BulkError) {
            self.0.lock().unwrap().push(format!("failed {error}"));
        }
    }

    #[tokio::test]
    async fn observer_sees_run_lifecycle() {
        let journal = Arc::new(Journal::default());
        let engine = engine_with(ScriptedDispatcher::new(vec![Step::ok("t1")]))
            .with_observer(journal.clone());
        let channel = RecordingChannel::new();
        engine
            .run(ENDPOINT, billing(), &channel, &CancellationToken::new())
            .await
            .unwrap();
        engine
            .run(
                ENDPOINT,
                BulkActionConfig::for_project(Uuid::new_v4()),
                &channel,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        let entries = journal.0.lock().unwrap().clone();
        assert_eq!(entries[0], "started /ws/bulk/cleanup");
        assert_eq!(entries[1], "finished FINISHED");
        assert!(entries[3].starts_with("failed target resolution failed"));
    }
}
