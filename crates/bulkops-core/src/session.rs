//! Session lifecycle: `Open -> Running -> {ClosedNormal, ClosedError}`.
//!
//! A session accepts one request frame. Whatever happens while processing it
//! (decode failure, lock timeout, resolution or task failure, cancellation)
//! the session ends in exactly one closed state, and the close is attempted
//! even when the transport is already gone.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::BulkActionEngine;
use crate::error::Result;
use crate::request::BulkActionConfig;
use crate::types::{CloseStatus, SessionState};

/// Bidirectional text transport behind a session, e.g. a WebSocket.
#[async_trait]
pub trait SessionChannel: Send + Sync {
    /// Identifier used in log lines.
    fn id(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> Result<()>;

    /// Close with `status`. Must tolerate an already-closed transport.
    async fn close(&self, status: CloseStatus) -> Result<()>;
}

pub struct Session {
    endpoint: String,
    channel: Arc<dyn SessionChannel>,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
}

impl Session {
    /// `endpoint` is the logical path the session was opened on; it scopes
    /// the run's lock.
    pub fn new(endpoint: impl Into<String>, channel: Arc<dyn SessionChannel>) -> Self {
        Self {
            endpoint: endpoint.into(),
            channel,
            state: Mutex::new(SessionState::Open),
            cancel: CancellationToken::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn id(&self) -> &str {
        self.channel.id()
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// The peer went away: abort whatever the run has left.
    pub fn disconnected(&self) {
        if !self.cancel.is_cancelled() {
            info!(session = self.id(), "session disconnected, cancelling in-flight work");
        }
        self.cancel.cancel();
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// `Open -> Running`. Returns false if the session already took a frame.
    fn begin(&self) -> bool {
        let mut state = self.lock_state();
        if *state != SessionState::Open {
            return false;
        }
        *state = SessionState::Running;
        true
    }

    /// Process one request frame end to end and close the session.
    pub async fn process(&self, engine: &BulkActionEngine, frame: &str) -> SessionState {
        if !self.begin() {
            warn!(
                session = self.id(),
                state = ?self.state(),
                "ignoring frame: session already processed a request"
            );
            return self.state();
        }
        info!(session = self.id(), endpoint = %self.endpoint, size = frame.len(), "bulk action request received");

        let work = async {
            match BulkActionConfig::decode(frame) {
                Ok(config) => {
                    engine
                        .run(&self.endpoint, config, self.channel.as_ref(), &self.cancel)
                        .await
                }
                Err(e) => Err(e),
            }
        };

        // A panic on the processing path still closes the session.
        match AssertUnwindSafe(work).catch_unwind().await {
            Err(_) => {
                error!(session = self.id(), "bulk action request processing panicked");
                self.close(CloseStatus::Error).await
            }
            Ok(Ok(outcome)) => {
                info!(
                    session = self.id(),
                    run_id = outcome.run_id,
                    status = %outcome.status,
                    results = outcome.results.len(),
                    "bulk action request processed"
                );
                self.close(CloseStatus::Normal).await
            }
            Ok(Err(e)) => {
                error!(session = self.id(), error = %e, "error while processing the bulk action request");
                self.close(CloseStatus::Error).await
            }
        }
    }

    /// Close the session. Idempotent: the first close decides the final
    /// state; transport errors are logged.
    pub async fn close(&self, status: CloseStatus) -> SessionState {
        let final_state = {
            let mut state = self.lock_state();
            if !state.is_closed() {
                *state = SessionState::closed_with(status);
            }
            *state
        };
        match self.channel.close(status).await {
            Ok(()) => info!(session = self.id(), ?status, "session closed"),
            Err(e) => warn!(session = self.id(), error = %e, "can't close session"),
        }
        final_state
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingChannel;
    use super::*;
    use crate::catalog::{project_id_for, Environment, YamlCatalog};
    use crate::dispatch::{ActionDispatcher, TaskContext};
    use crate::engine::testing::{engine_parts, engine_with, ScriptedDispatcher, Step, TEST_CATALOG};
    use crate::engine::EngineSettings;
    use crate::lock::{lock_key, LocalLockManager, LockManager};
    use crate::pool::{TaskHandle, WorkerPool};
    use crate::report::LogReportSender;
    use crate::types::ActionResult;
    use std::time::Duration;

    const ENDPOINT: &str = "/ws/bulk/cleanup";

    fn frame() -> String {
        format!(r#"{{"projectId": "{}"}}"#, project_id_for("billing"))
    }

    #[tokio::test]
    async fn success_closes_normally() {
        let engine = engine_with(ScriptedDispatcher::new(vec![Step::ok("a")]));
        let channel = Arc::new(RecordingChannel::new());
        let session = Session::new("/ws/bulk/cleanup", channel.clone());
        let state = session.process(&engine, &frame()).await;
        assert_eq!(state, SessionState::ClosedNormal);
        assert_eq!(channel.closes(), vec![CloseStatus::Normal]);
    }

    #[tokio::test]
    async fn decode_failure_closes_with_error_and_sends_nothing() {
        let engine = engine_with(ScriptedDispatcher::new(vec![Step::ok("a")]));
        let channel = Arc::new(RecordingChannel::new());
        let session = Session::new("/ws/bulk/cleanup", channel.clone());
        let state = session.process(&engine, "{broken").await;
        assert_eq!(state, SessionState::ClosedError);
        assert!(channel.frames().is_empty());
        assert_eq!(channel.closes(), vec![CloseStatus::Error]);
    }

    #[tokio::test]
    async fn task_failure_closes_with_error() {
        let engine = engine_with(ScriptedDispatcher::new(vec![Step::fail("a")]));
        let channel = Arc::new(RecordingChannel::new());
        let session = Session::new("/ws/bulk/cleanup", channel.clone());
        assert_eq!(
            session.process(&engine, &frame()).await,
            SessionState::ClosedError
        );
    }

    #[tokio::test]
    async fn second_frame_is_ignored() {
        let engine = engine_with(ScriptedDispatcher::new(vec![Step::ok("a")]));
        let channel = Arc::new(RecordingChannel::new());
        let session = Session::new("/ws/bulk/cleanup", channel.clone());
        session.process(&engine, &frame()).await;
        let before = channel.frames().len();
        let state = session.process(&engine, &frame()).await;
        assert_eq!(state, SessionState::ClosedNormal);
        assert_eq!(channel.frames().len(), before);
        assert_eq!(channel.closes().len(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_keeps_first_state() {
        let channel = Arc::new(RecordingChannel::new());
        let session = Session::new("/ws/bulk/cleanup", channel.clone());
        assert_eq!(session.close(CloseStatus::Error).await, SessionState::ClosedError);
        // Transport now reports an error; the session still settles quietly.
        assert_eq!(session.close(CloseStatus::Normal).await, SessionState::ClosedError);
        assert_eq!(channel.closes().len(), 2);
    }

    #[tokio::test]
    async fn disconnect_cancels_the_run() {
        let engine = engine_with(ScriptedDispatcher::new(vec![Step::slow("a", 30_000)]));
        let channel = Arc::new(RecordingChannel::new());
        let session = Arc::new(Session::new("/ws/bulk/cleanup", channel.clone()));
        let runner = {
            let session = session.clone();
            let frame = frame();
            tokio::spawn(async move { session.process(&engine, &frame).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        session.disconnected();
        let state = tokio::time::timeout(std::time::Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, SessionState::ClosedError);
    }

    struct PanickingDispatcher;

    impl ActionDispatcher for PanickingDispatcher {
        fn dispatch(
            &self,
            _pool: &WorkerPool,
            _targets: Vec<Environment>,
            _config: &Arc<BulkActionConfig>,
            _ctx: &TaskContext,
        ) -> Result<Vec<TaskHandle<ActionResult>>> {
            panic!("dispatcher blew up")
        }
    }

    #[tokio::test]
    async fn panic_during_processing_closes_with_error() {
        let engine = Arc::new(BulkActionEngine::new(
            Arc::new(YamlCatalog::from_yaml(TEST_CATALOG).unwrap()),
            Arc::new(PanickingDispatcher),
            Arc::new(LocalLockManager::new()),
            Arc::new(LogReportSender),
        ));
        let channel = Arc::new(RecordingChannel::new());
        let session = Arc::new(Session::new(ENDPOINT, channel.clone()));

        // Driven through a worker pool the way the server does it.
        let inbound = WorkerPool::new("inbound", 1);
        let handle = {
            let session = session.clone();
            let engine = engine.clone();
            let frame = frame();
            inbound.submit("session", async move { Ok(session.process(&engine, &frame).await) })
        };
        let state = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state, SessionState::ClosedError);
        assert_eq!(session.state(), SessionState::ClosedError);
        assert!(channel.frames().is_empty());
        assert_eq!(channel.closes(), vec![CloseStatus::Error]);
    }

    #[tokio::test]
    async fn held_lock_closes_with_error_and_sends_nothing() {
        let locks = Arc::new(LocalLockManager::new());
        let engine = engine_parts(
            ScriptedDispatcher::new(vec![Step::ok("a")]),
            locks.clone(),
            Arc::new(LogReportSender),
        )
        .with_settings(EngineSettings {
            lock_max_hold: Duration::from_millis(50),
            parallel_workers: 10,
        });
        let _lease = locks
            .acquire(&lock_key(ENDPOINT, project_id_for("billing")), Duration::from_secs(1))
            .await
            .unwrap();

        let channel = Arc::new(RecordingChannel::new());
        let session = Session::new(ENDPOINT, channel.clone());
        let state = session.process(&engine, &frame()).await;

        assert_eq!(state, SessionState::ClosedError);
        assert!(channel.frames().is_empty());
        assert_eq!(channel.closes(), vec![CloseStatus::Error]);
    }
}
