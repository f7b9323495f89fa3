//! Post-run reports.
//!
//! When a request asks for it, a [`RunContext`] is assembled after the last
//! result and handed to a [`ReportSender`] on a detached task. The session
//! closes without waiting for it, and send failures are only logged.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::catalog::TargetResolver;
use crate::config::ReportConfig;
use crate::error::{BulkError, Result};
use crate::request::BulkActionConfig;
use crate::run::RunContext;
use crate::types::ActionResult;

#[async_trait]
pub trait ReportSender: Send + Sync {
    async fn send(&self, report: &RunContext, project_id: Uuid) -> Result<()>;
}

/// Pick the sender for `config`: a webhook when one is configured, else the
/// log.
pub fn sender_for(config: Option<&ReportConfig>) -> Result<Arc<dyn ReportSender>> {
    match config.and_then(|r| r.webhook_url.as_deref()) {
        Some(url) => Ok(Arc::new(WebhookReportSender::new(url)?)),
        None => Ok(Arc::new(LogReportSender)),
    }
}

// ---------------------------------------------------------------------------
// LogReportSender
// ---------------------------------------------------------------------------

/// Writes a one-line summary per report to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReportSender;

#[async_trait]
impl ReportSender for LogReportSender {
    async fn send(&self, report: &RunContext, project_id: Uuid) -> Result<()> {
        let (succeeded, failed) = report.tally();
        info!(
            run_id = report.id,
            %project_id,
            project = %report.project_name,
            environment = %report.environment_name,
            system = %report.system_name,
            recipients = ?report.recipients,
            succeeded,
            failed,
            "bulk action report"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WebhookReportSender
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookBody<'a> {
    project_id: Uuid,
    run: &'a RunContext,
}

/// POSTs each report as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookReportSender {
    client: reqwest::Client,
    url: String,
}

impl WebhookReportSender {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReportSender for WebhookReportSender {
    async fn send(&self, report: &RunContext, project_id: Uuid) -> Result<()> {
        let body = WebhookBody {
            project_id,
            run: report,
        };
        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| BulkError::Report(format!("POST {}: {e}", self.url)))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CompletionReporter
// ---------------------------------------------------------------------------

/// Assembles and sends reports off the session's path.
#[derive(Clone)]
pub struct CompletionReporter {
    resolver: Arc<dyn TargetResolver>,
    sender: Arc<dyn ReportSender>,
}

impl CompletionReporter {
    pub fn new(resolver: Arc<dyn TargetResolver>, sender: Arc<dyn ReportSender>) -> Self {
        Self { resolver, sender }
    }

    /// Spawn report delivery for a finished run. The returned handle may be
    /// dropped; the task keeps running.
    pub fn dispatch(
        &self,
        run_id: i64,
        config: Arc<BulkActionConfig>,
        results: Vec<ActionResult>,
    ) -> JoinHandle<()> {
        let resolver = self.resolver.clone();
        let sender = self.sender.clone();
        let span = info_span!("report", run_id, project_id = %config.project_id);
        tokio::spawn(
            async move {
                let report = RunContext::assemble(resolver.as_ref(), run_id, &config, results).await;
                match sender.send(&report, config.project_id).await {
                    Ok(()) => info!(results = report.results.len(), "report sent"),
                    Err(e) => warn!(error = %e, "report delivery failed"),
                }
            }
            .instrument(span),
        )
    }
}
