//! Ordered result delivery.
//!
//! Handles are awaited one at a time in submission order, and each result is
//! written to the session as soon as its handle resolves. A slow early target
//! holds back later results that already finished; callers get a fixed order
//! in exchange.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{BulkError, Result};
use crate::pool::TaskHandle;
use crate::session::SessionChannel;
use crate::types::{ActionResult, RunStatus, StatusFrame};

/// Writes a run's frames to its session channel.
///
/// Serialization failures are returned; a closed or failing channel is
/// logged and the frame skipped.
pub struct FrameWriter<'a> {
    channel: &'a dyn SessionChannel,
    run_id: i64,
    sent: usize,
}

impl<'a> FrameWriter<'a> {
    pub fn new(channel: &'a dyn SessionChannel, run_id: i64) -> Self {
        Self {
            channel,
            run_id,
            sent: 0,
        }
    }

    /// Frames actually handed to the channel.
    pub fn sent(&self) -> usize {
        self.sent
    }

    pub async fn status(&mut self, status: RunStatus) -> Result<()> {
        self.write(&StatusFrame::new(self.run_id, status)).await
    }

    pub async fn result(&mut self, result: &ActionResult) -> Result<()> {
        self.write(result).await
    }

    async fn write<T: Serialize>(&mut self, frame: &T) -> Result<()> {
        let text = serde_json::to_string(frame).map_err(BulkError::Serialize)?;
        if !self.channel.is_open() {
            warn!(
                run_id = self.run_id,
                session = self.channel.id(),
                "trying to send a frame but the session is closed"
            );
            return Ok(());
        }
        let size = text.len();
        match self.channel.send_text(text).await {
            Ok(()) => {
                self.sent += 1;
                debug!(run_id = self.run_id, session = self.channel.id(), size, "frame sent");
            }
            Err(e) => {
                warn!(run_id = self.run_id, session = self.channel.id(), error = %e, "frame delivery failed");
            }
        }
        Ok(())
    }
}

/// Drain `handles` in order, streaming each result through `writer`.
///
/// The first handle that resolves to an error aborts collection; later
/// handles are never consulted and their results never sent.
pub async fn collect_ordered(
    handles: Vec<TaskHandle<ActionResult>>,
    writer: &mut FrameWriter<'_>,
    cancel: &CancellationToken,
) -> Result<Vec<ActionResult>> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let label = handle.label().to_string();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BulkError::Cancelled),
            res = handle.wait() => res,
        };
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                error!(run_id = writer.run_id, target = %label, error = %e, "bulk action task failed");
                return Err(e);
            }
        };
        writer.result(&result).await?;
        results.push(result);
    }
    Ok(results)
}
