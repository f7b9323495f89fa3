//! WebSocket surface for bulk-action sessions.
//!
//! Each connection is one session. Inbound text frames are handed to the
//! shared inbound pool so the read loop stays responsive while a run is in
//! progress; outbound frames go through a writer task fed by an mpsc queue.

use async_trait::async_trait;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use bulkops_core::engine::BulkActionEngine;
use bulkops_core::error::{BulkError, Result as BulkResult};
use bulkops_core::pool::WorkerPool;
use bulkops_core::session::{Session, SessionChannel};
use bulkops_core::types::{CloseStatus, SessionState};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// GET /ws/bulk/{action}
pub async fn bulk_socket(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Path(action): Path<String>,
    State(app): State<AppState>,
) -> Result<Response, AppError> {
    let engine = app
        .engine(&action)
        .ok_or_else(|| AppError(BulkError::UnknownAction(action.clone()).into()))?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    let endpoint = format!("/ws/bulk/{action}");
    let inbound = app.inbound.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, endpoint, engine, inbound)))
}

async fn handle_socket(
    socket: WebSocket,
    endpoint: String,
    engine: Arc<BulkActionEngine>,
    inbound: Arc<WorkerPool>,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let channel = Arc::new(WsChannel::new(tx));
    let closed = channel.closed.clone();
    let session = Arc::new(Session::new(endpoint, channel));
    info!(session = session.id(), endpoint = session.endpoint(), "bulk session opened");

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let session = session.clone();
                    let engine = engine.clone();
                    let frame = text.as_str().to_string();
                    let _handle = inbound.submit(session.id().to_string(), async move {
                        session.process(&engine, &frame).await;
                        Ok(())
                    });
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(session = session.id(), error = %e, "bulk websocket receive error");
                    break;
                }
            }
        }
    }

    match session.state() {
        SessionState::Open => {
            session.close(CloseStatus::Normal).await;
        }
        SessionState::Running => session.disconnected(),
        SessionState::ClosedNormal | SessionState::ClosedError => {}
    }
    // The writer stops after the close frame or once the session is dropped.
    let _ = writer.await;
    debug!(session = session.id(), "bulk session finished");
}

// ---------------------------------------------------------------------------
// WsChannel
// ---------------------------------------------------------------------------

/// [`SessionChannel`] over the writer task's queue.
pub struct WsChannel {
    id: String,
    tx: mpsc::UnboundedSender<Message>,
    closed: CancellationToken,
}

impl WsChannel {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            tx,
            closed: CancellationToken::new(),
        }
    }
}

fn close_frame(status: CloseStatus) -> CloseFrame {
    let reason = match status {
        CloseStatus::Normal => "bulk action finished",
        CloseStatus::Error => "bulk action failed",
    };
    CloseFrame {
        code: status.code(),
        reason: Utf8Bytes::from_static(reason),
    }
}

#[async_trait]
impl SessionChannel for WsChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }

    async fn send_text(&self, text: String) -> BulkResult<()> {
        self.tx
            .send(Message::Text(text.into()))
            .map_err(|_| BulkError::Delivery("websocket writer has stopped".to_string()))
    }

    async fn close(&self, status: CloseStatus) -> BulkResult<()> {
        if self.closed.is_cancelled() {
            return Err(BulkError::Delivery("websocket already closed".to_string()));
        }
        self.closed.cancel();
        self.tx
            .send(Message::Close(Some(close_frame(status))))
            .map_err(|_| BulkError::Delivery("websocket writer has stopped".to_string()))
    }
}
