use eventsource_stream::Eventsource;
use futures::StreamExt;
use snafu::ensure;
use tokio::sync::{mpsc, oneshot};

use cordial_session::SessionId;

use crate::client::ApiClient;
use crate::error::{BackendResult, EmptyHistorySnafu};
use crate::types::{StreamChatRequest, StreamFrame};

/// One event surfaced by an in-flight generation.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A well-formed protocol frame (delta, terminal, or server-side abort).
    Frame(StreamFrame),
    /// The connection or payload broke before a terminal frame arrived.
    Failed { message: String },
}

/// Receiving side of one generation, plus its sole cancellation handle.
///
/// Dropping the stream fires cancellation, so an abandoned generation never
/// leaks its connection.
#[derive(Debug)]
pub struct GenerationStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl GenerationStream {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Fires the abort signal. Only the first call does anything; repeats are
    /// idempotent no-ops.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|cancel_tx| cancel_tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

impl ApiClient {
    /// Opens one streaming generation against the chat endpoint.
    ///
    /// The connection is driven by a spawned worker; frames arrive over the
    /// returned stream in send order. The worker stops at the first terminal
    /// frame, transport failure, or cancellation.
    pub fn stream_chat(
        &self,
        embed_id: &str,
        session_id: &SessionId,
        request: StreamChatRequest,
    ) -> BackendResult<GenerationStream> {
        ensure!(
            !request.messages.is_empty(),
            EmptyHistorySnafu {
                stage: "stream-chat",
            }
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let url = self.url(&format!("/api/chat/{embed_id}/{session_id}"));
        tokio::spawn(run_stream_worker(
            self.http().clone(),
            url,
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(GenerationStream {
            events: event_rx,
            cancel_tx: Some(cancel_tx),
        })
    }
}

async fn run_stream_worker(
    http: reqwest::Client,
    url: String,
    request: StreamChatRequest,
    event_tx: mpsc::UnboundedSender<StreamEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let opened = tokio::select! {
        _ = &mut cancel_rx => {
            tracing::debug!(url = %url, "generation cancelled before open");
            return;
        }
        opened = http.post(&url).json(&request).send() => opened,
    };

    let response = match opened {
        Ok(response) => response,
        Err(source) => {
            tracing::error!(url = %url, error = %source, "failed to open generation stream");
            emit_failure(&event_tx, format!("failed to open stream: {source}"));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        // Some backend failures arrive as a well-formed abort frame in the
        // error body; forward those verbatim so the caller sees the server's
        // own error text.
        match serde_json::from_str::<StreamFrame>(&body) {
            Ok(frame) => {
                let _ = event_tx.send(StreamEvent::Frame(frame));
            }
            Err(_) => {
                tracing::warn!(url = %url, status = status.as_u16(), "generation stream rejected at open");
                emit_failure(
                    &event_tx,
                    format!("An error occurred while streaming response. Code {}", status.as_u16()),
                );
            }
        }
        return;
    }

    let mut frames = response.bytes_stream().eventsource();
    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(url = %url, "generation stream cancelled");
                return;
            }
            next_frame = frames.next() => {
                match next_frame {
                    Some(Ok(event)) => {
                        let frame = match serde_json::from_str::<StreamFrame>(&event.data) {
                            Ok(frame) => frame,
                            Err(source) => {
                                tracing::warn!(url = %url, error = %source, "malformed generation frame");
                                emit_failure(
                                    &event_tx,
                                    format!("An error occurred while streaming response. {source}"),
                                );
                                return;
                            }
                        };

                        let terminal = frame.is_terminal();
                        if event_tx.send(StreamEvent::Frame(frame)).is_err() {
                            return;
                        }
                        if terminal {
                            return;
                        }
                    }
                    Some(Err(source)) => {
                        tracing::warn!(url = %url, error = %source, "generation stream transport error");
                        emit_failure(
                            &event_tx,
                            format!("An error occurred while streaming response. {source}"),
                        );
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}

fn emit_failure(event_tx: &mpsc::UnboundedSender<StreamEvent>, message: String) {
    let _ = event_tx.send(StreamEvent::Failed { message });
}
