use chrono::Utc;
use snafu::ensure;
use tokio::sync::oneshot;

use cordial_backend::{FrameKind, GenerationStream, HistoryEntry, StreamChatRequest, StreamEvent, StreamFrame};
use cordial_session::{ChatId, Message, MessageId};

use crate::error::{GenerationAlreadyActiveSnafu, WidgetResult};
use crate::session::{SubmitOutcome, WidgetSession, lock};

/// Lifecycle of the single generation slot a session owns.
///
/// Exactly one generation may be open at a time; a submit that arrives while
/// one is active is rejected rather than queued or restarted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GenerationPhase {
    #[default]
    Idle,
    /// Optimistic pair appended, connection not yet confirmed.
    AwaitingOpen { placeholder: MessageId },
    /// First frame arrived; deltas key on the server-assigned ID.
    Streaming { message: MessageId },
}

impl GenerationPhase {
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// The generation slot: current phase plus the sole abort handle.
#[derive(Debug, Default)]
pub(crate) struct GenerationSlot {
    pub(crate) phase: GenerationPhase,
    abort: Option<oneshot::Sender<()>>,
}

impl GenerationSlot {
    /// Fires the external abort signal. Idempotent; only the first call
    /// reaches the driver.
    pub(crate) fn fire_abort(&mut self) -> bool {
        self.abort
            .take()
            .map(|abort| abort.send(()).is_ok())
            .unwrap_or(false)
    }

    fn release(&mut self) {
        self.phase = GenerationPhase::Idle;
        self.abort = None;
    }
}

enum DriveOutcome {
    Completed { final_message: Message },
    Errored,
    Cancelled,
}

/// Runs one full generation: optimistic append, stream open, delta
/// application, and the terminal protocol.
pub(crate) async fn run_generation(
    session: &WidgetSession,
    text: String,
) -> WidgetResult<SubmitOutcome> {
    let (abort_tx, mut abort_rx) = oneshot::channel();

    let (user_message, placeholder, history, chat_id) = {
        let mut slot = lock(&session.generation);
        ensure!(
            !slot.phase.is_active(),
            GenerationAlreadyActiveSnafu {
                stage: "start-generation",
            }
        );

        let mut state = lock(&session.state);
        let chat_id = state.chat().map(|chat| chat.id.clone());
        let user_message = Message::user(chat_id.clone(), text);
        state.submit_user_message(user_message.clone());

        // History is the full prior thread plus the user's turn; the
        // placeholder appended next is never serialized back to the model.
        let history = HistoryEntry::from_messages(state.messages());
        let placeholder = Message::assistant_placeholder(chat_id.clone());
        state.append_placeholder(placeholder.clone());

        slot.phase = GenerationPhase::AwaitingOpen {
            placeholder: placeholder.id.clone(),
        };
        slot.abort = Some(abort_tx);
        (user_message, placeholder, history, chat_id)
    };

    session.broadcast_new_message(&user_message);

    let request = StreamChatRequest {
        messages: history,
        chatting_with_agent: false,
    };
    let mut stream = match session
        .api
        .stream_chat(&session.embed_id, &session.session_id, request)
    {
        Ok(stream) => stream,
        Err(error) => {
            tracing::error!(error = %error, "failed to start generation stream");
            fail_generation(session, &placeholder.id, chat_id.as_ref(), &error.to_string());
            lock(&session.generation).release();
            return Ok(SubmitOutcome::Errored);
        }
    };

    let outcome = drive_stream(
        session,
        &mut stream,
        placeholder.id.clone(),
        chat_id.as_ref(),
        &mut abort_rx,
    )
    .await;

    // The slot goes idle before any terminal side effect runs.
    lock(&session.generation).release();

    match outcome {
        DriveOutcome::Completed { final_message } => {
            let agent_present = lock(&session.state).agent_present();
            if !agent_present {
                refresh_follow_ups(session).await;
            }
            session.broadcast_new_message(&final_message);
            session.broadcast_thread();
            Ok(SubmitOutcome::Completed)
        }
        DriveOutcome::Errored => {
            session.broadcast_thread();
            Ok(SubmitOutcome::Errored)
        }
        DriveOutcome::Cancelled => Ok(SubmitOutcome::Cancelled),
    }
}

async fn drive_stream(
    session: &WidgetSession,
    stream: &mut GenerationStream,
    placeholder_id: MessageId,
    chat_id: Option<&ChatId>,
    abort_rx: &mut oneshot::Receiver<()>,
) -> DriveOutcome {
    // The ID deltas key on: the placeholder's until the first frame rebinds
    // it to the server-assigned ID.
    let mut current_id = placeholder_id;
    let mut opened = false;

    loop {
        let event = tokio::select! {
            _ = &mut *abort_rx => {
                stream.cancel();
                tracing::debug!("generation aborted during teardown");
                return DriveOutcome::Cancelled;
            }
            event = stream.recv() => event,
        };

        let Some(event) = event else {
            fail_generation(
                session,
                &current_id,
                chat_id,
                "An error occurred while streaming response. Stream closed unexpectedly.",
            );
            stream.cancel();
            return DriveOutcome::Errored;
        };

        let frame = match event {
            StreamEvent::Frame(frame) => frame,
            StreamEvent::Failed { message } => {
                fail_generation(session, &current_id, chat_id, &message);
                stream.cancel();
                return DriveOutcome::Errored;
            }
        };

        if frame.kind == FrameKind::Abort || frame.error.is_some() {
            let error_text = frame.error.clone().unwrap_or_else(|| {
                "An error occurred while streaming response. Unknown Error.".to_string()
            });
            // The error takes over whichever ID slot the generation occupies;
            // partial content is discarded.
            let slot_id = if opened { frame.id.clone() } else { current_id.clone() };
            fail_generation(session, &slot_id, chat_id, &error_text);
            stream.cancel();
            return DriveOutcome::Errored;
        }

        if !opened {
            current_id = rebind_first_frame(session, &current_id, chat_id, &frame);
            opened = true;
            lock(&session.generation).phase = GenerationPhase::Streaming {
                message: current_id.clone(),
            };
        } else {
            apply_delta(session, chat_id, &frame);
        }

        if frame.is_terminal() {
            let final_message = lock(&session.state)
                .message(&frame.id)
                .cloned()
                .unwrap_or_else(|| Message::generation_error(
                    frame.id.clone(),
                    chat_id.cloned(),
                    "generation finished without a message".to_string(),
                ));
            return DriveOutcome::Completed { final_message };
        }
    }
}

/// First frame: the optimistic placeholder is atomically replaced by the
/// server-keyed message, preserving its thread position.
fn rebind_first_frame(
    session: &WidgetSession,
    placeholder_id: &MessageId,
    chat_id: Option<&ChatId>,
    frame: &StreamFrame,
) -> MessageId {
    let server_id = frame.id.clone();
    let mut state = lock(&session.state);
    let mut rebound = state
        .message(placeholder_id)
        .cloned()
        .unwrap_or_else(|| Message::assistant_placeholder(chat_id.cloned()));
    rebound.id = server_id.clone();
    rebound.loading = false;
    rebound.streaming = frame.streaming;
    rebound.updated_at = Some(Utc::now());
    if let Some(delta) = &frame.text_response {
        rebound.content.push_str(delta);
    }
    state.rebind_placeholder(placeholder_id, rebound);
    server_id
}

/// Subsequent frames: strictly keyed by the server ID. A miss (another
/// writer replaced the thread underneath us) recreates the message fresh.
fn apply_delta(session: &WidgetSession, chat_id: Option<&ChatId>, frame: &StreamFrame) {
    let mut state = lock(&session.state);
    let updated = match state.message(&frame.id) {
        Some(existing) => {
            let mut message = existing.clone();
            if let Some(delta) = &frame.text_response {
                message.content.push_str(delta);
            }
            message.streaming = frame.streaming;
            message.loading = false;
            message.updated_at = Some(Utc::now());
            message
        }
        None => {
            let mut message = Message::assistant_placeholder(chat_id.cloned());
            message.id = frame.id.clone();
            message.loading = false;
            message.streaming = frame.streaming;
            message.content = frame.text_response.clone().unwrap_or_default();
            message
        }
    };
    state.apply_generation_update(updated);
}

fn fail_generation(
    session: &WidgetSession,
    id: &MessageId,
    chat_id: Option<&ChatId>,
    error_text: &str,
) {
    tracing::error!(message_id = %id, error = %error_text, "generation failed");
    let mut state = lock(&session.state);
    state.apply_generation_update(Message::generation_error(
        id.clone(),
        chat_id.cloned(),
        error_text.to_string(),
    ));
}

async fn refresh_follow_ups(session: &WidgetSession) {
    let history = {
        let state = lock(&session.state);
        HistoryEntry::from_messages(state.messages())
    };
    match session.api.generate_follow_ups(history).await {
        Ok(follow_ups) => lock(&session.state).set_follow_ups(follow_ups),
        Err(error) => {
            // Degraded mode is simply an empty suggestion list.
            tracing::warn!(error = %error, "follow-up generation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn idle_is_the_only_inactive_phase() {
        assert!(!GenerationPhase::Idle.is_active());
        assert!(
            GenerationPhase::AwaitingOpen {
                placeholder: MessageId::from("p1"),
            }
            .is_active()
        );
        assert!(
            GenerationPhase::Streaming {
                message: MessageId::from("srv-1"),
            }
            .is_active()
        );
    }

    #[test]
    fn slot_abort_fires_at_most_once() {
        let (abort_tx, mut abort_rx) = oneshot::channel();
        let mut slot = GenerationSlot {
            phase: GenerationPhase::Streaming {
                message: MessageId::from("srv-1"),
            },
            abort: Some(abort_tx),
        };

        assert!(slot.fire_abort());
        assert!(!slot.fire_abort());
        assert!(abort_rx.try_recv().is_ok());

        slot.release();
        assert_eq!(slot.phase, GenerationPhase::Idle);
    }
}
