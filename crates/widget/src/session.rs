use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use snafu::ResultExt;

use cordial_backend::{AgentChatRequest, ApiClient};
use cordial_session::{
    ChatInfo, Message, MessageId, SessionId, SessionState, awaiting_seen, pending_starter_messages,
};

use crate::channel::{ChannelTransport, InboundEvent, OutboundEvent, TypingState};
use crate::config::WidgetConfig;
use crate::delivery::{self, GenerationPhase, GenerationSlot};
use crate::error::{BackendSnafu, WidgetResult};

/// Bot-configured prompt material the host page hands the widget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BotPrompts {
    pub intro_messages: Vec<String>,
    pub starter_questions: Vec<String>,
}

/// What happened to one user submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank input; nothing was sent.
    Ignored,
    /// A live agent has the chat; the message was persisted directly and no
    /// generation ran.
    PostedToAgent,
    /// The generation streamed to completion.
    Completed,
    /// The generation failed and an error bubble took its place.
    Errored,
    /// Teardown aborted the generation mid-flight.
    Cancelled,
}

/// One widget instance's session: the dependency-injected object owning the
/// thread state, the backend client, the channel handle, and the single
/// generation slot. Constructed once per mount and passed by reference;
/// explicit `initialize`/`teardown` replace any implicit global lifecycle.
pub struct WidgetSession {
    pub(crate) embed_id: String,
    pub(crate) session_id: SessionId,
    prompts: BotPrompts,
    pub(crate) api: ApiClient,
    pub(crate) channel: std::sync::Arc<dyn ChannelTransport>,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) generation: Mutex<GenerationSlot>,
}

impl WidgetSession {
    pub fn new(
        config: &WidgetConfig,
        session_id: SessionId,
        prompts: BotPrompts,
        channel: std::sync::Arc<dyn ChannelTransport>,
    ) -> Self {
        Self {
            embed_id: config.embed_id.clone(),
            api: ApiClient::new(config.api_base_url.clone()),
            channel,
            state: Mutex::new(SessionState::new(session_id.clone())),
            generation: Mutex::new(GenerationSlot::default()),
            session_id,
            prompts,
        }
    }

    /// Fetch-on-mount: seeds the thread from the snapshot and announces
    /// presence. A failed fetch degrades to an empty thread; it never
    /// propagates.
    pub async fn initialize(&self) -> WidgetResult<()> {
        if let Err(error) = self.fetch_and_seed().await {
            tracing::warn!(error = %error, "initial snapshot fetch failed; starting empty");
            lock(&self.state).seed_snapshot(None, Vec::new(), 0);
        }

        self.channel.emit(OutboundEvent::WidgetConnected {
            session_id: self.session_id.clone(),
            connected: true,
        });
        if let Some(chat_id) = self.chat_id() {
            self.channel.emit(OutboundEvent::PollingAgent { chat_id });
        }
        Ok(())
    }

    async fn fetch_and_seed(&self) -> WidgetResult<()> {
        let snapshot = self
            .api
            .fetch_snapshot(&self.embed_id, &self.session_id)
            .await
            .context(BackendSnafu {
                stage: "fetch-snapshot",
            })?;

        let mut state = lock(&self.state);
        state.seed_snapshot(
            snapshot.chat,
            snapshot.messages,
            snapshot.unseen_messages_count,
        );
        // While the thread is still the intro block, the configured starter
        // questions stand in for generated follow-ups.
        if state.messages().len() <= self.prompts.intro_messages.len() {
            state.set_follow_ups(self.prompts.starter_questions.clone());
        }
        Ok(())
    }

    /// Fired when the chat window opens: asks the backend to materialize the
    /// bot's intro messages the first time around. Failure is non-fatal.
    pub async fn notify_opened(&self) -> WidgetResult<()> {
        let trigger = {
            let state = lock(&self.state);
            match state.chat() {
                Some(chat)
                    if !chat.has_loaded_initial_messages
                        && state.messages().len() <= self.prompts.intro_messages.len() =>
                {
                    Some(chat.id.clone())
                }
                _ => None,
            }
        };
        let Some(chat_id) = trigger else {
            return Ok(());
        };

        match self.api.initial_load(&chat_id, &self.embed_id).await {
            Ok(Some(chat)) => lock(&self.state).set_chat(chat),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(chat_id = %chat_id, error = %error, "initial load failed");
            }
        }
        Ok(())
    }

    /// Submits one user message.
    ///
    /// With a live agent attached the message is persisted directly and no
    /// generation runs; otherwise the streaming delivery path takes over.
    /// Submissions while a generation is in flight are rejected.
    pub async fn submit(&self, text: impl Into<String>) -> WidgetResult<SubmitOutcome> {
        let text = text.into();
        if text.trim().is_empty() {
            return Ok(SubmitOutcome::Ignored);
        }

        if lock(&self.state).agent_present() {
            return self.submit_to_agent(text).await;
        }
        delivery::run_generation(self, text).await
    }

    async fn submit_to_agent(&self, text: String) -> WidgetResult<SubmitOutcome> {
        let (user_message, thread) = {
            let mut state = lock(&self.state);
            let chat_id = state.chat().map(|chat| chat.id.clone());
            let user_message = Message::user(chat_id, text);
            state.submit_user_message(user_message.clone());
            (user_message, state.messages().to_vec())
        };

        self.broadcast_new_message(&user_message);
        self.api
            .post_agent_message(
                &self.embed_id,
                &self.session_id,
                &AgentChatRequest {
                    messages: thread,
                    chatting_with_agent: true,
                },
            )
            .await
            .context(BackendSnafu {
                stage: "post-agent-message",
            })?;

        self.broadcast_thread();
        Ok(SubmitOutcome::PostedToAgent)
    }

    /// Acknowledges one rendered message as seen.
    ///
    /// Returns `Ok(false)` without touching state when the message is
    /// ineligible or the acknowledgment call fails; the next visibility
    /// trigger simply retries.
    pub async fn mark_seen(&self, message_id: &MessageId) -> WidgetResult<bool> {
        let chat_id = {
            let state = lock(&self.state);
            match state.message(message_id) {
                Some(message) if awaiting_seen(message) => message.chat_id.clone(),
                _ => return Ok(false),
            }
        };

        let seen_at = Utc::now();
        if let Err(error) = self.api.acknowledge_seen(message_id, seen_at).await {
            tracing::warn!(message_id = %message_id, error = %error, "seen acknowledgment failed");
            return Ok(false);
        }

        lock(&self.state).mark_seen_confirmed(message_id, seen_at);
        if let Some(chat_id) = chat_id.or_else(|| self.chat_id()) {
            self.channel.emit(OutboundEvent::SeenAgentMessage {
                chat_id,
                message_id: message_id.clone(),
                seen_at,
            });
        }
        Ok(true)
    }

    /// Clears server-side history and reseeds from a fresh snapshot.
    /// `false` leaves the existing thread untouched.
    pub async fn reset(&self) -> bool {
        if let Err(error) = self.api.clear_history(&self.embed_id, &self.session_id).await {
            tracing::warn!(error = %error, "session reset failed");
            return false;
        }
        if let Err(error) = self.fetch_and_seed().await {
            tracing::warn!(error = %error, "refetch after reset failed");
            return false;
        }
        true
    }

    /// Applies one inbound channel event. Everything is chat-id or
    /// session-id guarded; events for other chats are dropped.
    pub fn handle_channel_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::Messages { chat_id, messages } => {
                if self.is_current_chat(&chat_id) {
                    lock(&self.state).replace_thread(messages);
                }
            }
            InboundEvent::NewMessage { chat_id, message } => {
                if self.is_current_chat(&chat_id) {
                    lock(&self.state).ingest_message(message);
                }
            }
            InboundEvent::IsAgent { chat_id, is_agent } => {
                if self.is_current_chat(&chat_id) {
                    lock(&self.state).set_agent_present(is_agent);
                }
            }
            InboundEvent::AgentTyping { chat_id, is_typing } => {
                if self.is_current_chat(&chat_id) {
                    lock(&self.state).apply_agent_typing(is_typing);
                }
            }
            InboundEvent::PollingWidgetStatus { session_id } => {
                if session_id == self.session_id {
                    self.channel.emit(OutboundEvent::WidgetConnected {
                        session_id,
                        connected: true,
                    });
                }
            }
        }
    }

    /// Reports the widget user's typing state over the channel.
    pub fn notify_user_typing(&self, is_typing: bool, typing_state: Option<TypingState>) {
        self.channel.emit(OutboundEvent::UserTyping {
            session_id: self.session_id.clone(),
            is_typing,
            typing_state,
        });
    }

    /// Tears the session down: aborts any in-flight generation and retracts
    /// presence. Idempotent.
    pub fn teardown(&self) {
        lock(&self.generation).fire_abort();
        self.channel.emit(OutboundEvent::WidgetConnected {
            session_id: self.session_id.clone(),
            connected: false,
        });
    }

    pub(crate) fn broadcast_thread(&self) {
        if let Some(chat_id) = self.chat_id() {
            let messages = lock(&self.state).messages().to_vec();
            self.channel.emit(OutboundEvent::Messages { chat_id, messages });
        }
    }

    pub(crate) fn broadcast_new_message(&self, message: &Message) {
        if let Some(chat_id) = message.chat_id.clone().or_else(|| self.chat_id()) {
            self.channel.emit(OutboundEvent::NewMessage {
                chat_id,
                message: message.clone(),
            });
        }
    }

    fn is_current_chat(&self, chat_id: &cordial_session::ChatId) -> bool {
        lock(&self.state)
            .chat()
            .is_some_and(|chat| &chat.id == chat_id)
    }

    // Snapshot accessors; each takes the state lock briefly and clones out.

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn chat(&self) -> Option<ChatInfo> {
        lock(&self.state).chat().cloned()
    }

    pub fn chat_id(&self) -> Option<cordial_session::ChatId> {
        lock(&self.state).chat().map(|chat| chat.id.clone())
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.state).messages().to_vec()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending_count()
    }

    pub fn follow_ups(&self) -> Vec<String> {
        lock(&self.state).follow_ups().to_vec()
    }

    pub fn loading(&self) -> bool {
        lock(&self.state).loading()
    }

    pub fn agent_present(&self) -> bool {
        lock(&self.state).agent_present()
    }

    pub fn generation_phase(&self) -> GenerationPhase {
        lock(&self.generation).phase.clone()
    }

    /// The prompt-input disabled contract: no submissions while the snapshot
    /// is loading or a generation is in flight.
    pub fn input_disabled(&self) -> bool {
        self.loading() || self.generation_phase().is_active()
    }

    /// Unseen intro messages for the pre-open preview bubble.
    pub fn pending_starters(&self) -> Vec<Message> {
        let state = lock(&self.state);
        pending_starter_messages(state.messages(), &self.prompts.intro_messages)
            .into_iter()
            .cloned()
            .collect()
    }
}

// Mutex poisoning only happens after a panic in another holder; recover the
// guard rather than cascading the panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
