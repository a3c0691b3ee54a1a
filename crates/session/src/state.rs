use chrono::{DateTime, Utc};

use crate::message::{ChatInfo, Message, MessageId, SessionId};
use crate::seen::{awaiting_seen, recompute_pending_count};
use crate::thread::Thread;

/// Per-widget-instance session state: the thread plus its derived quantities.
///
/// Every thread mutation flows through the methods here so the cached
/// pending count stays in agreement with a live recount. No I/O happens at
/// this layer.
#[derive(Debug)]
pub struct SessionState {
    session_id: SessionId,
    chat: Option<ChatInfo>,
    thread: Thread,
    pending_count: usize,
    follow_ups: Vec<String>,
    loading: bool,
    agent_present: bool,
}

impl SessionState {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            chat: None,
            thread: Thread::new(),
            pending_count: 0,
            follow_ups: Vec::new(),
            loading: true,
            agent_present: false,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn chat(&self) -> Option<&ChatInfo> {
        self.chat.as_ref()
    }

    pub fn set_chat(&mut self, chat: ChatInfo) {
        self.chat = Some(chat);
    }

    pub fn messages(&self) -> &[Message] {
        self.thread.messages()
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.thread.get(id)
    }

    pub fn thread_revision(&self) -> u64 {
        self.thread.revision()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    pub fn follow_ups(&self) -> &[String] {
        &self.follow_ups
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn agent_present(&self) -> bool {
        self.agent_present
    }

    pub fn set_agent_present(&mut self, present: bool) {
        self.agent_present = present;
    }

    pub fn set_follow_ups(&mut self, follow_ups: Vec<String>) {
        self.follow_ups = follow_ups;
    }

    pub fn clear_follow_ups(&mut self) {
        self.follow_ups.clear();
    }

    /// Seeds the thread from the initial snapshot (or a post-reset refetch).
    ///
    /// Snapshot entries are settled by definition, so in-flight markers are
    /// normalized away before seeding. The pending count is recomputed
    /// locally; the server's figure is advisory.
    pub fn seed_snapshot(
        &mut self,
        chat: Option<ChatInfo>,
        messages: Vec<Message>,
        server_unseen_count: usize,
    ) {
        let normalized = messages
            .into_iter()
            .map(|mut message| {
                message.streaming = false;
                message.loading = false;
                message.error = None;
                message
            })
            .collect();
        self.thread.seed(normalized);
        self.chat = chat;
        self.pending_count = recompute_pending_count(self.thread.messages());
        if self.pending_count != server_unseen_count {
            tracing::debug!(
                local = self.pending_count,
                server = server_unseen_count,
                "unseen count from snapshot disagrees with local recount"
            );
        }
        self.loading = false;
    }

    /// Full-thread resync pushed over the channel by another tab or device.
    pub fn replace_thread(&mut self, messages: Vec<Message>) {
        self.thread.replace_all(messages);
        self.pending_count = recompute_pending_count(self.thread.messages());
    }

    /// Single message pushed over the channel (agent takeover, cross-tab
    /// echo). Typing previews are stripped first so a real message never
    /// coexists with its placeholder, and stale follow-ups are dropped.
    pub fn ingest_message(&mut self, message: Message) {
        self.thread.remove_ephemeral(Message::is_typing_preview);
        self.thread.upsert(message);
        self.follow_ups.clear();
        self.pending_count = recompute_pending_count(self.thread.messages());
    }

    /// Applies one live-agent typing episode signal.
    ///
    /// At most one preview pseudo-message exists, always at the tail:
    /// appended when typing starts, removed when it stops, untouched while
    /// the state is unchanged.
    pub fn apply_agent_typing(&mut self, is_typing: bool) {
        let tail_is_preview = self
            .thread
            .messages()
            .last()
            .is_some_and(Message::is_typing_preview);

        match (tail_is_preview, is_typing) {
            (true, false) => {
                self.thread.remove_ephemeral(Message::is_typing_preview);
            }
            (false, true) => {
                self.thread
                    .upsert(Message::typing_preview(self.chat.as_ref().map(|chat| chat.id.clone())));
            }
            _ => {}
        }
    }

    /// Appends the optimistic user message at submit time. Follow-ups are
    /// cleared immediately, whatever becomes of the generation.
    pub fn submit_user_message(&mut self, message: Message) {
        self.follow_ups.clear();
        self.thread.remove_ephemeral(Message::is_typing_preview);
        self.thread.upsert(message);
        self.pending_count = recompute_pending_count(self.thread.messages());
    }

    /// Appends the loading placeholder a generation will stream into.
    pub fn append_placeholder(&mut self, placeholder: Message) {
        self.thread.upsert(placeholder);
        self.pending_count = recompute_pending_count(self.thread.messages());
    }

    /// Applies one streaming update (delta append, terminal flip, or error
    /// takeover) keyed by server ID.
    pub fn apply_generation_update(&mut self, message: Message) {
        self.thread.upsert(message);
        self.pending_count = recompute_pending_count(self.thread.messages());
    }

    /// Atomically rebinds the optimistic placeholder to the server-assigned
    /// ID carried by the first stream frame.
    pub fn rebind_placeholder(&mut self, placeholder_id: &MessageId, message: Message) {
        self.thread.remove(placeholder_id);
        self.thread.upsert(message);
        self.pending_count = recompute_pending_count(self.thread.messages());
    }

    /// Records a server-confirmed seen acknowledgment: flips the flag and
    /// decrements the cached badge count, floored at zero. A message that is
    /// no longer eligible (already seen, errored, in flight) is a no-op, so
    /// repeat confirmations never double-decrement.
    pub fn mark_seen_confirmed(&mut self, id: &MessageId, seen_at: DateTime<Utc>) -> bool {
        let eligible = self.thread.get(id).is_some_and(awaiting_seen);
        if !eligible {
            return false;
        }
        self.thread.mark_seen(id, seen_at);
        self.pending_count = self.pending_count.saturating_sub(1);
        true
    }

    /// Live recount over the thread; must always agree with `pending_count`.
    pub fn recompute_pending_count(&self) -> usize {
        recompute_pending_count(self.thread.messages())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::message::{ChatId, Role};

    fn state() -> SessionState {
        let mut state = SessionState::new(SessionId::from("session-1"));
        state.set_chat(ChatInfo {
            id: ChatId::from("chat-1"),
            has_loaded_initial_messages: true,
            elapsed_ms: None,
        });
        state
    }

    fn settled_assistant(id: &str, content: &str) -> Message {
        let mut message = Message::assistant_placeholder(Some(ChatId::from("chat-1")));
        message.id = MessageId::from(id);
        message.loading = false;
        message.streaming = false;
        message.content = content.to_string();
        message
    }

    #[test]
    fn seed_normalizes_in_flight_markers_and_recounts() {
        let mut state = state();
        let mut stale = settled_assistant("a", "hello");
        stale.streaming = true;
        stale.loading = true;
        stale.error = Some("left-over".to_string());

        state.seed_snapshot(None, vec![stale, Message::user(None, "hi")], 7);

        assert!(!state.loading());
        let seeded = state.message(&MessageId::from("a")).unwrap();
        assert!(!seeded.streaming);
        assert!(!seeded.loading);
        assert_eq!(seeded.error, None);
        // Local recount wins over the advisory server figure.
        assert_eq!(state.pending_count(), 1);
        assert_eq!(state.pending_count(), state.recompute_pending_count());
    }

    #[test]
    fn pending_count_agrees_with_recount_after_every_mutation() {
        let mut state = state();
        state.seed_snapshot(None, vec![settled_assistant("a", "one")], 1);

        state.submit_user_message(Message::user(None, "hi"));
        assert_eq!(state.pending_count(), state.recompute_pending_count());

        state.append_placeholder(Message::assistant_placeholder(None));
        assert_eq!(state.pending_count(), state.recompute_pending_count());

        state.ingest_message(settled_assistant("b", "two"));
        assert_eq!(state.pending_count(), state.recompute_pending_count());

        state.replace_thread(vec![settled_assistant("a", "one")]);
        assert_eq!(state.pending_count(), state.recompute_pending_count());

        state.mark_seen_confirmed(&MessageId::from("a"), Utc::now());
        assert_eq!(state.pending_count(), state.recompute_pending_count());
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn repeated_seen_confirmations_decrement_only_once() {
        let mut state = state();
        state.seed_snapshot(
            None,
            vec![settled_assistant("a", "one"), settled_assistant("b", "two")],
            2,
        );

        assert!(state.mark_seen_confirmed(&MessageId::from("a"), Utc::now()));
        assert!(!state.mark_seen_confirmed(&MessageId::from("a"), Utc::now()));
        assert_eq!(state.pending_count(), 1);
        assert_eq!(state.pending_count(), state.recompute_pending_count());
    }

    #[test]
    fn mark_seen_on_missing_message_leaves_count_alone() {
        let mut state = state();
        state.seed_snapshot(None, vec![settled_assistant("a", "one")], 1);
        assert!(!state.mark_seen_confirmed(&MessageId::from("ghost"), Utc::now()));
        assert_eq!(state.pending_count(), 1);
    }

    #[test]
    fn typing_episode_appends_then_removes_a_single_preview() {
        let mut state = state();
        state.seed_snapshot(None, vec![settled_assistant("a", "one")], 1);

        state.apply_agent_typing(true);
        assert!(state.messages().last().unwrap().is_typing_preview());
        let with_preview = state.messages().len();

        // Repeated typing signals are a no-op.
        state.apply_agent_typing(true);
        assert_eq!(state.messages().len(), with_preview);

        state.apply_agent_typing(false);
        assert!(!state.messages().iter().any(Message::is_typing_preview));

        // Stop without a preview is also a no-op.
        state.apply_agent_typing(false);
        assert_eq!(state.messages().len(), with_preview - 1);
    }

    #[test]
    fn ingest_message_displaces_typing_preview_and_stale_follow_ups() {
        let mut state = state();
        state.seed_snapshot(None, vec![], 0);
        state.set_follow_ups(vec!["Anything else?".to_string()]);
        state.apply_agent_typing(true);

        state.ingest_message(settled_assistant("agent-1", "Hello from a human"));

        assert!(!state.messages().iter().any(Message::is_typing_preview));
        assert!(state.follow_ups().is_empty());
        assert_eq!(state.pending_count(), 1);
        assert_eq!(
            state.message(&MessageId::from("agent-1")).unwrap().role,
            Role::Assistant
        );
    }

    #[test]
    fn submit_clears_follow_ups_before_the_generation_settles() {
        let mut state = state();
        state.seed_snapshot(None, vec![], 0);
        state.set_follow_ups(vec!["Tell me more".to_string()]);

        state.submit_user_message(Message::user(None, "hi"));
        assert!(state.follow_ups().is_empty());
        // The user's own message never counts as pending.
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn rebind_swaps_placeholder_for_server_message_without_duplicates() {
        let mut state = state();
        state.seed_snapshot(None, vec![], 0);
        let placeholder = Message::assistant_placeholder(None);
        let placeholder_id = placeholder.id.clone();
        state.append_placeholder(placeholder);

        let mut server_message = settled_assistant("server-1", "Hel");
        server_message.streaming = true;
        state.rebind_placeholder(&placeholder_id, server_message);

        assert_eq!(state.messages().len(), 1);
        assert!(state.message(&placeholder_id).is_none());
        assert!(state.message(&MessageId::from("server-1")).is_some());
    }
}
