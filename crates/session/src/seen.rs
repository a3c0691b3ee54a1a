use crate::message::{Message, Role};

/// True when a message counts toward the unseen badge and may be acknowledged.
///
/// Only settled assistant-side content qualifies: loading placeholders,
/// in-flight streaming messages, errored bubbles, and typing previews are all
/// outside seen-tracking, which keeps the cached counter and a live recount
/// in agreement at every point.
pub fn awaiting_seen(message: &Message) -> bool {
    message.role != Role::User
        && !message.streaming
        && !message.loading
        && !message.is_preview
        && message.error.is_none()
        && !message.seen_by_user.unwrap_or(false)
}

/// Live recount of unseen messages. The cached `pending_count` must always
/// equal this.
pub fn recompute_pending_count(messages: &[Message]) -> usize {
    messages.iter().filter(|message| awaiting_seen(message)).count()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::message::{ChatId, MessageId};

    fn assistant(id: &str) -> Message {
        let mut message = Message::assistant_placeholder(Some(ChatId::from("chat")));
        message.id = MessageId::from(id);
        message.loading = false;
        message.streaming = false;
        message.content = "settled".to_string();
        message
    }

    #[test]
    fn counts_only_settled_unseen_assistant_messages() {
        let seen = {
            let mut message = assistant("seen");
            message.seen_by_user = Some(true);
            message
        };
        let loading = {
            let mut message = assistant("loading");
            message.loading = true;
            message
        };
        let streaming = {
            let mut message = assistant("streaming");
            message.streaming = true;
            message
        };
        let errored = {
            let mut message = assistant("errored");
            message.error = Some("boom".to_string());
            message
        };
        let user = Message::user(None, "mine");
        let preview = Message::typing_preview(None);
        let pending = assistant("pending");

        let thread = vec![seen, loading, streaming, errored, user, preview, pending];
        assert_eq!(recompute_pending_count(&thread), 1);
    }

    #[test]
    fn seen_by_user_false_still_counts() {
        let mut message = assistant("explicit-false");
        message.seen_by_user = Some(false);
        assert!(awaiting_seen(&message));
    }
}
