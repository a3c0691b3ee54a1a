use std::collections::HashSet;

use crate::message::{Message, Role};

/// Selects the configured intro messages that the user has not read yet, for
/// the pre-open preview bubble.
///
/// A candidate must sit within the leading intro block (index bound), carry
/// non-empty content matching one of the configured intro strings, and not be
/// marked seen. User messages never qualify.
pub fn pending_starter_messages<'a>(
    messages: &'a [Message],
    intro_messages: &[String],
) -> Vec<&'a Message> {
    if intro_messages.is_empty() || messages.is_empty() {
        return Vec::new();
    }

    let starters: HashSet<&str> = intro_messages.iter().map(String::as_str).collect();
    messages
        .iter()
        .enumerate()
        .filter(|(index, message)| {
            message.role != Role::User
                && !message.content.is_empty()
                && starters.contains(message.content.as_str())
                && *index < intro_messages.len()
                && !message.seen_by_user.unwrap_or(false)
        })
        .map(|(_, message)| message)
        .collect()
}
