use chrono::{DateTime, Utc};

use crate::message::{Message, MessageId};

/// The single source of truth for one conversation: an ordered,
/// ID-deduplicated sequence of messages.
///
/// Ordering is ascending `created_at` with insertion-order tie-break; entries
/// without a usable timestamp live at the tail. Three independent writers
/// (snapshot seeding, stream deltas, channel pushes) all funnel through the
/// merge operations here; nothing may splice the entry list directly.
#[derive(Debug, Clone, Default)]
pub struct Thread {
    entries: Vec<Message>,
    revision: u64,
}

impl Thread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Monotonic change counter. Every mutation bumps it, so callers can
    /// treat each merge as having produced a replacement thread.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.entries.iter().find(|message| &message.id == id)
    }

    /// Replaces the thread wholesale with an already-sorted snapshot. Used
    /// only straight after the initial fetch or a reset; does not re-sort.
    pub fn seed(&mut self, messages: Vec<Message>) {
        self.entries = messages;
        self.revision += 1;
    }

    /// Merges one message in by ID.
    ///
    /// An existing entry is replaced in place, preserving locally-known state
    /// the incoming copy does not carry: seen flags only adopt the incoming
    /// value when the local one is unset, and the local `created_at` keeps
    /// its position stable. This guards against a stale channel echo
    /// reverting a just-applied local seen update.
    ///
    /// A new entry is inserted by scanning from the tail backward for the
    /// first message that does not sort after it. New messages overwhelmingly
    /// append at the end, so the scan is O(1) in practice and bounded by one
    /// conversation's length in the worst case.
    pub fn upsert(&mut self, incoming: Message) {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|message| message.id == incoming.id)
        {
            let mut merged = incoming;
            merged.seen_by_user = existing.seen_by_user.or(merged.seen_by_user);
            merged.seen_by_agent = existing.seen_by_agent.or(merged.seen_by_agent);
            merged.seen_by_user_at = existing.seen_by_user_at.or(merged.seen_by_user_at);
            merged.created_at = existing.created_at.or(merged.created_at);
            *existing = merged;
        } else {
            let position = self.insertion_index(incoming.sort_key());
            self.entries.insert(position, incoming);
        }
        self.revision += 1;
    }

    /// Full resync from an authoritative channel snapshot.
    ///
    /// Overwrites every entry, tagging each `streaming = false` (snapshots
    /// never carry in-flight state), while carrying over locally-set seen
    /// fields by ID so a stale snapshot cannot revert them.
    pub fn replace_all(&mut self, incoming: Vec<Message>) {
        let prior = std::mem::take(&mut self.entries);
        self.entries = incoming
            .into_iter()
            .map(|mut message| {
                message.streaming = false;
                if let Some(local) = prior.iter().find(|entry| entry.id == message.id) {
                    message.seen_by_user = local.seen_by_user.or(message.seen_by_user);
                    message.seen_by_agent = local.seen_by_agent.or(message.seen_by_agent);
                    message.seen_by_user_at = local.seen_by_user_at.or(message.seen_by_user_at);
                }
                message
            })
            .collect();
        self.revision += 1;
    }

    /// Strips transient entries (typing previews) matching the predicate.
    /// Must run before any upsert that could collide with one. Returns the
    /// number of entries removed.
    pub fn remove_ephemeral(&mut self, predicate: impl Fn(&Message) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|message| !predicate(message));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.revision += 1;
        }
        removed
    }

    /// Removes one entry by ID. This is the first half of the atomic replace
    /// step that rebinds an optimistic placeholder to its server-assigned ID.
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let position = self.entries.iter().position(|message| &message.id == id)?;
        self.revision += 1;
        Some(self.entries.remove(position))
    }

    /// Flips the seen flag on one entry. Callers confirm the server
    /// acknowledgment before invoking this.
    pub fn mark_seen(&mut self, id: &MessageId, seen_at: DateTime<Utc>) -> bool {
        let Some(message) = self
            .entries
            .iter_mut()
            .find(|message| &message.id == id)
        else {
            return false;
        };
        message.seen_by_user = Some(true);
        message.seen_by_user_at = Some(seen_at);
        self.revision += 1;
        true
    }

    fn insertion_index(&self, incoming_key: Option<DateTime<Utc>>) -> usize {
        for index in (0..self.entries.len()).rev() {
            if sorts_at_or_before(self.entries[index].sort_key(), incoming_key) {
                return index + 1;
            }
        }
        0
    }
}

// Tail semantics for missing timestamps: an incoming keyless message always
// lands at the end, while keyless entries already at the tail never pull a
// timestamped insertion past them.
fn sorts_at_or_before(existing: Option<DateTime<Utc>>, incoming: Option<DateTime<Utc>>) -> bool {
    match (existing, incoming) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(existing), Some(incoming)) => existing <= incoming,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::message::Role;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
    }

    fn message(id: &str, minute: u32) -> Message {
        let mut message = Message::user(None, format!("body-{id}"));
        message.id = MessageId::from(id);
        message.role = Role::Assistant;
        message.created_at = Some(at(minute));
        message.seen_by_user = None;
        message.seen_by_user_at = None;
        message
    }

    fn ids(thread: &Thread) -> Vec<&str> {
        thread
            .messages()
            .iter()
            .map(|message| message.id.as_str())
            .collect()
    }

    #[test]
    fn upsert_keeps_ascending_order_for_any_arrival_order() {
        let arrivals = [
            vec!["c", "a", "b", "d"],
            vec!["d", "c", "b", "a"],
            vec!["a", "b", "c", "d"],
            vec!["b", "d", "a", "c"],
        ];
        let minutes = [("a", 1), ("b", 2), ("c", 3), ("d", 4)];

        for order in arrivals {
            let mut thread = Thread::new();
            for id in order {
                let minute = minutes.iter().find(|(name, _)| *name == id).unwrap().1;
                thread.upsert(message(id, minute));
            }
            assert_eq!(ids(&thread), vec!["a", "b", "c", "d"]);
        }
    }

    #[test]
    fn equal_timestamps_break_ties_by_insertion_order() {
        let mut thread = Thread::new();
        thread.upsert(message("first", 5));
        thread.upsert(message("second", 5));
        thread.upsert(message("third", 5));
        assert_eq!(ids(&thread), vec!["first", "second", "third"]);
    }

    #[test]
    fn missing_timestamp_inserts_at_tail() {
        let mut thread = Thread::new();
        thread.upsert(message("a", 1));
        let mut keyless = message("keyless", 0);
        keyless.created_at = None;
        thread.upsert(keyless);
        thread.upsert(message("b", 2));

        // The timestamped insert slots before the keyless tail entry.
        assert_eq!(ids(&thread), vec!["a", "b", "keyless"]);
    }

    #[test]
    fn upsert_same_id_replaces_without_duplicating() {
        let mut thread = Thread::new();
        thread.upsert(message("a", 1));
        let mut updated = message("a", 1);
        updated.content = "revised".to_string();
        thread.upsert(updated);

        assert_eq!(thread.len(), 1);
        assert_eq!(thread.get(&MessageId::from("a")).unwrap().content, "revised");
    }

    #[test]
    fn upsert_preserves_locally_set_seen_fields() {
        let mut thread = Thread::new();
        let mut local = message("a", 1);
        local.seen_by_user = Some(true);
        local.seen_by_user_at = Some(at(2));
        thread.upsert(local);

        // A stale echo without seen fields must not clobber them.
        thread.upsert(message("a", 1));

        let merged = thread.get(&MessageId::from("a")).unwrap();
        assert_eq!(merged.seen_by_user, Some(true));
        assert_eq!(merged.seen_by_user_at, Some(at(2)));
    }

    #[test]
    fn upsert_keeps_local_created_at_for_position_stability() {
        let mut thread = Thread::new();
        thread.upsert(message("a", 1));
        thread.upsert(message("b", 2));

        let mut echo = message("a", 9);
        echo.content = "echoed".to_string();
        thread.upsert(echo);

        assert_eq!(ids(&thread), vec!["a", "b"]);
        let merged = thread.get(&MessageId::from("a")).unwrap();
        assert_eq!(merged.created_at, Some(at(1)));
        assert_eq!(merged.content, "echoed");
    }

    #[test]
    fn replace_all_clears_streaming_and_preserves_seen() {
        let mut thread = Thread::new();
        let mut seen = message("x", 1);
        seen.seen_by_user = Some(true);
        thread.upsert(seen);

        let mut snapshot_entry = message("x", 1);
        snapshot_entry.streaming = true;
        snapshot_entry.seen_by_user = None;
        thread.replace_all(vec![snapshot_entry, message("y", 2)]);

        assert_eq!(ids(&thread), vec!["x", "y"]);
        let preserved = thread.get(&MessageId::from("x")).unwrap();
        assert_eq!(preserved.seen_by_user, Some(true));
        assert!(!preserved.streaming);
        assert!(!thread.messages().iter().any(|message| message.streaming));
    }

    #[test]
    fn remove_ephemeral_strips_typing_previews_only() {
        let mut thread = Thread::new();
        thread.upsert(message("a", 1));
        thread.upsert(Message::typing_preview(None));

        let removed = thread.remove_ephemeral(Message::is_typing_preview);
        assert_eq!(removed, 1);
        assert_eq!(ids(&thread), vec!["a"]);
    }

    #[test]
    fn every_mutation_bumps_the_revision() {
        let mut thread = Thread::new();
        let start = thread.revision();
        thread.seed(vec![message("a", 1)]);
        thread.upsert(message("b", 2));
        thread.mark_seen(&MessageId::from("a"), at(3));
        thread.remove(&MessageId::from("b"));
        assert_eq!(thread.revision(), start + 4);
    }
}
