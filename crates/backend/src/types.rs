use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cordial_session::{ChatInfo, Message, MessageId, Role};

/// Initial snapshot returned for a (chatbot, session) pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    #[serde(default)]
    pub chat: Option<ChatInfo>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub unseen_messages_count: usize,
}

/// One `(role, content)` pair of serialized conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn from_messages(messages: &[Message]) -> Vec<Self> {
        messages
            .iter()
            .map(|message| Self {
                role: message.role,
                content: message.content.clone(),
            })
            .collect()
    }
}

/// Body of the streaming generation request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChatRequest {
    pub messages: Vec<HistoryEntry>,
    pub chatting_with_agent: bool,
}

/// Body of the non-streaming persistence call used while a human agent has
/// the chat; carries the full message objects, not just history pairs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentChatRequest {
    pub messages: Vec<Message>,
    pub chatting_with_agent: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenRequest {
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FollowUpsRequest {
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpsResponse {
    #[serde(default)]
    pub follow_ups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitialLoadResponse {
    #[serde(default)]
    pub chat: Option<ChatInfo>,
}

/// One frame of the incremental generation protocol.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFrame {
    pub id: MessageId,
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default)]
    pub text_response: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub streaming: bool,
}

impl StreamFrame {
    /// A frame that ends the generation, successfully or not.
    pub fn is_terminal(&self) -> bool {
        !self.streaming || self.kind == FrameKind::Abort
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameKind {
    TextResponseChunk,
    Abort,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn stream_frame_decodes_protocol_payloads() {
        let frame: StreamFrame = serde_json::from_str(
            r#"{"id":"srv-1","type":"textResponseChunk","textResponse":"Hel","error":null,"streaming":true}"#,
        )
        .unwrap();
        assert_eq!(frame.kind, FrameKind::TextResponseChunk);
        assert_eq!(frame.text_response.as_deref(), Some("Hel"));
        assert!(frame.streaming);
        assert!(!frame.is_terminal());

        let abort: StreamFrame = serde_json::from_str(
            r#"{"id":"srv-1","type":"abort","textResponse":null,"error":"model unavailable","streaming":false}"#,
        )
        .unwrap();
        assert_eq!(abort.kind, FrameKind::Abort);
        assert!(abort.is_terminal());
        assert_eq!(abort.error.as_deref(), Some("model unavailable"));
    }

    #[test]
    fn snapshot_tolerates_missing_fields() {
        let snapshot: ChatSnapshot = serde_json::from_str(r#"{"messages":[]}"#).unwrap();
        assert!(snapshot.chat.is_none());
        assert_eq!(snapshot.unseen_messages_count, 0);
    }

    #[test]
    fn history_entries_project_role_and_content_only() {
        let messages = vec![
            Message::user(None, "hi"),
            {
                let mut reply = Message::assistant_placeholder(None);
                reply.content = "hello".to_string();
                reply
            },
        ];
        let history = HistoryEntry::from_messages(&messages);
        assert_eq!(
            history,
            vec![
                HistoryEntry {
                    role: Role::User,
                    content: "hi".to_string()
                },
                HistoryEntry {
                    role: Role::Assistant,
                    content: "hello".to_string()
                },
            ]
        );
    }
}
