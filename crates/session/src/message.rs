use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// Macro keeps all ID wrappers structurally identical. Server-assigned IDs are
// opaque strings, so no parse validation is applied on ingest.
macro_rules! define_opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

define_opaque_id!(MessageId);
define_opaque_id!(ChatId);
define_opaque_id!(SessionId);

impl MessageId {
    /// Mints a client-side ID for optimistic entries awaiting server confirmation.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl SessionId {
    /// Mints the opaque per-browser session identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Chat speaker role. Anything the server sends that is not `user` renders
/// and tracks as an assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(if raw == "user" {
            Self::User
        } else {
            Self::Assistant
        })
    }
}

/// Chat metadata carried by the initial snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfo {
    pub id: ChatId,
    #[serde(default)]
    pub has_loaded_initial_messages: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

/// The atomic unit of conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_by_user: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_by_agent: Option<bool>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub seen_by_user_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_typing: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_preview: bool,
}

impl Message {
    /// Optimistic user message created at submit time. The sender has read
    /// their own message by definition.
    pub fn user(chat_id: Option<ChatId>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::generate(),
            chat_id,
            role: Role::User,
            content: content.into(),
            created_at: Some(now),
            updated_at: Some(now),
            streaming: false,
            loading: false,
            error: None,
            seen_by_user: Some(true),
            seen_by_agent: Some(false),
            seen_by_user_at: Some(now),
            is_typing: false,
            is_preview: false,
        }
    }

    /// Assistant placeholder appended while a generation is awaiting its
    /// first byte.
    pub fn assistant_placeholder(chat_id: Option<ChatId>) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::generate(),
            chat_id,
            role: Role::Assistant,
            content: String::new(),
            created_at: Some(now),
            updated_at: Some(now),
            streaming: true,
            loading: true,
            error: None,
            seen_by_user: None,
            seen_by_agent: Some(true),
            seen_by_user_at: None,
            is_typing: false,
            is_preview: false,
        }
    }

    /// Ephemeral pseudo-message standing in for a live agent's typing state.
    /// Never persisted; removed or replaced at the end of each episode.
    pub fn typing_preview(chat_id: Option<ChatId>) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::new(format!("preview-{}", Uuid::new_v4())),
            chat_id,
            role: Role::Assistant,
            content: String::new(),
            created_at: Some(now),
            updated_at: Some(now),
            streaming: false,
            loading: true,
            error: None,
            seen_by_user: None,
            seen_by_agent: None,
            seen_by_user_at: None,
            is_typing: true,
            is_preview: true,
        }
    }

    /// Assistant message carrying a failed generation. Takes over the ID slot
    /// of whatever partial content preceded it.
    pub fn generation_error(id: MessageId, chat_id: Option<ChatId>, error: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            chat_id,
            role: Role::Assistant,
            content: String::new(),
            created_at: Some(now),
            updated_at: Some(now),
            streaming: false,
            loading: false,
            error: Some(error),
            seen_by_user: None,
            seen_by_agent: None,
            seen_by_user_at: None,
            is_typing: false,
            is_preview: false,
        }
    }

    pub fn is_typing_preview(&self) -> bool {
        self.is_preview && self.is_typing
    }

    /// Sort key for thread ordering. `None` (absent or malformed timestamp)
    /// sorts to the tail.
    pub fn sort_key(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// Timestamps off the wire are advisory ordering hints, not trusted input: a
// malformed value degrades to `None` (tail position) instead of failing the
// whole payload.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match value {
        serde_json::Value::String(text) => DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|parsed| parsed.with_timezone(&Utc)),
        _ => None,
    }))
}
