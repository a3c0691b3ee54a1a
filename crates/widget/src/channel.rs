use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cordial_session::{ChatId, Message, MessageId, SessionId};

/// Events this widget pushes to the real-time channel.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// Broadcast of the current thread after a local mutation.
    Messages {
        chat_id: ChatId,
        messages: Vec<Message>,
    },
    /// Broadcast of one finalized message.
    NewMessage { chat_id: ChatId, message: Message },
    /// Presence heartbeat.
    WidgetConnected {
        session_id: SessionId,
        connected: bool,
    },
    /// Request for the current agent-presence state.
    PollingAgent { chat_id: ChatId },
    /// Tells the agent side one of its messages was read.
    SeenAgentMessage {
        chat_id: ChatId,
        message_id: MessageId,
        seen_at: DateTime<Utc>,
    },
    /// Reports the widget user's own typing state.
    UserTyping {
        session_id: SessionId,
        is_typing: bool,
        typing_state: Option<TypingState>,
    },
}

impl OutboundEvent {
    /// Wire-level event name used by channel adapters.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Messages { .. } => "messages",
            Self::NewMessage { .. } => "new message",
            Self::WidgetConnected { .. } => "widgetConnected",
            Self::PollingAgent { .. } => "pollingAgent",
            Self::SeenAgentMessage { .. } => "seenAgentMessage",
            Self::UserTyping { .. } => "userTyping",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingState {
    Typing,
    Typed,
}

/// Events the channel pushes into this widget.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Authoritative full-thread snapshot from another tab or device.
    Messages {
        chat_id: ChatId,
        messages: Vec<Message>,
    },
    /// One message pushed by the agent side or another tab.
    NewMessage { chat_id: ChatId, message: Message },
    /// Live human-agent presence for a chat.
    IsAgent { chat_id: ChatId, is_agent: bool },
    /// A live agent started or stopped typing.
    AgentTyping { chat_id: ChatId, is_typing: bool },
    /// The server is polling whether this widget is still connected.
    PollingWidgetStatus { session_id: SessionId },
}

/// The real-time transport is an external collaborator; this is the only
/// surface the session core needs from it. Implementations are expected to
/// be fire-and-forget and never block.
pub trait ChannelTransport: Send + Sync {
    fn emit(&self, event: OutboundEvent);
}

/// No-op transport for headless and test use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullChannel;

impl ChannelTransport for NullChannel {
    fn emit(&self, _event: OutboundEvent) {}
}
