pub mod message;
pub mod seen;
pub mod starters;
pub mod state;
pub mod thread;

pub use message::{ChatId, ChatInfo, Message, MessageId, Role, SessionId};
pub use seen::{awaiting_seen, recompute_pending_count};
pub use starters::pending_starter_messages;
pub use state::SessionState;
pub use thread::Thread;
