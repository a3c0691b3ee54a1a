pub mod client;
pub mod error;
pub mod stream;
pub mod types;

pub use client::ApiClient;
pub use error::{BackendError, BackendResult};
pub use stream::{GenerationStream, StreamEvent};
pub use types::{
    AgentChatRequest, ChatSnapshot, FollowUpsRequest, FollowUpsResponse, FrameKind, HistoryEntry,
    InitialLoadResponse, SeenRequest, StreamChatRequest, StreamFrame,
};
