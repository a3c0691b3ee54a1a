pub mod channel;
pub mod config;
pub mod delivery;
pub mod error;
pub mod identity;
pub mod session;

pub use channel::{ChannelTransport, InboundEvent, NullChannel, OutboundEvent, TypingState};
pub use config::{DEFAULT_API_BASE_URL, WidgetConfig};
pub use delivery::GenerationPhase;
pub use error::{WidgetError, WidgetResult};
pub use identity::IdentityStore;
pub use session::{BotPrompts, SubmitOutcome, WidgetSession};
