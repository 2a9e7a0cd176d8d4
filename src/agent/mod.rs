//! Conversation layer on top of the tool registry and a provider.

pub mod intent;
pub mod session;

pub use intent::{identify_intent, Intent};
pub use session::{ConversationSession, SessionOutcome, SessionSettings};
