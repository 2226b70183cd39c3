use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single turn in a conversation: a role, text content, and a timestamp.
///
/// The `id` doubles as the idempotency key for persisted appends: storage
/// backends insert a message at most once per id, so retried writes cannot
/// duplicate history. Messages produced inside a run derive their ids from
/// the run's turn id (`"<turn_id>:user"`, `"<turn_id>:assistant"`), which
/// makes re-execution after a crash or retry safe.
///
/// # Examples
///
/// ```
/// use chatloom::message::Message;
///
/// let msg = Message::user("What are your opening hours?");
/// assert!(msg.has_role(Message::USER));
///
/// let reply = Message::with_id("turn-1:assistant", Message::ASSISTANT, "We open at 9am.");
/// assert_eq!(reply.id, "turn-1:assistant");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id; idempotency key for persistence.
    pub id: String,
    /// Role of the sender (use the constants on [`Message`]).
    pub role: String,
    /// Text content of the message.
    pub content: String,
    /// When the message was recorded.
    pub sent_at: DateTime<Utc>,
}

impl Message {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// Assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System notice message role.
    pub const SYSTEM: &'static str = "system";

    /// Creates a message with a fresh random id and the current time.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), role, content)
    }

    /// Creates a message with an explicit id (deterministic idempotency key).
    #[must_use]
    pub fn with_id(id: impl Into<String>, role: &str, content: &str) -> Self {
        Self {
            id: id.into(),
            role: role.to_string(),
            content: content.to_string(),
            sent_at: Utc::now(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}
