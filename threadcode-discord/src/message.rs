//! Platform-neutral message and channel types.
//!
//! Only the fields the relay actually consumes are carried here.

use serde::{Deserialize, Serialize};

/// An inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message ID (platform-specific)
    pub id: String,
    /// Channel the message was posted in (a thread ID for thread messages)
    pub channel_id: String,
    /// Author identifier
    pub author_id: String,
    /// Whether the author is an automated account
    #[serde(default)]
    pub author_is_bot: bool,
    /// Raw message text
    #[serde(default)]
    pub content: String,
}

impl InboundMessage {
    /// Whether the content contains the literal `<@id>` mention token.
    pub fn mentions(&self, user_id: &str) -> bool {
        self.content.contains(&format!("<@{user_id}>"))
    }
}

/// A thread and, when known, the channel it was opened in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadChannel {
    pub id: String,
    /// Display name, used as the remote session title
    pub name: String,
    #[serde(default)]
    pub parent: Option<ParentChannel>,
}

/// The channel a thread hangs off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentChannel {
    pub id: String,
    pub name: String,
}
