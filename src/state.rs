//! Conversation data owned by the chat view.
//!
//! Nothing here is persisted; the turn list lives for one session.

/// One message in the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// The speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Handle to the assistant turn that is still receiving chunks.
///
/// `turn` indexes the turn list, `block` is the id of its display block.
/// The block id survives a cleared display; the view checks it on every
/// append instead of assuming the block is last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnHandle {
    pub turn: usize,
    pub block: u64,
}
