//! Inbound message model shared by the dispatcher, registry, and plugins.

use serde::{Deserialize, Serialize};

/// Whether a chat is a direct conversation or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    User,
    Group,
}

/// Identifier of the chat a message belongs to.
///
/// The `jid` is the transport-level address; `kind` distinguishes group
/// chats from direct ones so the admission gate can pick the right
/// allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId {
    pub jid: String,
    pub kind: ChatKind,
}

impl ChatId {
    pub fn user(jid: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            kind: ChatKind::User,
        }
    }

    pub fn group(jid: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            kind: ChatKind::Group,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ChatKind::Group
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.jid)
    }
}

/// Identifier of the account that sent a message.
///
/// Transports may append a device suffix to the user part
/// (`"1234:7@host"`); [`SenderId::base`] strips it to recover the account
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderId(pub String);

impl SenderId {
    pub fn new(jid: impl Into<String>) -> Self {
        Self(jid.into())
    }

    pub fn jid(&self) -> &str {
        &self.0
    }

    /// The sender address without any device suffix in the user part.
    pub fn base(&self) -> String {
        match self.0.split_once('@') {
            Some((user, host)) => {
                let user = user.split_once(':').map_or(user, |(u, _)| u);
                format!("{user}@{host}")
            }
            None => self.0.split_once(':').map_or(&*self.0, |(u, _)| u).to_string(),
        }
    }
}

impl std::fmt::Display for SenderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a media attachment, resolvable through the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Transport-level handle used to download the payload.
    pub id: String,
    pub mime_type: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// The body variants a message event can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageBody {
    Text(String),
    ExtendedText(String),
    Location {
        latitude: f64,
        longitude: f64,
        accuracy_meters: Option<u32>,
    },
    Image(MediaRef),
    Document(MediaRef),
    Sticker(MediaRef),
    Video(MediaRef),
}

impl MessageBody {
    /// The textual body, if any. Extended text counts as text.
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageBody::Text(s) | MessageBody::ExtendedText(s) => Some(s),
            _ => None,
        }
    }

    /// The media reference carried by this body, if any.
    pub fn media(&self) -> Option<&MediaRef> {
        match self {
            MessageBody::Image(m)
            | MessageBody::Document(m)
            | MessageBody::Sticker(m)
            | MessageBody::Video(m) => Some(m),
            _ => None,
        }
    }
}

/// One inbound message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Opaque transport-assigned message identifier.
    pub id: String,
    pub chat: ChatId,
    pub sender: SenderId,
    /// Display name the sender advertises. May be empty.
    pub push_name: String,
    /// Seconds since the Unix epoch. Monotonicity is not assumed.
    pub timestamp: u64,
    pub body: MessageBody,
}
