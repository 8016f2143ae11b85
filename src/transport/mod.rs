//! The messaging-transport seam.
//!
//! The actual wire client (pairing, protocol, media up/download) lives
//! outside this crate. The core only consumes this contract: an event
//! stream delivered through a channel, plus the send/download/disconnect
//! operations below. The transport handle is passed down explicitly at
//! construction; nothing in the core reaches for module-global state.

mod stdio;

pub use stdio::{STDIO_JID, StdioTransport};

use async_trait::async_trait;

use crate::message::{ChatId, MediaRef};

#[derive(Debug)]
pub enum TransportError {
    /// Sending a message or media failed.
    Send(String),
    /// Downloading referenced media failed.
    Download(String),
    /// The client is not connected.
    Disconnected,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Send(msg) => write!(f, "transport send error: {msg}"),
            TransportError::Download(msg) => write!(f, "transport download error: {msg}"),
            TransportError::Disconnected => write!(f, "transport is disconnected"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Operations the core needs from a messaging client.
///
/// Implementations must be safe to share across dispatch tasks; the
/// process holds a single instance for its lifetime.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text reply to a chat.
    async fn send_text(&self, chat: &ChatId, text: &str) -> Result<(), TransportError>;

    /// Send image bytes to a recipient address with an optional caption.
    async fn send_image(
        &self,
        recipient: &str,
        image: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<(), TransportError>;

    /// Fetch the payload behind a media reference.
    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, TransportError>;

    /// Tear down the connection. Called once during orchestrator shutdown.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
