//! Console loop-back transport.
//!
//! Reads lines from stdin as messages from a single synthetic user and
//! prints outbound sends to stdout. Useful for exercising the dispatch
//! pipeline and plugins locally without a paired messaging client.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Transport, TransportError};
use crate::message::{ChatId, MediaRef, MessageBody, MessageEvent, SenderId};

/// Chat and sender address used for messages typed on stdin.
pub const STDIO_JID: &str = "console@local";

pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }

    /// Spawn the stdin reader task and return the event stream.
    ///
    /// The task exits when stdin reaches EOF or the token is cancelled.
    pub fn spawn_reader(&self, shutdown: CancellationToken) -> mpsc::Receiver<MessageEvent> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut seq = 0u64;
            loop {
                let line = tokio::select! {
                    line = lines.next_line() => line,
                    _ = shutdown.cancelled() => break,
                };
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read stdin");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                seq += 1;
                let event = MessageEvent {
                    id: format!("stdio-{seq}"),
                    chat: ChatId::user(STDIO_JID),
                    sender: SenderId::new(STDIO_JID),
                    push_name: "console".to_string(),
                    timestamp: SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs(),
                    body: MessageBody::Text(line),
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_text(&self, chat: &ChatId, text: &str) -> Result<(), TransportError> {
        println!("[{chat}] {text}");
        Ok(())
    }

    async fn send_image(
        &self,
        recipient: &str,
        image: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        println!(
            "[{recipient}] <image {} bytes>{}",
            image.len(),
            caption.map(|c| format!(" {c}")).unwrap_or_default()
        );
        Ok(())
    }

    async fn download(&self, _media: &MediaRef) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Download(
            "stdio transport carries no media".to_string(),
        ))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
