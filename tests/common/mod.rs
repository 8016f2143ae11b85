//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sup::handler::{Handler, HandlerError, HelpInfo};
use sup::message::{ChatId, MediaRef, MessageBody, MessageEvent, SenderId};
use sup::transport::{Transport, TransportError};

/// Records outbound sends instead of talking to a wire.
pub struct ChannelTransport {
    pub sent_texts: Mutex<Vec<(String, String)>>,
    pub sent_images: Mutex<Vec<(String, usize)>>,
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent_texts: Mutex::new(Vec::new()),
            sent_images: Mutex::new(Vec::new()),
        })
    }

    pub fn texts(&self) -> Vec<(String, String)> {
        self.sent_texts.lock().unwrap().clone()
    }

    pub fn images(&self) -> Vec<(String, usize)> {
        self.sent_images.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_text(&self, chat: &ChatId, text: &str) -> Result<(), TransportError> {
        self.sent_texts
            .lock()
            .unwrap()
            .push((chat.jid.clone(), text.to_string()));
        Ok(())
    }

    async fn send_image(
        &self,
        recipient: &str,
        image: Vec<u8>,
        _caption: Option<&str>,
    ) -> Result<(), TransportError> {
        self.sent_images
            .lock()
            .unwrap()
            .push((recipient.to_string(), image.len()));
        Ok(())
    }

    async fn download(&self, _media: &MediaRef) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Download("no media in tests".to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Handler that records the argument text of every invocation.
pub struct RecordingHandler {
    name: String,
    topics: Vec<String>,
    reply: Option<String>,
    fail: bool,
    pub calls: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn new(name: &str, topics: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            reply: None,
            fail: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn with_reply(name: &str, topics: &[&str], reply: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            reply: Some(reply.to_string()),
            fail: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(name: &str, topics: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            reply: None,
            fail: true,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_args(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn topics(&self) -> Vec<String> {
        self.topics.clone()
    }

    fn help(&self) -> HelpInfo {
        HelpInfo {
            name: self.name.clone(),
            ..HelpInfo::default()
        }
    }

    fn version(&self) -> String {
        "test".to_string()
    }

    async fn handle(
        &self,
        _event: &MessageEvent,
        args: &str,
    ) -> Result<Option<String>, HandlerError> {
        self.calls.lock().unwrap().push(args.to_string());
        if self.fail {
            return Err(HandlerError::Failed("deliberate test failure".to_string()));
        }
        Ok(self.reply.clone())
    }
}

/// A text message from the given user chat.
pub fn text_event(jid: &str, body: &str) -> MessageEvent {
    MessageEvent {
        id: "msg-1".to_string(),
        chat: ChatId::user(jid),
        sender: SenderId::new(jid),
        push_name: "Tester".to_string(),
        timestamp: 1_700_000_000,
        body: MessageBody::Text(body.to_string()),
    }
}
