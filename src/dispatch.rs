//! Routing of inbound messages to handlers.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::allowlist::AllowList;
use crate::handler::Handler;
use crate::message::{MessageBody, MessageEvent};
use crate::registry::HandlerRegistry;
use crate::transport::Transport;

/// Default command trigger prefix.
pub const DEFAULT_TRIGGER: &str = ".sup";

/// Command name used when the trigger arrives with nothing after it.
const DEFAULT_COMMAND: &str = "help";

/// Applies the admission gate, classifies commands, and fans messages out
/// to handlers.
///
/// Every handler invocation runs on its own task; a failing handler is
/// logged and never suppresses its siblings, and nothing here escapes to
/// the transport loop.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    transport: Arc<dyn Transport>,
    allow_list: AllowList,
    trigger: String,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        transport: Arc<dyn Transport>,
        allow_list: AllowList,
        trigger: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            transport,
            allow_list,
            trigger: trigger.into(),
        }
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    /// Route one inbound message.
    pub async fn dispatch(&self, event: MessageEvent) {
        if !self.allow_list.permits(&event.chat) {
            warn!(jid = %event.chat.jid, "Message from non-allow-listed source dropped");
            return;
        }

        let body = match event.body.text() {
            Some(text) => text.to_string(),
            None => {
                if let MessageBody::Location {
                    latitude,
                    longitude,
                    accuracy_meters,
                } = &event.body
                {
                    info!(
                        latitude,
                        longitude,
                        accuracy_meters = ?accuracy_meters,
                        sender = %event.sender,
                        "Location message received"
                    );
                }
                String::new()
            }
        };

        if body.trim_start().starts_with(&self.trigger) {
            self.dispatch_command(&event, body.trim_start()).await;
        }
        // Wildcard subscribers see every message body, commands included.
        self.dispatch_wildcard(&event, &body).await;
    }

    /// Command path: strip the trigger, split out the command name, and
    /// fan out to every handler subscribed to it.
    async fn dispatch_command(&self, event: &MessageEvent, body: &str) {
        let rest = body[self.trigger.len()..].trim();
        let mut tokens = rest.split_whitespace();
        let command = match tokens.next() {
            Some(token) => token.to_string(),
            None => DEFAULT_COMMAND.to_string(),
        };
        let args = tokens.collect::<Vec<_>>().join(" ");

        let handlers = self.registry.handlers_for_message(&command, true);
        if handlers.is_empty() {
            warn!(command = %command, sender = %event.sender, "Unknown command");
            return;
        }
        self.invoke_all(handlers, event, &args, Some(&command)).await;
    }

    /// Wildcard path: fan the full body out to wildcard subscribers.
    async fn dispatch_wildcard(&self, event: &MessageEvent, body: &str) {
        let handlers = self.registry.handlers_for_message("", false);
        if handlers.is_empty() {
            return;
        }
        self.invoke_all(handlers, event, body, None).await;
    }

    /// Run every handler on its own task and wait for all of them.
    async fn invoke_all(
        &self,
        handlers: Vec<Arc<dyn Handler>>,
        event: &MessageEvent,
        args: &str,
        command: Option<&str>,
    ) {
        let mut tasks = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let event = event.clone();
            let args = args.to_string();
            let command = command.map(str::to_string);
            let transport = self.transport.clone();
            tasks.push(tokio::spawn(async move {
                invoke_one(handler, event, args, command, transport).await;
            }));
        }
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Handler task panicked");
            }
        }
    }
}

async fn invoke_one(
    handler: Arc<dyn Handler>,
    event: MessageEvent,
    args: String,
    command: Option<String>,
    transport: Arc<dyn Transport>,
) {
    match handler.handle(&event, &args).await {
        Ok(Some(reply)) if !reply.is_empty() => {
            if let Err(e) = transport.send_text(&event.chat, &reply).await {
                error!(
                    handler = %handler.name(),
                    chat = %event.chat,
                    error = %e,
                    "Failed to send reply"
                );
            }
        }
        Ok(_) => {}
        Err(e) => {
            warn!(
                handler = %handler.name(),
                command = command.as_deref().unwrap_or(""),
                sender = %event.sender,
                error = %e,
                "Handler failed"
            );
        }
    }
}
