//! Liveness probe.

use async_trait::async_trait;

use crate::handler::{Handler, HandlerError, HelpInfo};
use crate::message::MessageEvent;

pub struct PingHandler;

impl PingHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for PingHandler {
    fn name(&self) -> &str {
        "ping"
    }

    fn topics(&self) -> Vec<String> {
        vec!["ping".to_string()]
    }

    fn help(&self) -> HelpInfo {
        HelpInfo {
            name: "ping".to_string(),
            description: "Check that the bot is alive".to_string(),
            usage: "ping".to_string(),
            examples: vec!["ping".to_string()],
            category: "core".to_string(),
        }
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    async fn handle(
        &self,
        _event: &MessageEvent,
        _args: &str,
    ) -> Result<Option<String>, HandlerError> {
        Ok(Some("pong".to_string()))
    }
}
