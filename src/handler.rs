//! The unit of message processing.
//!
//! Built-in handlers and WASM plugins both implement [`Handler`]; the
//! registry and dispatcher only ever see the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::MessageEvent;

/// The topic that subscribes a handler to every non-command message.
pub const WILDCARD_TOPIC: &str = "*";

/// Help metadata for one handler, shown by the built-in `help` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelpInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug)]
pub enum HandlerError {
    /// The handler ran and reported a failure.
    Failed(String),
    /// The handler does not implement the invoked capability.
    Unsupported(String),
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerError::Failed(msg) => write!(f, "handler failed: {msg}"),
            HandlerError::Unsupported(msg) => write!(f, "unsupported: {msg}"),
        }
    }
}

impl std::error::Error for HandlerError {}

/// Optional out-of-band CLI entry point a handler may expose.
#[async_trait]
pub trait CliCapable: Send + Sync {
    /// Run with an argv-style argument list, returning printable output.
    async fn handle_cli(&self, args: &[String]) -> Result<String, HandlerError>;
}

/// A named unit that receives dispatched messages.
///
/// `handle` gets the full message event plus the pre-sliced argument text:
/// for a command dispatch this is everything after the command name, for a
/// wildcard dispatch the full body. A non-empty reply is sent back to the
/// originating chat by the dispatcher.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Stable name, unique within the registry.
    fn name(&self) -> &str;

    /// Topics this handler subscribes to. Empty means it receives nothing.
    fn topics(&self) -> Vec<String>;

    fn help(&self) -> HelpInfo;

    fn version(&self) -> String;

    async fn handle(
        &self,
        event: &MessageEvent,
        args: &str,
    ) -> Result<Option<String>, HandlerError>;

    /// The CLI capability, when this handler has one.
    fn cli(&self) -> Option<&dyn CliCapable> {
        None
    }

    /// Whether this handler subscribes to the wildcard topic.
    fn is_wildcard(&self) -> bool {
        self.topics().iter().any(|t| t == WILDCARD_TOPIC)
    }
}
