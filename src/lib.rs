pub mod allowlist;
pub mod bot;
pub mod cli;
pub mod dispatch;
pub mod handler;
pub mod handlers;
pub mod kv;
pub mod message;
pub mod paths;
pub mod plugin;
pub mod registry;
pub mod transport;

pub use allowlist::{AllowList, AllowedEntry};
pub use bot::{Bot, BotConfig, BotError};
pub use dispatch::{DEFAULT_TRIGGER, Dispatcher};
pub use handler::{Handler, HelpInfo, WILDCARD_TOPIC};
pub use kv::Kv;
pub use message::{ChatId, MessageBody, MessageEvent, SenderId};
pub use registry::HandlerRegistry;
pub use transport::Transport;
