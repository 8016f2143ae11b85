//! Help listing composed from every registered handler.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::handler::{Handler, HandlerError, HelpInfo, WILDCARD_TOPIC};
use crate::message::MessageEvent;
use crate::registry::HandlerRegistry;

/// Replies with an overview of all commands, or details for one of them
/// when invoked with an argument. Also the default command when a bare
/// trigger arrives.
pub struct HelpHandler {
    registry: Arc<HandlerRegistry>,
}

impl HelpHandler {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    fn overview(&self) -> String {
        // Group by category; uncategorized handlers go last.
        let mut categories: BTreeMap<String, Vec<HelpInfo>> = BTreeMap::new();
        for handler in self.registry.all() {
            if handler.topics().iter().any(|t| t == WILDCARD_TOPIC) {
                // Wildcard subscribers have no command to list.
                continue;
            }
            let mut help = handler.help();
            if help.name.is_empty() {
                help.name = handler.name().to_string();
            }
            let category = if help.category.is_empty() {
                "other".to_string()
            } else {
                help.category.clone()
            };
            categories.entry(category).or_default().push(help);
        }

        let mut out = String::from("Available commands:\n");
        for (category, mut entries) in categories {
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            out.push_str(&format!("\n[{category}]\n"));
            for help in entries {
                if help.description.is_empty() {
                    out.push_str(&format!("  {}\n", help.name));
                } else {
                    out.push_str(&format!("  {} - {}\n", help.name, help.description));
                }
            }
        }
        out.push_str("\nUse 'help <command>' for details.");
        out
    }

    fn details(&self, name: &str) -> String {
        let Some(handler) = self.registry.get(name) else {
            return format!("No such command: {name}");
        };
        let help = handler.help();
        let mut out = help.name.clone();
        if !help.description.is_empty() {
            out.push_str(&format!(" - {}", help.description));
        }
        if !help.usage.is_empty() {
            out.push_str(&format!("\nusage: {}", help.usage));
        }
        if !help.examples.is_empty() {
            out.push_str("\nexamples:");
            for example in &help.examples {
                out.push_str(&format!("\n  {example}"));
            }
        }
        out
    }
}

#[async_trait]
impl Handler for HelpHandler {
    fn name(&self) -> &str {
        "help"
    }

    fn topics(&self) -> Vec<String> {
        vec!["help".to_string()]
    }

    fn help(&self) -> HelpInfo {
        HelpInfo {
            name: "help".to_string(),
            description: "List commands or show details for one".to_string(),
            usage: "help [command]".to_string(),
            examples: vec!["help".to_string(), "help ping".to_string()],
            category: "core".to_string(),
        }
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    async fn handle(
        &self,
        _event: &MessageEvent,
        args: &str,
    ) -> Result<Option<String>, HandlerError> {
        let args = args.trim();
        let reply = if args.is_empty() {
            self.overview()
        } else {
            self.details(args.split_whitespace().next().unwrap_or(args))
        };
        Ok(Some(reply))
    }
}
