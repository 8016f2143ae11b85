use std::sync::Arc;

use clap::Parser;
use sup::allowlist::AllowedEntry;
use sup::bot::Bot;
use sup::cli::{Args, Command, build_config, init_logging, load_allow_list_file, resolve_data_dir};
use sup::transport::{STDIO_JID, StdioTransport};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(data_dir) = resolve_data_dir(&args) else {
        error!("No data directory available; pass --data-dir");
        std::process::exit(1);
    };

    let allow_file = match load_allow_list_file(&data_dir) {
        Ok(file) => file,
        Err(e) => {
            error!(error = %e, "Failed to load allow-list");
            std::process::exit(1);
        }
    };

    let mut config = build_config(&args, allow_file);
    if matches!(&args.command, None | Some(Command::Run)) {
        // The stdio loop-back user is always admitted on a local run.
        config.allowed_users.push(AllowedEntry::new(STDIO_JID));
    }
    let transport = Arc::new(StdioTransport::new());
    let bot = match Bot::new(config, transport.clone()).await {
        Ok(bot) => bot,
        Err(e) => {
            error!(error = %e, "Failed to initialize bot");
            std::process::exit(1);
        }
    };

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            match bot.init_plugins().await {
                Ok(count) => info!(count, "Plugins loaded"),
                Err(e) => {
                    error!(error = %e, "Failed to initialize plugins");
                    std::process::exit(1);
                }
            }
            let events = transport.spawn_reader(bot.cancellation_token());
            if let Err(e) = bot.start(events).await {
                error!(error = %e, "Bot error");
                std::process::exit(1);
            }
            if let Err(e) = bot.shutdown().await {
                error!(error = %e, "Shutdown errors");
                std::process::exit(1);
            }
        }
        Command::Plugin { name, args } => {
            bot.plugin_manager().load_all().await;
            let result = bot.run_plugin_cli(&name, &args).await;
            if let Err(e) = bot.shutdown().await {
                error!(error = %e, "Shutdown errors");
            }
            match result {
                Ok(output) => println!("{output}"),
                Err(e) => {
                    error!(plugin = %name, error = %e, "Plugin CLI failed");
                    std::process::exit(1);
                }
            }
        }
        Command::Plugins => {
            bot.plugin_manager().load_all().await;
            let plugins = bot.plugin_manager().plugins();
            if plugins.is_empty() {
                println!("No plugins loaded");
            }
            for runtime in &plugins {
                let version = runtime
                    .version()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                println!(
                    "{} {} topics={} cli={} [{}]",
                    runtime.name(),
                    version,
                    runtime.topics().join(","),
                    runtime.has_cli(),
                    runtime.lifecycle(),
                );
            }
            if let Err(e) = bot.shutdown().await {
                error!(error = %e, "Shutdown errors");
            }
        }
    }
}
