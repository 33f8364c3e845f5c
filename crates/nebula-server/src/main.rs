//! Headless protocol node.
//!
//! With `listen = true` it accepts players on the configured endpoint and
//! relays their chat; otherwise it joins that endpoint as a player and sends
//! stdin lines as chat.

mod message;
mod node;
mod platform;

use std::sync::Arc;

use clap::Parser;
use nebula_config::{CliArgs, Config};

use crate::node::Node;
use crate::platform::PlatformDirs;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let dirs = match PlatformDirs::from_override(args.config.as_deref()) {
        Ok(dirs) => dirs,
        Err(e) => {
            eprintln!("Failed to resolve platform directories: {e}");
            std::process::exit(1);
        }
    };

    let mut config = match Config::load_or_create(&dirs.config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {e}");
            Config::default()
        }
    };
    config.apply_cli_overrides(&args);

    nebula_log::init_logging(Some(&dirs.log_dir), cfg!(debug_assertions), Some(&config));
    tracing::info!("Using config directory {}", dirs.config_dir.display());

    let (node, events) = Node::new(&config);

    let signal_node = Arc::clone(&node);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_node.shutdown();
        }
    });

    if let Err(e) = node.run(events).await {
        tracing::error!("Node stopped with error: {e}");
        std::process::exit(1);
    }
}
