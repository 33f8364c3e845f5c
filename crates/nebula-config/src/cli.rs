//! Command-line argument parsing for the protocol node.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Node command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "nebula-server", about = "Nebula protocol node")]
pub struct CliArgs {
    /// Server address to bind or dial.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Accept connections (true) or open one to the server (false).
    #[arg(long)]
    pub listen: Option<bool>,

    /// Simulation ticks per second.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(listen) = args.listen {
            self.network.listen = listen;
        }
        if let Some(rate) = args.tick_rate {
            self.network.net_tick_rate = rate;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            server: Some("192.168.1.1".to_string()),
            listen: Some(false),
            tick_rate: Some(30),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.server_address, "192.168.1.1");
        assert!(!config.network.listen);
        assert_eq!(config.network.net_tick_rate, 30);
        // Non-overridden fields retain defaults
        assert_eq!(config.network.server_port, 7777);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from(["nebula-server", "--port", "9000", "--listen", "false"]);
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.listen, Some(false));
        assert!(args.config.is_none());
    }
}
