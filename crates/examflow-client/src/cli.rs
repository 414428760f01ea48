//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use examflow_core::LogFormat;

use crate::transport::TransportKind;

/// examflow - exam and billing queue client
#[derive(Debug, Parser)]
#[command(name = "examflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "EXAMFLOW_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Log format: compact, pretty or json
    #[arg(long, env = "EXAMFLOW_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Log filter directive (overrides RUST_LOG), e.g. examflow_client=trace
    #[arg(long, global = true)]
    pub log_filter: Option<String>,

    // --- Connection flags ---
    /// Server base URL (the exam-workflow endpoint path is appended)
    #[arg(long, env = "EXAMFLOW_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Staff bearer token (supports env:: and pass:: references)
    #[arg(long, env = "EXAMFLOW_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Transport: sockjs or websocket
    #[arg(long, global = true)]
    pub transport: Option<TransportKind>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Take the next item of a queue and print it
    TakeNext {
        /// Queue (department) id
        #[arg(long, short)]
        queue: String,
    },

    /// Print the current size of a queue
    QueueSize {
        /// Queue (department) id
        #[arg(long, short)]
        queue: String,
    },

    /// Print the item currently held, if any
    InProgress {
        /// Seconds to wait for the redelivery
        #[arg(long, default_value = "5")]
        wait: u64,
    },

    /// Follow queue broadcasts, items and errors until interrupted
    Watch {
        /// Queue ids to follow (can be repeated)
        #[arg(long, short, action = clap::ArgAction::Append)]
        queue: Vec<String>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_take_next() {
        let cli = Cli::try_parse_from([
            "examflow",
            "--base-url",
            "https://clinic.example.com",
            "--transport",
            "websocket",
            "take-next",
            "--queue",
            "cardiology",
        ])
        .unwrap();
        assert_eq!(cli.base_url.as_deref(), Some("https://clinic.example.com"));
        assert_eq!(cli.transport, Some(TransportKind::WebSocket));
        assert!(matches!(cli.command, Command::TakeNext { ref queue } if queue == "cardiology"));
    }

    #[test]
    fn watch_accepts_several_queues() {
        let cli = Cli::try_parse_from(["examflow", "watch", "-q", "A", "-q", "B", "-v"]).unwrap();
        assert!(cli.debug);
        match cli.command {
            Command::Watch { queue } => assert_eq!(queue, vec!["A", "B"]),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn log_flags() {
        let cli = Cli::try_parse_from([
            "examflow",
            "watch",
            "--log-format",
            "json",
            "--log-filter",
            "examflow_client=trace",
        ])
        .unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert_eq!(cli.log_filter.as_deref(), Some("examflow_client=trace"));
        assert!(Cli::try_parse_from(["examflow", "--log-format", "xml", "watch"]).is_err());
    }

    #[test]
    fn rejects_unknown_transport() {
        assert!(Cli::try_parse_from(["examflow", "--transport", "carrier-pigeon", "in-progress"]).is_err());
    }
}
