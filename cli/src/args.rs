use clap::{Parser, Subcommand};
use detector_cli::LogFormat;

/// Agent Detector - live task list from the reactive backend
#[derive(Parser, Debug)]
#[command(name = "agent-detector")]
#[command(version)]
#[command(about = "Watch the Agent Detector task list live", long_about = None)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Compact, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Mount the task list and reprint it on every update (default)
    Watch {
        /// Exit after this many updates
        #[arg(long = "max-updates")]
        max_updates: Option<u64>,
    },

    /// Fetch the task list once over HTTP and print it
    Query,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Watch { max_updates: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_is_default() {
        let cli = Cli::parse_from(["agent-detector"]);
        assert_eq!(cli.command(), Command::Watch { max_updates: None });
        assert_eq!(cli.log_format, LogFormat::Compact);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_parse_watch_options() {
        let cli = Cli::parse_from([
            "agent-detector",
            "watch",
            "--max-updates",
            "3",
            "--log-format",
            "json",
            "-v",
        ]);
        assert_eq!(cli.command(), Command::Watch { max_updates: Some(3) });
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(cli.verbose);
    }

    #[test]
    fn test_parse_query() {
        let cli = Cli::parse_from(["agent-detector", "query"]);
        assert_eq!(cli.command(), Command::Query);
    }
}
