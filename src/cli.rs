use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "llmslot",
    version,
    about = "Run one LLM inference service at a time on a single GPU"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Use a specific config file
    #[arg(short = 'f', long = "file", global = true, env = "LLMSLOT_CONFIG")]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a service and wait until it answers requests
    Launch {
        /// Service identifier from the catalog
        service: String,
    },
    /// Stop the active service
    Stop {
        /// Only stop if this service is the active one
        service: Option<String>,
        /// Stop every llmslot container of this project, tracked or not
        #[arg(long, conflicts_with = "service")]
        all: bool,
    },
    /// Stop the active service, then launch another
    Switch {
        /// Service identifier to switch to
        service: String,
    },
    /// Show slot state, uptime and GPU usage
    Status,
    /// Print the active service identifier
    Current,
    /// List configured services
    List {
        /// Show image, container and environment (secrets masked)
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show recent container logs for a service
    Logs {
        service: String,
        /// Number of lines from the end
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: usize,
    },
    /// Show GPU memory and utilisation
    #[command(name = "resource-stats")]
    ResourceStats,
    /// Send a test chat completion to a running service
    #[command(name = "test-api")]
    TestApi {
        service: String,
        /// Request timeout in seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
    /// Check the config file for errors
    Validate,
    /// Generate a starter llmslot.toml
    Init,
    /// Check that Docker and nvidia-smi are usable
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stop_accepts_optional_service() {
        let cli = Cli::try_parse_from(["llmslot", "stop"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Stop {
                service: None,
                all: false
            }
        ));

        let cli = Cli::try_parse_from(["llmslot", "-f", "x.toml", "stop", "dev"]).unwrap();
        assert_eq!(cli.global.config_file, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Commands::Stop { service: Some(ref s), .. } if s == "dev"));

        assert!(Cli::try_parse_from(["llmslot", "stop", "dev", "--all"]).is_err());
    }

    #[test]
    fn logs_defaults_to_one_hundred_lines() {
        let cli = Cli::try_parse_from(["llmslot", "logs", "po"]).unwrap();
        assert!(matches!(cli.command, Commands::Logs { lines: 100, .. }));
        let cli = Cli::try_parse_from(["llmslot", "logs", "po", "-n", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::Logs { lines: 5, .. }));
    }

    #[test]
    fn hyphenated_subcommands() {
        assert!(Cli::try_parse_from(["llmslot", "resource-stats"]).is_ok());
        assert!(Cli::try_parse_from(["llmslot", "test-api", "dev"]).is_ok());
    }
}
