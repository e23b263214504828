//! CLI argument parsing and command definitions

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

/// Cached Home Assistant states from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "homeglance",
    author,
    version,
    about = "Cached Home Assistant states, groups and watch entities",
    propagate_version = true,
    after_help = "Use 'homeglance <command> --help' for more information about a command."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,
    #[command(subcommand)]
    pub command: Command,
}

/// Global options available to all commands
#[derive(Debug, Clone, Args)]
pub struct GlobalOpts {
    /// Output format (json, yaml, table, auto)
    #[arg(short = 'o', long = "output", value_enum, global = true)]
    pub output_format: Option<OutputFormat>,

    /// Home Assistant server URL
    #[arg(short = 's', long, env = "HASS_SERVER", global = true)]
    pub server: Option<String>,

    /// Home Assistant password or access token
    #[arg(long, env = "HASS_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Skip SSL certificate verification
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Override config file path
    #[arg(long, value_name = "PATH", env = "HOMEGLANCE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Reduce output to only errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase logging verbosity (stackable: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Enable trace logging
    #[arg(long, global = true)]
    pub trace: bool,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Hide table headers
    #[arg(long, global = true)]
    pub no_headers: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[non_exhaustive]
pub enum OutputFormat {
    Json,
    Yaml,
    Table,
    Auto,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show login state, API availability and cache ages
    Status,

    /// Store server credentials after checking the API accepts them
    Login {
        /// Server URL (e.g., http://homeassistant.local:8123)
        url: String,

        /// Password; falls back to --password / HASS_PASSWORD
        #[arg(long = "with-password", value_name = "PASSWORD")]
        with_password: Option<String>,
    },

    /// Forget stored server credentials
    Logout,

    /// List entity states
    States {
        /// Filter by entity_id or friendly_name (fuzzy match)
        filter: Option<String>,
    },

    /// List service domains and their methods
    Services {
        /// Filter by domain (e.g., "light", "switch")
        domain: Option<String>,
    },

    /// List groups and their members
    Groups {
        /// Include scene entities
        #[arg(long)]
        scenes: bool,
    },

    /// Show today's history
    History {
        /// Restrict to one entity
        entity_id: Option<String>,
    },

    /// Call a service on an entity
    Call {
        /// Service domain (e.g., light)
        domain: String,

        /// Service method (e.g., turn_on)
        service: String,

        /// Target entity (e.g., light.kitchen)
        entity_id: String,
    },

    /// Manage the entities shown on the watch
    Watch {
        #[arg(value_enum)]
        slot: WatchSlot,

        #[command(subcommand)]
        command: Option<WatchCommand>,
    },

    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchSlot {
    Glance,
    Complication,
}

#[derive(Debug, Subcommand)]
pub enum WatchCommand {
    /// Show the chosen entity and its current state
    Show,

    /// Choose the entity
    Set {
        /// Entity ID (e.g., sensor.outside_temperature)
        entity_id: String,
    },

    /// Clear the choice
    Clear,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show effective configuration
    Show,

    /// Print config file path
    Path,

    /// Get a specific configuration value
    Get {
        /// Configuration key (dot-separated path)
        key: Option<String>,
    },

    /// Reset configuration to defaults
    Reset,
}
