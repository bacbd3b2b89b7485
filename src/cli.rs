use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use kubepulse_types::{EventFilterState, EventSeverity, TimeRange};

/// kubepulse - connectivity and health across many Kubernetes contexts
#[derive(Parser, Debug)]
#[command(name = "kubepulse")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (default: ~/.kubepulse/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Probe contexts concurrently and report connectivity
    Status {
        /// Contexts to probe (default: every kubeconfig context)
        #[arg(value_name = "CONTEXT")]
        contexts: Vec<String>,
    },

    /// List namespaces of a context
    Namespaces {
        /// Context name (default: current context)
        #[arg(value_name = "CONTEXT")]
        context: Option<String>,
    },

    /// Fetch events from an operated cluster
    Events {
        /// Context name (default: current context)
        #[arg(value_name = "CONTEXT")]
        context: Option<String>,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Keep event working sets fresh and print changes until interrupted
    Watch {
        /// Contexts to watch (default: every operated context)
        #[arg(value_name = "CONTEXT")]
        contexts: Vec<String>,

        /// Refresh interval in seconds (default: preferences, then config)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Delete a namespace, reporting finalizers that block it
    DeleteNamespace {
        /// Namespace to delete
        name: String,

        /// Context name (default: current context)
        #[arg(short, long)]
        context: Option<String>,
    },

    /// Show or change persisted panel preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum PrefsCommand {
    /// Print the preferences for a context
    Show { context: String },

    /// Change individual preference fields
    Set {
        context: String,

        #[arg(long)]
        follow: Option<bool>,

        #[arg(long)]
        show_timestamps: Option<bool>,

        #[arg(long)]
        line_limit: Option<usize>,

        /// Refresh interval in seconds
        #[arg(long)]
        refresh_interval: Option<u64>,

        #[arg(long)]
        refresh_enabled: Option<bool>,
    },

    /// Drop the stored record so defaults apply again
    Reset { context: String },
}

/// Event filter flags shared by `events` and `watch`
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct FilterArgs {
    /// Only events from this namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Severities to include: normal, warning, error (repeatable)
    #[arg(short, long, value_delimiter = ',', value_parser = parse_severity)]
    pub severity: Vec<EventSeverity>,

    /// Maximum event age: all, 5m, 15m, 30m, 1h, 6h, 24h
    #[arg(long, default_value = "all")]
    pub since: TimeRange,

    /// Only events about this resource kind (e.g. Pod)
    #[arg(short, long)]
    pub kind: Option<String>,

    /// Case-insensitive text search over message, reason and object name
    #[arg(short = 'q', long)]
    pub search: Option<String>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> EventFilterState {
        EventFilterState {
            namespace: self.namespace.clone(),
            severities: self.severity.iter().copied().collect(),
            since: self.since,
            resource_kind: self.kind.clone(),
            search_text: self.search.clone(),
        }
    }
}

fn parse_severity(value: &str) -> Result<EventSeverity, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "normal" => Ok(EventSeverity::Normal),
        "warning" => Ok(EventSeverity::Warning),
        "error" => Ok(EventSeverity::Error),
        other => Err(format!(
            "unknown severity '{}' (expected normal, warning or error)",
            other
        )),
    }
}
