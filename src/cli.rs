//! CLI argument parsing for tasktree.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tt",
    about = "A persistent task dependency graph",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/tasktree/logs/tasktree.log"
)]
pub struct Cli {
    /// Directory to keep .tasktree in (default: enclosing git repo, else home)
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the database, restoring from the snapshot file if one exists
    Init {
        /// Replace existing data with the snapshot contents
        #[arg(long)]
        force: bool,
    },

    /// Manage features
    #[command(subcommand)]
    Feature(FeatureCommand),

    /// Create a new task
    Add {
        /// Unique task name (max 55 characters)
        name: String,

        /// What needs doing
        #[arg(short = 'D', long)]
        description: String,

        /// Priority (0=lowest, 10=highest)
        #[arg(short, long, default_value = "0")]
        priority: u8,

        /// Feature the task belongs to
        #[arg(short, long)]
        feature: Option<String>,

        /// Long-form details
        #[arg(long)]
        details: Option<String>,

        /// Mark the task as not needing tests
        #[arg(long)]
        no_tests: bool,

        /// Tasks that must complete first (comma-separated)
        #[arg(long, value_delimiter = ',')]
        depends_on: Vec<String>,
    },

    /// Show a task
    Get {
        /// Task name
        name: String,
    },

    /// List tasks
    List {
        /// Filter by status (pending, in_progress, completed, blocked)
        #[arg(short, long)]
        status: Option<String>,

        /// Only tasks at or above this priority
        #[arg(long)]
        min_priority: Option<u8>,

        /// Filter by feature
        #[arg(short, long)]
        feature: Option<String>,
    },

    /// Update task fields
    Update {
        /// Task name
        name: String,

        #[arg(short = 'D', long)]
        description: Option<String>,

        #[arg(long, conflicts_with = "clear_details")]
        details: Option<String>,

        /// Remove the details text
        #[arg(long)]
        clear_details: bool,

        #[arg(short, long)]
        priority: Option<u8>,

        /// New status; any status may be set here
        #[arg(short, long)]
        status: Option<String>,

        #[arg(long)]
        tests_required: Option<bool>,

        #[arg(short, long)]
        feature: Option<String>,
    },

    /// Delete a task and its dependency edges
    Delete {
        /// Task name
        name: String,
    },

    /// Start working on a task (pending or blocked -> in_progress)
    Start {
        /// Task name
        name: String,
    },

    /// Complete a task (in_progress -> completed)
    Complete {
        /// Task name
        name: String,
    },

    /// Manage dependencies
    #[command(subcommand)]
    Dep(DepCommand),

    /// Show tasks that can be started now
    Available,

    /// Write the snapshot (default: the configured snapshot path)
    Export {
        /// Output path, `-` for stdout
        path: Option<PathBuf>,
    },

    /// Load a snapshot (default: the configured snapshot path)
    Import {
        /// Input path
        path: Option<PathBuf>,

        /// Replace existing data instead of requiring an empty store
        #[arg(long)]
        overwrite: bool,
    },

    /// Delete all tasks, dependencies and features
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Run the daemon in foreground
    Daemon,

    /// Stop the running daemon
    DaemonStop,

    /// Check daemon status
    DaemonStatus,
}

#[derive(Subcommand)]
pub enum FeatureCommand {
    /// Create a feature
    Add {
        name: String,

        #[arg(short = 'D', long)]
        description: Option<String>,

        /// Create the feature disabled
        #[arg(long)]
        disabled: bool,
    },

    /// List features
    List {
        /// Only enabled features
        #[arg(long, conflicts_with = "disabled")]
        enabled: bool,

        /// Only disabled features
        #[arg(long)]
        disabled: bool,
    },

    /// Enable a feature
    Enable { name: String },

    /// Disable a feature
    Disable { name: String },

    /// Delete a feature no task uses
    Delete { name: String },
}

#[derive(Subcommand)]
pub enum DepCommand {
    /// TASK cannot start until DEPENDS_ON is completed
    Add { task: String, depends_on: String },

    /// Remove a dependency
    Remove { task: String, depends_on: String },

    /// List dependencies, optionally only those touching TASK
    List { task: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_add_with_dependencies() {
        let cli = Cli::parse_from(["tt", "add", "api", "-D", "Build it", "-p", "7", "--depends-on", "schema,auth"]);
        match cli.command {
            Command::Add {
                name,
                priority,
                depends_on,
                no_tests,
                ..
            } => {
                assert_eq!(name, "api");
                assert_eq!(priority, 7);
                assert_eq!(depends_on, vec!["schema", "auth"]);
                assert!(!no_tests);
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_parse_nested_subcommands() {
        let cli = Cli::parse_from(["tt", "--dir", "/tmp/x", "dep", "add", "b", "a"]);
        assert_eq!(cli.dir, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(cli.command, Command::Dep(DepCommand::Add { .. })));

        let cli = Cli::parse_from(["tt", "feature", "list", "--disabled"]);
        assert!(matches!(
            cli.command,
            Command::Feature(FeatureCommand::List {
                enabled: false,
                disabled: true
            })
        ));
    }
}
