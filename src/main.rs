//! tasktree CLI - a persistent task dependency graph.

use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::info;
use std::fs;
use std::io;
use std::path::PathBuf;
use tasktree::paths::auto_export_enabled;
use tasktree::{
    Client, Daemon, DaemonConfig, FeaturePatch, ImportMode, NewTask, Paths, SnapshotError, Status, Store, Task,
    TaskFilter, TaskPatch, is_daemon_running,
};

mod cli;

use cli::{Cli, Command, DepCommand, FeatureCommand};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tasktree")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("tasktree.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Open the store, rewriting the snapshot after mutations unless disabled.
fn open_store(paths: &Paths) -> Result<Store> {
    let store = Store::open(&paths.db_path).context("Failed to open store")?;
    if auto_export_enabled() {
        Ok(store.with_auto_export(&paths.snapshot_path))
    } else {
        Ok(store)
    }
}

fn format_status(status: &Status) -> ColoredString {
    match status {
        Status::Pending => "pending".green(),
        Status::InProgress => "in_progress".yellow(),
        Status::Completed => "completed".blue(),
        Status::Blocked => "blocked".red(),
    }
}

fn print_task_line(task: &Task) {
    println!(
        "{} {} P{} {}{}",
        format_status(&task.status),
        task.name.cyan(),
        task.priority,
        task.description,
        format!(" [{}]", task.feature_name).dimmed()
    );
}

fn print_task(task: &Task) {
    println!("{}: {}", "Name".bold(), task.name.cyan());
    println!("{}: {}", "Description".bold(), task.description);
    println!("{}: {}", "Status".bold(), format_status(&task.status));
    println!("{}: P{}", "Priority".bold(), task.priority);
    println!("{}: {}", "Feature".bold(), task.feature_name);
    println!("{}: {}", "Tests required".bold(), task.tests_required);
    if let Some(details) = &task.details {
        println!("{}: {}", "Details".bold(), details);
    }
    println!("{}: {}", "Created".bold(), task.created_at);
    println!("{}: {}", "Updated".bold(), task.updated_at);
    if let Some(started_at) = &task.started_at {
        println!("{}: {}", "Started".bold(), started_at);
    }
    if let Some(completed_at) = &task.completed_at {
        println!("{}: {}", "Completed".bold(), completed_at);
    }
}

fn parse_status(status: Option<String>) -> Result<Option<Status>> {
    Ok(status.map(|s| s.parse::<Status>()).transpose()?)
}

fn run(cli: Cli) -> Result<()> {
    let paths = Paths::resolve(cli.dir.as_deref())?;

    match cli.command {
        Command::Init { force } => {
            let mut store = open_store(&paths)?;
            if !paths.snapshot_path.exists() {
                println!("{} Initialized tasktree in {}", "✓".green(), paths.state_dir.display());
                return Ok(());
            }

            let mode = if force { ImportMode::Overwrite } else { ImportMode::MergeIfAbsent };
            match store.import_from_path(&paths.snapshot_path, mode) {
                Ok(summary) => println!(
                    "{} Restored {} features, {} tasks, {} dependencies from {}",
                    "✓".green(),
                    summary.features,
                    summary.tasks,
                    summary.dependencies,
                    paths.snapshot_path.display()
                ),
                Err(e) if matches!(e.downcast_ref::<SnapshotError>(), Some(SnapshotError::DestinationNotEmpty)) => {
                    println!(
                        "{} Already initialized in {} (use --force to reload the snapshot)",
                        "✓".green(),
                        paths.state_dir.display()
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Command::Feature(command) => {
            let mut store = open_store(&paths)?;
            match command {
                FeatureCommand::Add {
                    name,
                    description,
                    disabled,
                } => {
                    let feature = store.add_feature(&name, description.as_deref(), !disabled)?;
                    println!("{} Created feature: {}", "✓".green(), feature.name.cyan());
                }
                FeatureCommand::List { enabled, disabled } => {
                    let filter = match (enabled, disabled) {
                        (true, _) => Some(true),
                        (_, true) => Some(false),
                        _ => None,
                    };
                    for feature in store.list_features(filter)? {
                        let state = if feature.enabled { "enabled".green() } else { "disabled".red() };
                        println!(
                            "{} {}{}",
                            state,
                            feature.name.cyan(),
                            feature
                                .description
                                .map(|d| format!(" {}", d.dimmed()))
                                .unwrap_or_default()
                        );
                    }
                }
                FeatureCommand::Enable { name } => {
                    let patch = FeaturePatch {
                        enabled: Some(true),
                        ..Default::default()
                    };
                    store.update_feature(&name, patch)?;
                    println!("{} Enabled feature: {}", "✓".green(), name.cyan());
                }
                FeatureCommand::Disable { name } => {
                    let patch = FeaturePatch {
                        enabled: Some(false),
                        ..Default::default()
                    };
                    store.update_feature(&name, patch)?;
                    println!("{} Disabled feature: {}", "✓".green(), name.cyan());
                }
                FeatureCommand::Delete { name } => {
                    store.delete_feature(&name)?;
                    println!("{} Deleted feature: {}", "✓".green(), name.cyan());
                }
            }
        }

        Command::Add {
            name,
            description,
            priority,
            feature,
            details,
            no_tests,
            depends_on,
        } => {
            let mut store = open_store(&paths)?;
            let mut new_task = NewTask::new(name, description)
                .priority(priority)
                .tests_required(!no_tests);
            if let Some(feature) = feature {
                new_task = new_task.feature(feature);
            }
            if let Some(details) = details {
                new_task = new_task.details(details);
            }
            new_task.dependencies = depends_on;

            let task = store.add_task(new_task)?;
            println!("{} Created: {} P{}", "✓".green(), task.name.cyan(), task.priority);
        }

        Command::Get { name } => {
            let store = open_store(&paths)?;
            match store.get_task(&name)? {
                Some(task) => {
                    print_task(&task);
                    let unmet = store.unmet_dependencies(&name)?;
                    if !unmet.is_empty() {
                        let waiting: Vec<String> = unmet.iter().map(|(n, s)| format!("{} ({})", n, s)).collect();
                        println!("{}: {}", "Waiting on".bold(), waiting.join(", "));
                    }
                }
                None => {
                    eprintln!("{} Task not found: {}", "✗".red(), name);
                    std::process::exit(1);
                }
            }
        }

        Command::List {
            status,
            min_priority,
            feature,
        } => {
            let store = open_store(&paths)?;
            let filter = TaskFilter {
                status: parse_status(status)?,
                min_priority,
                feature_name: feature,
            };
            let tasks = store.list_tasks(&filter)?;

            if tasks.is_empty() {
                println!("{}", "No tasks found".dimmed());
            } else {
                for task in &tasks {
                    print_task_line(task);
                }
            }
        }

        Command::Update {
            name,
            description,
            details,
            clear_details,
            priority,
            status,
            tests_required,
            feature,
        } => {
            let patch = TaskPatch {
                description,
                details: if clear_details { Some(None) } else { details.map(Some) },
                priority,
                status: parse_status(status)?,
                tests_required,
                feature_name: feature,
            };
            if patch.is_empty() {
                bail!("Nothing to update; pass at least one field");
            }

            let mut store = open_store(&paths)?;
            let task = store.update_task(&name, patch)?;
            println!("{} Updated: {}", "✓".green(), task.name.cyan());
        }

        Command::Delete { name } => {
            let mut store = open_store(&paths)?;
            store.delete_task(&name)?;
            println!("{} Deleted: {}", "✓".green(), name.cyan());
        }

        Command::Start { name } => {
            let mut store = open_store(&paths)?;
            let task = store.start_task(&name)?;
            println!("{} Started: {} {}", "→".blue(), task.name.cyan(), task.description);
            if let Some(feature) = store.get_feature(&task.feature_name)? {
                println!(
                    "  {} {}{}",
                    "Feature:".bold(),
                    feature.name.cyan(),
                    feature
                        .description
                        .map(|d| format!(" {}", d.dimmed()))
                        .unwrap_or_default()
                );
            }
        }

        Command::Complete { name } => {
            let mut store = open_store(&paths)?;
            let task = store.complete_task(&name)?;
            println!("{} Completed: {} {}", "✓".green(), task.name.cyan(), task.description);
        }

        Command::Dep(command) => {
            let mut store = open_store(&paths)?;
            match command {
                DepCommand::Add { task, depends_on } => {
                    store.add_dependency(&task, &depends_on)?;
                    println!("{} {} now depends on {}", "✓".green(), task.cyan(), depends_on.cyan());
                }
                DepCommand::Remove { task, depends_on } => {
                    if store.remove_dependency(&task, &depends_on)? {
                        println!("{} Removed {} -> {}", "✓".green(), task.cyan(), depends_on.cyan());
                    } else {
                        println!("{} {} did not depend on {}", "·".dimmed(), task.cyan(), depends_on.cyan());
                    }
                }
                DepCommand::List { task } => {
                    let deps = store.list_dependencies(task.as_deref())?;
                    if deps.is_empty() {
                        println!("{}", "No dependencies".dimmed());
                    }
                    for dep in deps {
                        println!("{} -> {}", dep.task_name.cyan(), dep.depends_on_task_name.cyan());
                    }
                }
            }
        }

        Command::Available => {
            let store = open_store(&paths)?;
            let tasks = store.available_tasks()?;

            if tasks.is_empty() {
                println!("{}", "No available tasks".dimmed());
            } else {
                println!("{} {} task(s) ready to start:", "→".blue(), tasks.len());
                for task in tasks {
                    println!("  {} P{} {}", task.name.cyan(), task.priority, task.description);
                }
            }
        }

        Command::Export { path } => {
            let store = open_store(&paths)?;
            match path {
                Some(path) if path.as_os_str() == "-" => store.export_snapshot(io::stdout().lock())?,
                other => {
                    let path = other.unwrap_or_else(|| paths.snapshot_path.clone());
                    store.export_to_path(&path)?;
                    println!("{} Exported to {}", "✓".green(), path.display());
                }
            }
        }

        Command::Import { path, overwrite } => {
            let path = path.unwrap_or_else(|| paths.snapshot_path.clone());
            let mode = if overwrite { ImportMode::Overwrite } else { ImportMode::MergeIfAbsent };

            let mut store = open_store(&paths)?;
            let summary = store.import_from_path(&path, mode)?;
            println!(
                "{} Imported {} features, {} tasks, {} dependencies",
                "✓".green(),
                summary.features,
                summary.tasks,
                summary.dependencies
            );
        }

        Command::Reset { yes } => {
            if !yes {
                bail!("Refusing to delete everything without --yes");
            }
            let mut store = open_store(&paths)?;
            store.reset()?;
            println!("{} Deleted all tasks, dependencies and features", "✓".green());
        }

        Command::Daemon => {
            println!("{} Starting daemon for {}", "→".blue(), paths.state_dir.display());

            let mut config = DaemonConfig::new(paths);
            config.auto_export = auto_export_enabled();
            let mut daemon = Daemon::new(config).context("Failed to create daemon")?;

            let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
            rt.block_on(async { daemon.run().await }).context("Daemon error")?;
        }

        Command::DaemonStop => {
            if !is_daemon_running(&paths) {
                println!("{} Daemon is not running", "✗".red());
                std::process::exit(1);
            }

            let mut client = Client::connect(&paths, false).context("Failed to connect to daemon")?;
            client.shutdown().context("Failed to shutdown daemon")?;
            println!("{} Daemon stopped", "✓".green());
        }

        Command::DaemonStatus => {
            if is_daemon_running(&paths) {
                println!("{} Daemon is running", "✓".green());

                if let Ok(mut client) = Client::connect(&paths, false)
                    && client.ping().is_ok()
                {
                    println!("  {} Responding to requests", "✓".green());
                }
            } else {
                println!("{} Daemon is not running", "✗".red());
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("Command: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
