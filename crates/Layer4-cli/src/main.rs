//! termtask CLI - Main entry point

mod runner;
mod tasks_file;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tasks_file::TasksFile;
use termtask_engine::WorkspaceFolder;
use termtask_foundation::EngineConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// termtask - run workspace tasks in terminals
#[derive(Parser, Debug)]
#[command(name = "termtask")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Tasks file to use instead of .termtask/tasks.{json,toml}
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the tasks of the workspace
    List,
    /// Run a task and its dependencies
    Run {
        /// Label of the task
        label: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let root = std::env::current_dir().context("Failed to read current directory")?;
    let path = match args.file {
        Some(path) => path,
        None => match TasksFile::find(&root) {
            Some(path) => path,
            None => bail!("No tasks file found in {}", root.join(termtask_foundation::PROJECT_DIR).display()),
        },
    };
    let folder = WorkspaceFolder::from_path(&root);
    let tasks = TasksFile::load(&path)?.into_tasks(&folder)?;

    match args.command {
        Command::List => {
            for task in &tasks {
                let name = task.command().and_then(|command| command.name.as_ref());
                match name {
                    Some(name) => println!("{:<24} {}", task.label, name.value()),
                    None => println!("{:<24} (composite)", task.label),
                }
            }
            Ok(())
        }
        Command::Run { label } => {
            let config = EngineConfig::load().unwrap_or_else(|e| {
                tracing::warn!("Failed to load engine config, using defaults: {}", e);
                EngineConfig::default()
            });
            let summary = runner::run_task(config, folder, tasks, &label).await?;
            match summary.exit_code {
                Some(0) => Ok(()),
                Some(code) => std::process::exit(code),
                None => std::process::exit(130),
            }
        }
    }
}
