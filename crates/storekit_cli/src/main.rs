//! Command-line probe for `storekit_core`.
//!
//! # Responsibility
//! - Verify core crate linkage (`ping`).
//! - Drive a store through the repository API for manual checks.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use storekit_core::{
    init_logging, Entity, Filter, ModelSource, PersistenceManager, SaveOutcome, SortKey,
    StoreConfig, StoreDescriptor,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Widget {
    name: String,
    rank: i64,
}

impl Entity for Widget {
    const ENTITY_NAME: &'static str = "Widget";
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreArg {
    Memory,
    Disk,
}

#[derive(Debug, Parser)]
#[command(name = "storekit", version, about = "Inspect and edit a storekit record store")]
struct Cli {
    #[arg(long, value_enum, default_value_t = StoreArg::Disk)]
    store: StoreArg,
    /// Directory holding durable store files (defaults to the user data dir).
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long, default_value = "storekit")]
    model_name: String,
    /// Absolute directory for rolling log files.
    #[arg(long)]
    log_dir: Option<PathBuf>,
    #[arg(long, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print core linkage and version.
    Ping,
    /// Manage widget records.
    #[command(subcommand)]
    Widget(WidgetCommand),
    /// Insert two widgets, save, count, delete them all and count again.
    Scenario,
}

#[derive(Debug, Subcommand)]
enum WidgetCommand {
    Add {
        name: String,
        #[arg(long, default_value_t = 0)]
        rank: i64,
    },
    List {
        /// Only widgets whose name contains this text.
        #[arg(long)]
        name_contains: Option<String>,
    },
    Count,
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        init_logging(&cli.log_level, log_dir).context("failed to start logging")?;
    }

    match cli.command {
        Command::Ping => {
            println!("storekit_core ping={}", storekit_core::ping());
            println!("storekit_core version={}", storekit_core::core_version());
            Ok(())
        }
        Command::Widget(command) => {
            let manager = open_manager(cli.store, cli.data_dir.as_deref(), &cli.model_name)?;
            run_widget_command(&manager, command)
        }
        Command::Scenario => {
            let manager = open_manager(cli.store, cli.data_dir.as_deref(), &cli.model_name)?;
            run_scenario(&manager)
        }
    }
}

fn open_manager(
    store: StoreArg,
    data_dir: Option<&Path>,
    model_name: &str,
) -> Result<PersistenceManager> {
    let descriptor = match store {
        StoreArg::Memory => StoreDescriptor::ephemeral(),
        StoreArg::Disk => StoreDescriptor::durable(),
    };
    let mut config = StoreConfig::new(model_name, descriptor);
    if let Some(data_dir) = data_dir {
        config = config.with_data_dir(data_dir);
    }

    let sources = vec![ModelSource::new("cli").with_entity::<Widget>()];
    let manager =
        PersistenceManager::initialize(sources, config).context("failed to open store")?;
    info!(
        "event=cli_open module=cli status=ok kind={} model={}",
        manager.descriptor().kind().as_str(),
        manager.model_name()
    );
    Ok(manager)
}

fn run_widget_command(manager: &PersistenceManager, command: WidgetCommand) -> Result<()> {
    let session = manager.interactive();
    let repo = session.repository::<Widget>()?;

    match command {
        WidgetCommand::Add { name, rank } => {
            let record = repo.insert_with(|mut widget| {
                widget.name = name;
                widget.rank = rank;
                widget
            })?;
            save_or_bail(repo.save_outcome())?;
            println!("added {} {}", record.id(), record.name);
        }
        WidgetCommand::List { name_contains } => {
            let records = repo.try_fetch(|ty| {
                let query = ty.all_query().order_by(SortKey::asc("rank"));
                match name_contains {
                    Some(needle) => query.filter(Filter::contains("name", needle)),
                    None => query,
                }
            })?;
            for record in records {
                println!("{}\t{}\t{}", record.id(), record.rank, record.name);
            }
        }
        WidgetCommand::Count => {
            println!("{}", repo.try_count(repo.default_query())?);
        }
        WidgetCommand::Clear => {
            let marked = repo.try_delete_all()?;
            save_or_bail(repo.save_outcome())?;
            println!("deleted {marked}");
        }
    }
    Ok(())
}

fn run_scenario(manager: &PersistenceManager) -> Result<()> {
    let session = manager.interactive();
    let repo = session.repository::<Widget>()?;

    for name in ["a", "b"] {
        repo.insert_with(|mut widget| {
            widget.name = name.to_string();
            widget
        })?;
    }
    println!("save={}", repo.save());
    println!("count={}", repo.count_all());

    repo.delete_all();
    println!("save={}", repo.save());
    println!("count={}", repo.count_all());
    Ok(())
}

fn save_or_bail(outcome: SaveOutcome) -> Result<()> {
    match outcome {
        SaveOutcome::Saved | SaveOutcome::NothingPending => Ok(()),
        SaveOutcome::Failed(err) => bail!("save failed: {err}"),
    }
}
