mod cli;
mod config;
mod storage;

use std::collections::BTreeMap;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use sealstore_core::storage::BackingMap;
use sealstore_storage::{
    dispatch::{dispatch, MethodCall},
    entry_store::EntryStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand};

const HEALTH_CHECK_KEY: &str = "health/check";

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        command => {
            let store = storage::store_from_config(&config)?;
            run_store_command(&store, command)?;
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info; logs go to stderr so
    // values printed on stdout stay pipeable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("sealstore {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

fn run_store_command<M: BackingMap>(store: &EntryStore<M>, command: Command) -> Result<()> {
    match command {
        Command::Write { key, value } => store.put(&key, &value)?,
        Command::Read { key } => match store.get(&key)? {
            Some(value) => println!("{value}"),
            None => eprintln!("no value stored for {key}"),
        },
        Command::Delete { key } => store.delete(&key)?,
        Command::ReadAll { keys } => {
            let values = store.get_all(&keys)?;
            println!("{}", serde_json::to_string_pretty(&values)?);
        }
        Command::WriteMap { json } => {
            let entries: BTreeMap<String, Option<String>> = serde_json::from_str(&json)?;
            store.put_all(entries)?;
        }
        Command::DeleteAll { keys } => store.delete_all(&keys)?,
        Command::Call { method, arguments } => {
            let arguments = serde_json::from_str(&arguments)?;
            let result = dispatch(store, &MethodCall::new(method, arguments))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Health => {
            run_store_health(store)?;
            let registry = store.registry();
            println!("Storage: ok");
            println!("Write cipher: {}", registry.current_tag().unwrap_or("none"));
            println!("Readable formats: {}", registry.tags().join(", "));
        }
        Command::Version | Command::Config(_) => {}
    }
    Ok(())
}

/// Round-trips a health-check entry through the encrypted store.
fn run_store_health<M: BackingMap>(store: &EntryStore<M>) -> Result<()> {
    let payload = "ok";
    store.put(HEALTH_CHECK_KEY, payload)?;
    let round_trip = store.get(HEALTH_CHECK_KEY)?;
    store.delete(HEALTH_CHECK_KEY)?;

    if round_trip.as_deref() != Some(payload) {
        return Err(eyre!("storage round-trip failed"));
    }
    Ok(())
}
