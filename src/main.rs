//! stashlog - maintenance CLI
//!
//! Opens the store in a data directory, loads it, runs the startup expiry
//! sweep and compaction, executes one subcommand and closes the store.

use stashlog::config::days_to_duration;
use stashlog::{Item, Store, StoreConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// What to do once the store is loaded
#[derive(Debug, Default)]
enum Command {
    #[default]
    List,
    Get(String),
    Add(String),
    Remove(String),
    Compact,
    Cleanup(Duration),
    Stats,
}

/// CLI configuration
#[derive(Debug, Default)]
struct Config {
    /// Overrides `LC_DOWNLOAD_PATH`
    data_dir: Option<PathBuf>,
    command: Command,
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" | "-d" => {
                    config.data_dir = Some(PathBuf::from(required(&args, i, "--data-dir")));
                    i += 2;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("stashlog version {}", stashlog::VERSION);
                    std::process::exit(0);
                }
                "list" => {
                    config.command = Command::List;
                    i += 1;
                }
                "get" => {
                    config.command = Command::Get(required(&args, i, "get"));
                    i += 2;
                }
                "add" => {
                    config.command = Command::Add(required(&args, i, "add"));
                    i += 2;
                }
                "remove" => {
                    config.command = Command::Remove(required(&args, i, "remove"));
                    i += 2;
                }
                "compact" => {
                    config.command = Command::Compact;
                    i += 1;
                }
                "cleanup" => {
                    let max_age = required(&args, i, "cleanup")
                        .parse::<u64>()
                        .ok()
                        .and_then(days_to_duration)
                        .unwrap_or_else(|| {
                            eprintln!("Error: cleanup expects a number of days");
                            std::process::exit(1);
                        });
                    config.command = Command::Cleanup(max_age);
                    i += 2;
                }
                "stats" => {
                    config.command = Command::Stats;
                    i += 1;
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Environment configuration with the command-line overrides applied
    fn store_config(&self) -> StoreConfig {
        let mut store_config = StoreConfig::from_env();
        if let Some(data_dir) = &self.data_dir {
            store_config.data_dir = data_dir.clone();
        }
        store_config
    }
}

/// Returns the value following `args[i]`, or exits with an error
fn required(args: &[String], i: usize, name: &str) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {} requires a value", name);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
stashlog - An Embedded Log-Structured Metadata Store

USAGE:
    stashlog [OPTIONS] [COMMAND]

OPTIONS:
    -d, --data-dir <DIR>    Data directory holding metadata.jsonl (default: $LC_DOWNLOAD_PATH or ./download)
    -v, --version           Print version information
    -h, --help              Print this help message

COMMANDS:
    list                    List items, newest first (default)
    get <ID>                Print one item as JSON
    add <TEXT>              Add a text item
    remove <ID>             Remove an item and delete its file
    compact                 Rewrite the log down to the live items
    cleanup <DAYS>          Remove items older than DAYS days
    stats                   Print item and log statistics

ENVIRONMENT:
    LC_DOWNLOAD_PATH, LC_MAX_AGE_DAYS, LC_QUEUE_CAPACITY,
    LC_SYNC_INTERVAL_SECS, LC_COMPACT_INTERVAL_SECS

EXAMPLES:
    stashlog --data-dir ./download list
    stashlog add "meeting notes"
    stashlog cleanup 30
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging; RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    let store_config = config.store_config();
    let max_age = store_config.max_age;

    let store = Store::open(store_config)?;
    store.load().await?;

    // Startup maintenance: failures are logged, the store stays usable
    if let Some(max_age) = max_age {
        if let Err(e) = store.cleanup_expired(max_age).await {
            warn!(error = %e, "Startup expiry sweep failed");
        }
    }
    if let Err(e) = store.compact().await {
        warn!(error = %e, "Startup compaction failed");
    }

    let result = run(&store, config.command).await;
    store.close().await?;
    info!("Store closed");
    result
}

async fn run(store: &Store, command: Command) -> anyhow::Result<()> {
    match command {
        Command::List => {
            for item in store.list() {
                println!(
                    "{}  {:<5}  {}  {}",
                    item.id,
                    item.kind.tag(),
                    item.create_time.format("%Y-%m-%d %H:%M:%S"),
                    item.content
                );
            }
        }
        Command::Get(id) => match store.get(&id) {
            Some(item) => println!("{}", serde_json::to_string_pretty(&item)?),
            None => anyhow::bail!("no item with id {}", id),
        },
        Command::Add(text) => {
            let item = Item::text(text);
            println!("{}", item.id);
            store.add(item).await;
        }
        Command::Remove(id) => {
            if store.purge(&id).await.is_none() {
                anyhow::bail!("no item with id {}", id);
            }
        }
        Command::Compact => {
            let outcome = store.compact().await?;
            println!("{:?}", outcome);
        }
        Command::Cleanup(max_age) => {
            let report = store.cleanup_expired(max_age).await?;
            println!(
                "expired {} items, deleted {} files ({} file errors)",
                report.expired.len(),
                report.files_deleted,
                report.file_errors
            );
        }
        Command::Stats => {
            let stats = store.stats();
            let log_bytes = std::fs::metadata(store.log_path())
                .map(|m| m.len())
                .unwrap_or(0);
            println!("items:        {}", stats.items);
            println!("log:          {}", store.log_path().display());
            println!("log bytes:    {}", log_bytes);
            println!("expired:      {}", stats.expired);
            println!("compactions:  {}", stats.compactions);
        }
    }

    Ok(())
}
