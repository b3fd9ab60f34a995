//! Binary entrypoint for the terralog CLI.
//!
//! Commands:
//! - `start` - run the telemetry node until ctrl-c or a fatal condition
//! - `init` - create a starter `terralog.toml` and the data directory
//! - `status` - print backlog, archive, and boot-count summary
//!
//! See the library crate docs for module-level details: `terralog::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use terralog::config::Config;
use terralog::node::state::RuntimeCounters;
use terralog::node::Node;
use terralog::storage::archive::ArchiveLog;
use terralog::storage::BufferQueue;

#[derive(Parser)]
#[command(name = "terralog")]
#[command(about = "A durable field telemetry node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "terralog.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the telemetry node
    Start,
    /// Initialize a new node configuration and data directory
    Init,
    /// Show buffered backlog and node statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early to configure logging (except for Init which writes it)
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting terralog v{}", env!("CARGO_PKG_VERSION"));
            let mut node = Node::new(config)?;
            node.run().await?;
        }
        Commands::Init => {
            info!("Initializing new node configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);

            let config = Config::load(&cli.config).await?;
            tokio::fs::create_dir_all(&config.storage.data_dir).await?;
            tokio::fs::create_dir_all(format!("{}/archive", config.storage.data_dir)).await?;
            info!("Data directory initialized at {}", config.storage.data_dir);
        }
        Commands::Status => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            show_status(&config)?;
        }
    }

    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let data_dir = std::path::Path::new(&config.storage.data_dir);
    let queue = BufferQueue::open(data_dir.join("buffer.jsonl"), config.storage.max_backlog)?;
    let archive = ArchiveLog::new(data_dir.join("archive"))?;
    let boot_count = RuntimeCounters::peek_boot_count(data_dir);

    println!("Device:        {}", config.device.id);
    println!("Location:      {}", config.device.location);
    println!("Data dir:      {}", config.storage.data_dir);
    println!("Backlog:       {} buffered readings", queue.count());
    println!("Archive days:  {}", archive.partition_count());
    println!("Boot count:    {}", boot_count);
    println!(
        "Broker:        {}:{} (data topic {})",
        config.mqtt.host, config.mqtt.port, config.mqtt.topic_data
    );
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity overrides config
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .map(|c| c.logging.level.parse().unwrap_or(log::LevelFilter::Info))
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
        {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

            // If stdout is a terminal, mirror log lines to the console as
            // well; under a service manager only the file gets them.
            let is_tty = atty::is(atty::Stream::Stdout);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());

                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }

                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        } else {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    record.level(),
                    record.args()
                )
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
