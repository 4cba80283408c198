//! Spandb CLI
//!
//! Command-line interface for a spandb database:
//! - Create and drop streams
//! - Write datapoints from JSON
//! - Read, transform and remove datapoints
//! - Generate a default config file

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use spandb::config::{generate_default_config, Config, LoggingConfig};
use spandb::storage::{
    Datapoint, DatapointArrayIterator, Datapoints, DefaultTimeResolver, LogSink, QueryParams,
    StorageEngine, Variant, WriteMethod,
};
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "spandb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Interval time-series storage")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file, overriding the config (":memory:" for a scratch database)
    #[arg(long, global = true)]
    pub db: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and its schema
    Init,

    /// Register a stream
    CreateStream {
        /// Stream id (default: random UUID)
        id: Option<String>,
    },

    /// Delete a stream with all of its data and actions
    DropStream { id: String },

    /// List stream ids
    ListStreams,

    /// Write a JSON array of datapoints: [{"t": 1.5, "d": 0, "v": ...}, ...]
    Write {
        stream: String,
        /// Input file (default: stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// insert, append or update
        #[arg(short, long, default_value = "update")]
        method: WriteMethod,
        #[arg(long, default_value = "data")]
        variant: Variant,
    },

    /// Record an action at the current time
    Act {
        stream: String,
        /// JSON value of the action
        value: String,
        #[arg(short, long)]
        actor: String,
    },

    /// Print datapoints as JSON lines
    Read {
        stream: String,
        #[command(flatten)]
        address: AddressArgs,
        #[arg(short, long)]
        reversed: bool,
        #[arg(short, long)]
        limit: Option<u64>,
        /// Transform pipeline, e.g. 'if($[temp] > 30) | $[temp]'
        #[arg(short = 'x', long)]
        transform: Option<String>,
    },

    /// Delete the addressed datapoints
    Remove {
        stream: String,
        #[command(flatten)]
        address: AddressArgs,
    },

    /// Count datapoints in a stream
    Length {
        stream: String,
        #[arg(long, default_value = "data")]
        variant: Variant,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Addressing flags; times accept "now-1d", RFC 3339 or epoch seconds
#[derive(Args, Debug, Default)]
pub struct AddressArgs {
    #[arg(long, allow_hyphen_values = true)]
    t: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    i: Option<i64>,
    #[arg(long, allow_hyphen_values = true)]
    t1: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    t2: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    i1: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    i2: Option<i64>,
    #[arg(long, default_value = "data")]
    variant: Variant,
}

impl AddressArgs {
    fn into_params(self, stream: String) -> QueryParams {
        let mut params = QueryParams {
            stream,
            variant: self.variant,
            t: self.t,
            i: self.i,
            t1: self.t1,
            t2: self.t2,
            i1: self.i1,
            i2: self.i2,
            ..Default::default()
        };
        // No addressing at all means the whole stream
        if params.t.is_none()
            && params.i.is_none()
            && params.t1.is_none()
            && params.t2.is_none()
            && params.i1.is_none()
            && params.i2.is_none()
        {
            params.i1 = Some(0);
        }
        params
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }

    init_logging(&config.logging);

    let open = || -> anyhow::Result<StorageEngine> {
        let engine = StorageEngine::open(config.storage.engine_config())
            .with_context(|| format!("failed to open database {}", config.storage.db_path))?;
        Ok(engine.with_sink(Arc::new(LogSink)))
    };
    let resolver = DefaultTimeResolver::new();

    match cli.command {
        Commands::Init => {
            open()?;
            println!("Initialized {}", config.storage.db_path);
        }

        Commands::CreateStream { id } => {
            let id = open()?.register_stream(id.as_deref())?;
            println!("{}", id);
        }

        Commands::DropStream { id } => {
            open()?.drop_stream(&id)?;
            println!("Dropped {}", id);
        }

        Commands::ListStreams => {
            for id in open()?.list_streams()? {
                println!("{}", id);
            }
        }

        Commands::Write {
            stream,
            file,
            method,
            variant,
        } => {
            let points: Vec<Datapoint> = match &file {
                Some(path) => {
                    let reader = std::fs::File::open(path)
                        .with_context(|| format!("failed to open {:?}", path))?;
                    serde_json::from_reader(BufReader::new(reader))?
                }
                None => serde_json::from_reader(std::io::stdin().lock())?,
            };

            let summary = open()?.write(
                &stream,
                variant,
                DatapointArrayIterator::new(points),
                method,
            )?;
            if summary.count > 0 {
                println!(
                    "Wrote {} datapoints to {} [{}, {}]",
                    summary.count, stream, summary.start, summary.end
                );
            } else {
                println!("Nothing to write");
            }
        }

        Commands::Act {
            stream,
            value,
            actor,
        } => {
            let value: serde_json::Value = serde_json::from_str(&value)
                .with_context(|| format!("action value is not valid JSON: {}", value))?;
            let summary = open()?.act(&stream, value, actor)?;
            println!("Recorded action at {}", summary.start);
        }

        Commands::Read {
            stream,
            address,
            reversed,
            limit,
            transform,
        } => {
            let mut params = address.into_params(stream);
            params.reversed = reversed.then_some(true);
            params.limit = limit;
            params.transform = transform;
            let query = params.resolve(&resolver)?;

            let engine = open()?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for dp in Datapoints::new(engine.read(&query)?) {
                writeln!(out, "{}", serde_json::to_string(&dp?)?)?;
            }
        }

        Commands::Remove { stream, address } => {
            let query = address.into_params(stream).resolve(&resolver)?;
            let removed = open()?.remove(&query)?;
            println!("Removed {} datapoints", removed);
        }

        Commands::Length { stream, variant } => {
            println!("{}", open()?.length(&stream, variant)?);
        }

        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("failed to write {:?}", path))?;
                    println!("Wrote default config to {:?}", path);
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

/// Logs go to stderr so `read` output stays machine-readable
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("spandb={}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
