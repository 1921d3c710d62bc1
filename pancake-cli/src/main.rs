mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::compile::OutputFormat;
use pancake::config::{default_config_dir, Config, ObservabilityConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "pancake")]
#[command(about = "Pancake - Elasticsearch aggregations to ClickHouse SQL")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.pancake/config.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a search request body to SQL
    Compile {
        /// JSON request file, or "-" for stdin
        #[arg(short, long)]
        request: PathBuf,

        /// YAML schema file or directory of schemas
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Table to compile against (picks the schema from a directory)
        #[arg(short, long)]
        table: Option<String>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Load and lint a schema file or directory
    CheckSchema {
        path: PathBuf,
    },

    /// Write a default config file
    InitConfig {
        /// Target path (default: ~/.pancake/config.toml)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&observability.log_level));
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| observability.log_format.clone());

    // logs go to stderr so SQL on stdout stays pipeable
    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    init_tracing(&config.observability);

    match cli.command {
        Commands::Compile {
            request,
            schema,
            table,
            format,
        } => {
            commands::compile::run_compile(&config, &request, schema.as_deref(), table.as_deref(), format)?;
        }
        Commands::CheckSchema { path } => {
            commands::schema::run_check_schema(&path)?;
        }
        Commands::InitConfig { path, force } => {
            let path = path.unwrap_or_else(|| default_config_dir().join("config.toml"));
            commands::init::run_init_config(&path, force)?;
        }
    }

    Ok(())
}
