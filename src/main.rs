use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pbm_core::config::{Config, ConfigError, LoggingConfig};
use pbm_core::topology::ReplsetStatus;
use pbm_core::{decode_file, decode_units, CompressionType, IsMaster, NodeClassification, RestoreUnit};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pbm-core")]
#[command(about = "Topology classification and restore-stream decoding for MongoDB backups")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a node from its isMaster reply (extended JSON)
    Classify {
        /// Path to the isMaster document
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Summarize a replSetGetStatus reply (extended JSON)
    Status {
        /// Path to the replSetGetStatus document
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Decode a single stored backup file
    Decompress {
        /// Compression tag (none, gzip, pgzip, lz4, snappy, s2); unknown tags pass data through
        #[arg(long)]
        compression: Option<String>,
        /// Compressed input file
        #[arg(short, long)]
        input: PathBuf,
        /// Decoded output file
        #[arg(short, long)]
        output: PathBuf,
        /// Configuration supplying the default compression
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Decode a batch of stored backup files into the configured output directory
    Restore {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/restore.toml")]
        config: PathBuf,
        /// Compression tag for all files; defaults to the configured one
        #[arg(long)]
        compression: Option<String>,
        /// Files to decode
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Generate an example configuration file
    Config {
        /// Default compression written to the example
        #[arg(long, default_value = "none")]
        compression: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Classify { input } => {
            init_logging(&Config::default().logging)?;
            classify(&input)?;
        }
        Commands::Status { input } => {
            init_logging(&Config::default().logging)?;
            status(&input)?;
        }
        Commands::Decompress {
            compression,
            input,
            output,
            config,
        } => {
            let config = match config {
                Some(path) => load_config(&path)?,
                None => Config::default(),
            };
            init_logging(&config.logging)?;
            let codec = config.restore.codec_for(compression.as_deref());
            decompress_file(&input, &output, codec)?;
        }
        Commands::Restore {
            config,
            compression,
            files,
        } => {
            let config = load_config(&config)?;
            init_logging(&config.logging)?;
            let codec = config.restore.codec_for(compression.as_deref());
            restore(&config, codec, files).await?;
        }
        Commands::Config { compression, output } => {
            generate_config(&compression, &output)?;
        }
        Commands::Validate { config } => {
            validate_config(&config)?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load_from_file(path).with_context(|| format!("Failed to load config from {:?}", path))
}

fn classify(input: &Path) -> anyhow::Result<()> {
    let doc = fs::read_to_string(input).with_context(|| format!("Failed to read {:?}", input))?;
    let im = IsMaster::from_json(&doc).with_context(|| format!("Invalid isMaster document {:?}", input))?;
    let class = NodeClassification::from(&im);

    info!(set_name = %im.set_name, me = %im.me, "classified node");
    println!("{}", serde_json::to_string_pretty(&class)?);
    Ok(())
}

fn status(input: &Path) -> anyhow::Result<()> {
    let doc = fs::read_to_string(input).with_context(|| format!("Failed to read {:?}", input))?;
    let status = ReplsetStatus::from_json(&doc)
        .with_context(|| format!("Invalid replSetGetStatus document {:?}", input))?;

    println!("Replica set: {}", status.set);
    println!("  Members: {}", status.members.len());
    match status.primary() {
        Some(primary) => println!("  Primary: {}", primary.name),
        None => println!("  Primary: none"),
    }
    let secondaries = status.healthy_secondaries();
    println!("  Healthy secondaries: {}", secondaries.len());
    for (i, member) in secondaries.iter().enumerate() {
        let optime = member
            .optime
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("    {}: {} optime {}", i + 1, member.name, optime);
    }
    Ok(())
}

fn decompress_file(input: &Path, output: &Path, codec: CompressionType) -> anyhow::Result<()> {
    let unit = input.display().to_string();
    let stats = decode_file(&unit, input, codec, output)?;

    info!(codec = %codec, bytes_in = stats.bytes_in, bytes_out = stats.bytes_out, "decoded file");
    println!("{} -> {} ({} bytes, {})", input.display(), output.display(), stats.bytes_out, codec);
    Ok(())
}

async fn restore(config: &Config, codec: CompressionType, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let output_dir = PathBuf::from(&config.restore.output_dir);
    fs::create_dir_all(&output_dir).with_context(|| format!("Failed to create {:?}", output_dir))?;

    let units = files
        .into_iter()
        .map(|path| {
            let name = path.display().to_string();
            RestoreUnit::new(name, path, codec)
        })
        .collect();

    let outcomes = decode_units(units, output_dir, config.restore.max_concurrent_units).await;
    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(stats) => println!("✓ {} ({} bytes)", outcome.unit, stats.bytes_out),
            Err(e) => {
                failed += 1;
                eprintln!("✗ {}", e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} units failed to decode", failed, outcomes.len());
    }
    Ok(())
}

fn generate_config(compression: &str, output: &Path) -> anyhow::Result<()> {
    println!("Generating configuration file: {:?}", output);

    Config::create_example_config(output, compression).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  pbm-core restore --config {:?} <files>", output);

    Ok(())
}

fn validate_config(config_path: &Path) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Default compression: {}", config.restore.default_compression);
            println!("  Max concurrent units: {}", config.restore.max_concurrent_units);
            println!("  Output directory: {}", config.restore.output_dir);
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("pbm-core v{}", env!("CARGO_PKG_VERSION"));
    println!("Topology classification and restore-stream decoding for MongoDB backups");
    println!();
    println!("Supported compression: none, gzip, pgzip, lz4, snappy, s2");
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(level = %logging.level, format = %logging.format, "logging initialized");
    Ok(())
}
