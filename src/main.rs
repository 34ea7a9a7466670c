//! ossctl
//!
//! Command-line front end for the OSS cluster client. Nodes and scheduling
//! come from a YAML or JSON config file; a single endpoint can be given on
//! the command line instead.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use oss_cluster_client::{
    config::BUCKET_ENV, ClientConfig, NodeConfig, ObjectHeaders, OssClient, UploadOptions,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Object storage client with multi-node failover
#[derive(Parser, Debug)]
#[command(name = "ossctl", author, version, about, long_about = None)]
struct Args {
    /// Client config file (YAML, or JSON with a .json extension)
    #[arg(long, short, env = "OSSCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Single node endpoint, used when no config file is given
    #[arg(long, env = "OSS_ENDPOINT", conflicts_with = "config")]
    endpoint: Option<String>,

    /// Bucket name, overrides the config file
    #[arg(long, env = BUCKET_ENV)]
    bucket: Option<String>,

    /// Per-operation timeout in milliseconds, overrides the config file
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file
    Upload {
        file: PathBuf,
        key: String,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        cache_control: Option<String>,
    },
    /// Download an object to a local file
    Download { key: String, destination: PathBuf },
    /// Print an object to stdout
    Cat { key: String },
    /// Print object metadata as JSON
    Stat { key: String },
    /// Print the public URL of an object
    Url { key: String },
    /// Remove an object
    Remove { key: String },
    /// Probe every node once and print its health as JSON
    Nodes,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    info!(
        version = oss_cluster_client::VERSION,
        bucket = %config.bucket,
        nodes = config.nodes.len(),
        "Starting ossctl"
    );

    let client = OssClient::new(config).context("failed to create client")?;
    let _monitor = client
        .config()
        .health_check
        .enabled
        .then(|| client.start_health_monitor());

    run(&client, args.command).await
}

async fn run(client: &OssClient, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Upload {
            file,
            key,
            content_type,
            cache_control,
        } => {
            let mut headers = ObjectHeaders::default();
            headers.content_type = content_type;
            headers.cache_control = cache_control;
            let result = client
                .upload(&file, UploadOptions::new(key).headers(headers))
                .await
                .with_context(|| format!("upload of {} failed", file.display()))?;
            match result.url {
                Some(url) => println!("{}", url),
                None => println!("{}", result.key),
            }
        }
        Command::Download { key, destination } => {
            client
                .download(&key, &destination)
                .await
                .with_context(|| format!("download of {} failed", key))?;
            println!("{}", destination.display());
        }
        Command::Cat { key } => {
            use tokio::io::AsyncWriteExt;
            let data = client.read_bytes(&key).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
        Command::Stat { key } => {
            let meta = client.stat(&key).await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        Command::Url { key } => {
            println!("{}", client.url(&key));
        }
        Command::Remove { key } => {
            client.remove(&key).await?;
        }
        Command::Nodes => {
            let reachable = client.probe_nodes().await;
            info!(reachable, "Probed nodes");
            println!("{}", serde_json::to_string_pretty(&client.node_stats())?);
        }
    }
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config = match (&args.config, &args.endpoint) {
        (Some(path), _) => ClientConfig::from_file_with_env(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        (None, Some(endpoint)) => {
            let mut config = ClientConfig::single(String::new(), NodeConfig::new(endpoint.clone()));
            config.apply_env();
            config
        }
        (None, None) => anyhow::bail!("either --config or --endpoint is required"),
    };

    if let Some(bucket) = &args.bucket {
        config.bucket = bucket.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Logs go to stderr so `cat` output stays clean
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
