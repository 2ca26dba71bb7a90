//! Command line SOAP RPC caller.
//!
//! Run with: `soap-rpc-call --schema campaign.yaml --url https://... --operation get --args '[{"fields": ["Id"]}]'`

use anyhow::{Context, Result};
use clap::Parser;
use soap_rpc_client::credentials::BearerToken;
use soap_rpc_client::{ClientConfig, Invoke, ServiceSchema, SoapClient, TypeDirectory, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Call an operation of a SOAP service described by a schema file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to client configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to the service schema (YAML)
    #[arg(short, long)]
    schema: PathBuf,

    /// Service endpoint URL
    #[arg(short, long)]
    url: String,

    /// Service name used in log records
    #[arg(long, default_value = "Service")]
    service: String,

    /// Operation to call; lists operations when omitted
    #[arg(short, long)]
    operation: Option<String>,

    /// Positional arguments as a JSON array
    #[arg(short, long, default_value = "[]")]
    args: String,

    /// Bearer token sent as an Authorization header instead of a login token
    #[arg(long)]
    bearer_token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = if args.config.exists() {
        ClientConfig::from_file(&args.config).context("Failed to load config file")?
    } else {
        info!("Config file not found, using defaults");
        ClientConfig::default()
    };

    let schema = ServiceSchema::from_file(&args.schema).context("Failed to load service schema")?;
    let directory = Arc::new(TypeDirectory::new(schema));

    let mut builder = SoapClient::builder(config);
    if let Some(token) = args.bearer_token {
        builder = builder.header_signer(Arc::new(BearerToken::new(token)));
    }
    let client = builder.build();
    let service = client.service(args.service, args.url, directory);

    let Some(operation) = args.operation else {
        for name in service.operations() {
            println!("{}", name);
        }
        return Ok(());
    };

    let call_args: Vec<Value> =
        serde_json::from_str(&args.args).context("Arguments must be a JSON array")?;
    let result = service
        .invoke(&operation, &call_args)
        .with_context(|| format!("{}() failed", operation))?;

    let usage = client.usage();
    info!(
        units = usage.last_units,
        operations = usage.last_operations,
        "Call completed"
    );

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to render result")?
    );
    Ok(())
}
