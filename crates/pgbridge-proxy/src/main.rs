//! pgbridge proxy
//!
//! Entry point: parse the CLI, load rewrite rules, connect the downstream
//! executor, and run the PostgreSQL wire protocol listener until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use pgbridge_common::config::{load_rewrites, ProxyOptions, TextFormat};
use pgbridge_proxy::executor::remote::{RemoteExecutor, DEFAULT_ENDPOINT};
use pgbridge_proxy::pg_wire::ProxyServer;
use pgbridge_proxy::telemetry;

#[derive(Parser, Debug)]
#[command(name = "pgbridge-proxy")]
#[command(about = "PostgreSQL wire protocol proxy for a managed SQL backend")]
struct Args {
    /// GCP project id
    #[arg(short = 'p', long)]
    project: String,

    /// Instance id
    #[arg(short = 'i', long)]
    instance: String,

    /// Database id
    #[arg(short = 'd', long)]
    database: String,

    /// Path to the credentials file
    #[arg(short = 'c', long)]
    credentials: PathBuf,

    /// Listening port for PostgreSQL clients
    #[arg(short = 's', long, default_value = "5432")]
    port: u16,

    /// Require a (never validated) password exchange during startup
    #[arg(short = 'a', long)]
    auth: bool,

    /// Translate psql meta-command catalog queries
    #[arg(short = 'q', long)]
    psql: bool,

    /// Text rendering for format-code-0 columns
    #[arg(short = 'f', long, default_value = "POSTGRESQL")]
    format: String,

    /// Answer in binary when a Bind carries no result-format codes
    #[arg(short = 'b', long)]
    binary: bool,

    /// Path to a rewrite rules JSON file
    #[arg(short = 'j', long)]
    rewrites: Option<PathBuf>,

    /// Downstream executor endpoint
    #[arg(long, env = "PGBRIDGE_EXECUTOR_ADDR", default_value = DEFAULT_ENDPOINT)]
    executor: String,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    telemetry::init(&args.log_level)?;

    let text_format: TextFormat = args.format.parse()?;
    let rewrites = match &args.rewrites {
        Some(path) => load_rewrites(path)?,
        None => Vec::new(),
    };

    let options = ProxyOptions {
        project: args.project,
        instance: args.instance,
        database: args.database,
        credentials: args.credentials,
        port: args.port,
        auth_required: args.auth,
        psql_mode: args.psql,
        force_binary: args.binary,
        text_format,
        rewrites,
        ..Default::default()
    };

    info!(database = %options.connection_string(), "starting pgbridge proxy");
    info!("  port: {}", options.port);
    info!("  text format: {:?}", options.text_format);
    info!("  authentication: {}", options.auth_required);
    info!("  psql mode: {}", options.psql_mode);
    info!("  executor endpoint: {}", args.executor);

    let executor = Arc::new(RemoteExecutor::from_options(&options, args.executor)?);
    let port = options.port;
    let server = ProxyServer::new(options, executor)?;

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    server.serve(listener).await?;
    Ok(())
}
