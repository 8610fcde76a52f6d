mod command;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use command::{client_command, OutputStyle};
use pinshare_core::{
    CapabilityToken, Credential, KeyAlgorithm, ServeOutcome, ShareConfig, ShareInfo,
    SingleShotServer, DEFAULT_TOKEN_BYTES,
};

#[derive(Parser, Debug)]
#[command(name = "pinshare", version, about = "Share one file, once, over key-pinned HTTPS")]
struct Cli {
    /// File to share
    file: PathBuf,

    /// Port to listen on (0 = any free port)
    #[arg(short, long, default_value_t = 0)]
    port: u16,

    /// Address to bind and advertise (default: this host's primary address)
    #[arg(short, long, conflicts_with = "interface")]
    ip: Option<IpAddr>,

    /// Bind the address of this network interface
    #[arg(long)]
    interface: Option<String>,

    /// Client command line to print
    #[arg(short, long, value_enum, default_value_t = OutputStyle::Curl)]
    output: OutputStyle,

    /// Certificate key algorithm: rsa (RSA-2048) or ecdsa (P-256, faster)
    #[arg(short, long, default_value = "rsa")]
    algorithm: KeyAlgorithm,

    /// Random bytes in the URL token; 0 disables the token
    #[arg(short, long, default_value_t = DEFAULT_TOKEN_BYTES)]
    token_bytes: usize,

    /// Stop waiting after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the share details as JSON instead of a command line
    #[arg(long)]
    json: bool,

    /// Set log level: error,warn,info,debug,trace
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Serialize)]
struct JsonShare<'a> {
    #[serde(flatten)]
    info: &'a ShareInfo,
    command: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for the command line.
    fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let bind_ip = match (&cli.ip, &cli.interface) {
        (Some(ip), _) => *ip,
        (None, Some(name)) => netinfo::interface_ip(name)?,
        (None, None) => netinfo::default_bind_ip(),
    };

    let config = ShareConfig::new(&cli.file)
        .with_bind(bind_ip, cli.port)
        .with_algorithm(cli.algorithm)
        .with_token_bytes(cli.token_bytes)
        .with_timeout(cli.timeout);
    let target = config.validate()?;
    tracing::debug!("Config: {:?}", config);

    if config.token_bytes == 0 {
        tracing::warn!("Token disabled: anyone who can reach {} can download the file", bind_ip);
    }

    println!("Generating {} certificate for {}...", config.algorithm, bind_ip);
    let host = bind_ip.to_string();
    let algorithm = config.algorithm;
    let credential = tokio::task::spawn_blocking(move || Credential::generate(&host, algorithm))
        .await
        .context("certificate generation task failed")??;
    println!("done");

    let token = CapabilityToken::generate(config.token_bytes);

    let server = SingleShotServer::new(config, target, credential, token)
        .bind()
        .await?;

    let info = server.share_info();
    let cmd = client_command(cli.output, info);
    if cli.json {
        println!("{}", serde_json::to_string(&JsonShare { info, command: cmd })?);
    } else {
        println!("{}", cmd);
    }

    println!("Waiting for the download on {} (Ctrl+C to cancel)...", server.local_addr());

    let outcome = server.serve_one(operator_interrupt()).await?;
    match &outcome {
        ServeOutcome::Completed { .. } => println!("✓ {}", outcome),
        ServeOutcome::Interrupted => println!("\nCancelled, nothing was sent."),
        _ => println!("✗ {}", outcome),
    }

    Ok(())
}

/// Resolves on Ctrl+C. If the handler cannot be installed the run just waits
/// for its one connection.
async fn operator_interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
