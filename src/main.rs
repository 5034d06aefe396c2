/// Main entry point for the MCP relay
///
/// This file sets up logging, parses command line arguments, registers the
/// weather demonstration capabilities and starts the relay. Clients open an
/// event stream, post requests to the endpoint it announces, and receive the
/// responses on the stream.

use clap::Parser;
use tracing::info;

use mcp_relay::tools::weather_registry;
use mcp_relay::{RelayConfig, RelayServer};

/// Command line arguments for the MCP relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    relay: RelayConfig,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable verbose output (implies debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Set up logging based on command line flags; RUST_LOG takes precedence
    let log_level = if args.verbose {
        "debug"
    } else if args.debug {
        "info"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("mcp_relay={},tower_http={}", log_level, log_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting MCP relay");

    let registry = weather_registry()?;
    let server = RelayServer::new(args.relay, registry).await?;
    server.run().await?;

    info!("MCP relay shutdown complete");
    Ok(())
}
