//! Greeter server.
//!
//! Run with: `cargo run -p rivulet-greeter --bin greeter-server -- --addr 127.0.0.1:50051`

use std::sync::Arc;

use clap::Parser;
use rivulet::{Config, RpcServer};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(about = "Serve the greeter calls over TCP")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = rivulet_greeter::DEFAULT_ADDR)]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rivulet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let registry = rivulet_greeter::registry()?;
    let server = Arc::new(RpcServer::with_config(registry, Config::from_env()));

    let listener = TcpListener::bind(&args.addr).await?;
    tracing::info!(addr = %args.addr, "greeter listening");
    server.serve(listener).await?;
    Ok(())
}
