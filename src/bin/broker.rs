use anyhow::Result;
use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use syncache::start_socket_broker;

#[derive(Parser)]
#[command(name = "syncache-broker")]
#[command(
    about = "Standalone cache-sync broker: relays cache mutation events between processes",
    version
)]
struct Cli {
    /// Address for the broker's listening endpoint
    #[arg(short, long, default_value = "127.0.0.1:43210")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let broker = start_socket_broker(&cli.addr).await?;
    println!(
        "{} Cache sync broker listening at {}",
        "✓".green(),
        format!("ws://{}/sync", cli.addr).bright_blue()
    );

    tokio::signal::ctrl_c().await?;
    broker.stop();
    println!("{}", "✓ Broker stopped".green());

    Ok(())
}
