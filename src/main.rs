use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use roomrelay::cli::Cli;
use roomrelay::relay::RelayServer;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    println!("   Room Relay");
    println!("   Binding to {}", cli.listen_addr());
    println!("   Press Ctrl+C to stop\n");

    let server = RelayServer::bind(cli.listen_addr()).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to install ctrl-c handler");
            }
        })
        .await
}
