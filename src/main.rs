use clap::Parser;
use tether::config::RelayConfig;
use tether::relay::RelayServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;
    let bind_addr = config.bind_addr();

    println!("   Tether Signaling Relay");
    println!("   Binding to ws://{}", bind_addr);
    println!("   Press Ctrl+C to stop\n");

    let server = RelayServer::new(&config);
    server
        .run(bind_addr, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Relay stopped");
    Ok(())
}
