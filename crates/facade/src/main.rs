mod config;

use clap::Parser;
use env_logger::Env;
use log::{info, warn};

use crate::config::{Args, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(filter) = &args.log_level {
        logger.parse_filters(filter);
    }
    logger.init();

    let config = Config::load(args)?;
    let usernames: Vec<&str> = config.users().iter().map(|u| u.username.as_str()).collect();
    info!("Auth usernames: {:?}", usernames);

    let server = socks::SocksServer::bind(config.server_config()).await?;
    server
        .serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    Ok(())
}
