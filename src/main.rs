use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
#[cfg(test)]
mod fakes;
mod iam;
mod pipeline;
mod provision;
mod reddit;
mod redshift;
mod s3;

use config::Config;
use iam::IamConfig;
use pipeline::ClientHandler;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = Config::from_env()?;
    let iam_config = IamConfig::load(&config.iam_config_path)?;

    let sdk = aws_config::load_from_env().await;
    let clients = ClientHandler::new(&sdk, &config);

    match pipeline::run(&config, &iam_config, &clients, chrono::Utc::now()).await {
        Ok(summary) => {
            tracing::info!(
                "ETL process completed :: {} posts :: {} :: loaded {} objects :: role {}",
                summary.posts,
                summary.object_uri,
                summary.loaded.len(),
                summary.role_arn
            );
            Ok(())
        }
        Err(err) => {
            tracing::error!("ETL process failed: {err}");
            Err(err.into())
        }
    }
}
