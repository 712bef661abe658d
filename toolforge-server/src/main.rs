use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{BufReader, stdin, stdout};
use toolforge::Forge;
use toolforge::config::ForgeConfig;
use toolforge::telemetry::init_tracing;
use toolforge_server::{Cli, ForgeHandler, serve};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = ForgeConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config, |key| std::env::var(key).ok());
    config.validate().context("validating configuration")?;
    init_tracing(&config.logging)?;

    let forge = Forge::from_config(config).await?;
    info!(
        tools = forge.registry().list().len(),
        store = ?forge.config().store.path,
        "toolforge server listening on stdio"
    );

    serve(
        Arc::new(ForgeHandler::new(forge)),
        BufReader::new(stdin()),
        stdout(),
    )
    .await
    .context("serving stdio")?;
    info!("toolforge server stopped");
    Ok(())
}
