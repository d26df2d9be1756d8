//! dexpilot - Strategy, risk and execution core for a DEX trading desk

use anyhow::Result;

use dexpilot::adapters::cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (DEXPILOT__* overrides may live there)
    dotenvy::dotenv().ok();

    let app = cli::init();
    cli::execute(app).await
}
