//! sitesort CLI: bulk website classification.
//!
//! Fetches each domain's landing page, extracts its text (HTML and/or OCR)
//! and asks an AI provider whether the site is Marketing, Portal or Other.

mod commands;
mod output;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
