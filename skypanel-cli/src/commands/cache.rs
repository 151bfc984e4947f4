//! Cache command - maintain the activity cache.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::app::App;
use crate::output::JsonFormatter;
use crate::{Cli, OutputFormat};

/// Arguments for the cache command.
#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands.
#[derive(Subcommand)]
pub enum CacheAction {
    /// Delete expired entries.
    Sweep,

    /// Delete every entry.
    Clear,
}

/// Runs the cache command.
pub async fn run(args: &CacheArgs, cli: &Cli) -> Result<()> {
    let app = App::new(None).await?;
    let cache = app.open_cache()?;

    let (verb, removed) = match args.action {
        CacheAction::Sweep => (
            "expired",
            cache
                .sweep_all_expired()
                .await
                .context("failed to sweep cache")?,
        ),
        CacheAction::Clear => (
            "cached",
            cache.clear_all().await.context("failed to clear cache")?,
        ),
    };

    match cli.format {
        OutputFormat::Text => println!("Removed {removed} {verb} entries."),
        OutputFormat::Json => println!(
            "{}",
            JsonFormatter::new(cli.pretty).format(&serde_json::json!({ "removed": removed }))?
        ),
    }
    Ok(())
}
