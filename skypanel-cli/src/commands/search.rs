//! Search command - find accounts and posts.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tracing::debug;

use crate::app::App;
use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, OutputFormat};

/// Arguments for the search command.
#[derive(Args)]
pub struct SearchArgs {
    #[command(subcommand)]
    pub target: SearchTarget,
}

/// What to search.
#[derive(Subcommand)]
pub enum SearchTarget {
    /// Search accounts by handle or display name.
    Users(QueryArgs),

    /// Search posts by text.
    Posts(QueryArgs),
}

/// Query and paging options.
#[derive(Args)]
pub struct QueryArgs {
    /// Search terms.
    pub query: String,

    /// Maximum results (1-100).
    #[arg(long, short, default_value_t = 25)]
    pub limit: usize,

    /// Cursor from a previous page.
    #[arg(long, short)]
    pub cursor: Option<String>,
}

/// Runs the search command.
pub async fn run(args: &SearchArgs, cli: &Cli) -> Result<()> {
    let mut app = App::authenticated().await?;
    let result = search(args, cli, &app).await;
    app.persist_rotated_tokens().await;
    result
}

async fn search(args: &SearchArgs, cli: &Cli, app: &App) -> Result<()> {
    let api = app.api();
    let text = TextFormatter::new();
    let json = JsonFormatter::new(cli.pretty);

    match &args.target {
        SearchTarget::Users(q) => {
            debug!(query = %q.query, limit = q.limit, "Searching users");
            let page = api
                .search_actors(&q.query, q.limit, q.cursor.as_deref())
                .await
                .context("failed to search users")?;
            match cli.format {
                OutputFormat::Text => println!(
                    "{}",
                    text.format_actors(&q.query, &page.actors, page.cursor.as_deref())
                ),
                OutputFormat::Json => println!("{}", json.format(&page)?),
            }
        }
        SearchTarget::Posts(q) => {
            debug!(query = %q.query, limit = q.limit, "Searching posts");
            let page = api
                .search_posts(&q.query, q.limit, q.cursor.as_deref())
                .await
                .context("failed to search posts")?;
            match cli.format {
                OutputFormat::Text => {
                    println!("Search Results: {}", q.query);
                    println!("{}", text.format_posts(&page.posts, page.cursor.as_deref()));
                }
                OutputFormat::Json => println!("{}", json.format(&page)?),
            }
        }
    }
    Ok(())
}
