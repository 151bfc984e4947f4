//! Feed command - the home timeline or one author's posts.

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use skypanel_core::{Identity, Post};

use crate::app::App;
use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, OutputFormat};

/// Arguments for the feed command.
#[derive(Args)]
pub struct FeedArgs {
    /// Show this account's posts (handle or DID) instead of the home timeline.
    #[arg(long)]
    pub author: Option<String>,

    /// Maximum posts (1-100).
    #[arg(long, short, default_value_t = 25)]
    pub limit: usize,

    /// Cursor from a previous page.
    #[arg(long, short)]
    pub cursor: Option<String>,
}

/// Runs the feed command.
pub async fn run(args: &FeedArgs, cli: &Cli) -> Result<()> {
    let mut app = App::authenticated().await?;
    let result = show(args, cli, &app).await;
    app.persist_rotated_tokens().await;
    result
}

async fn show(args: &FeedArgs, cli: &Cli, app: &App) -> Result<()> {
    let api = app.api();
    let page = match &args.author {
        Some(author) => {
            let actor = Identity::new(author)?;
            debug!(actor = %actor, limit = args.limit, "Fetching author feed");
            api.get_author_feed(&actor, args.limit, args.cursor.as_deref())
                .await
                .context("failed to fetch author feed")?
        }
        None => {
            debug!(limit = args.limit, "Fetching timeline");
            api.get_timeline(args.limit, args.cursor.as_deref())
                .await
                .context("failed to fetch timeline")?
        }
    };

    match cli.format {
        OutputFormat::Text => {
            let posts: Vec<Post> = page.feed.iter().map(|item| item.post.clone()).collect();
            println!(
                "{}",
                TextFormatter::new().format_posts(&posts, page.cursor.as_deref())
            );
        }
        OutputFormat::Json => println!("{}", JsonFormatter::new(cli.pretty).format(&page)?),
    }
    Ok(())
}
