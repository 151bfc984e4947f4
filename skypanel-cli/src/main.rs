// Lint configuration for this crate
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! `SkyPanel` CLI - Bluesky follower activity from the command line.
//!
//! # Examples
//!
//! ```bash
//! # Log in with an app password
//! skycli login --handle alice.bsky.social --password xxxx-xxxx-xxxx-xxxx
//!
//! # Log in from an env file
//! skycli login --file .env
//!
//! # Followers who have not posted in 60 days
//! skycli followers --inactive 60
//!
//! # Accounts you follow posting at most once a day, as JSON
//! skycli following --quiet --threshold 1.0 --format json
//!
//! # Follower totals, activity split, and growth
//! skycli followers stats --inactive 60 --since 2025-01-01
//!
//! # Search accounts, then read the home timeline
//! skycli search users "rust lang" --limit 10
//! skycli feed --limit 20
//!
//! # Drop expired cache rows
//! skycli cache sweep
//! ```

mod app;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::{cache, feed, followers, login, search, session};

// ============================================================================
// CLI Definition
// ============================================================================

/// `SkyPanel` CLI - Bluesky follower activity.
#[derive(Parser)]
#[command(name = "skycli")]
#[command(about = "Bluesky follower activity CLI")]
#[command(long_about = r"
SkyPanel inspects the accounts around a Bluesky profile.

It finds followers who stopped posting and accounts that rarely post,
caching per-account results so repeated runs stay fast.

Examples:
  skycli login --file .env          # Log in from BLUESKY_HANDLE/BLUESKY_PASSWORD
  skycli followers --inactive 60    # Followers silent for 60+ days
  skycli following --quiet          # Follows posting <= 1/day
  skycli followers stats --since 2025-01-01
                                    # Totals and growth since a date
  skycli search users rust          # Find accounts
  skycli feed --author alice.test   # One account's recent posts
  skycli status --format json       # Session status as JSON
")]
#[command(version)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (text or json).
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Verbose output (show debug info).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Suppress log output on stderr.
    #[arg(long, global = true)]
    pub quiet_logs: bool,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Authenticate and save the session.
    Login(login::LoginArgs),

    /// Forget the saved session.
    Logout,

    /// Show session status.
    Status,

    /// List followers, optionally filtered by activity, or summarize them.
    Followers(followers::FollowersCommand),

    /// List accounts a user follows, optionally filtered by activity.
    Following(followers::FollowersArgs),

    /// Search accounts or posts.
    Search(search::SearchArgs),

    /// Show the home timeline or one account's posts.
    Feed(feed::FeedArgs),

    /// Maintain the activity cache.
    Cache(cache::CacheArgs),
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// CLI exit codes.
#[repr(i32)]
pub enum ExitCode {
    /// General error.
    Error = 1,
    /// No saved session.
    NotAuthenticated = 2,
}

// ============================================================================
// Logging Setup
// ============================================================================

fn setup_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let filter = if verbose {
        EnvFilter::new("skypanel=debug,skycli=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("skypanel=warn,skycli=info"))
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet_logs);

    let result = match &cli.command {
        Commands::Login(args) => login::run(args, &cli).await,
        Commands::Logout => session::logout(&cli).await,
        Commands::Status => session::status(&cli).await,
        Commands::Followers(cmd) => match &cmd.action {
            Some(followers::FollowersAction::Stats(args)) => followers::stats(args, &cli).await,
            None => followers::run(followers::Relation::Followers, &cmd.args, &cli).await,
        },
        Commands::Following(args) => followers::run(followers::Relation::Following, args, &cli).await,
        Commands::Search(args) => search::run(args, &cli).await,
        Commands::Feed(args) => feed::run(args, &cli).await,
        Commands::Cache(args) => cache::run(args, &cli).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        let code = if e.downcast_ref::<app::NotLoggedIn>().is_some() {
            ExitCode::NotAuthenticated
        } else {
            ExitCode::Error
        };
        std::process::exit(code as i32);
    }

    Ok(())
}
