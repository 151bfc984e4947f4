//! Followers and following commands - list accounts, filter by activity,
//! and summarize follower counts.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};
use tracing::info;

use skypanel_core::{ActivitySample, Identity, PostRateSample, Profile, parse_timestamp};
use skypanel_fetch::{BlueskyApi, Batcher, CancellationToken, PostRateEngine, ProgressFn};
use skypanel_store::ActivityAnalyzer;

use crate::app::App;
use crate::output::{AccountOutput, JsonFormatter, StatsOutput, TextFormatter};
use crate::{Cli, OutputFormat};

/// Which side of the social graph to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Accounts following the user.
    Followers,
    /// Accounts the user follows.
    Following,
}

impl Relation {
    fn noun(self) -> &'static str {
        match self {
            Relation::Followers => "followers",
            Relation::Following => "follows",
        }
    }
}

/// The followers command: a listing by default, or a subcommand.
#[derive(Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct FollowersCommand {
    /// Optional subcommand.
    #[command(subcommand)]
    pub action: Option<FollowersAction>,

    /// Listing options when no subcommand is given.
    #[command(flatten)]
    pub args: FollowersArgs,
}

/// Followers subcommands.
#[derive(Subcommand)]
pub enum FollowersAction {
    /// Count followers, split by activity and recent growth.
    Stats(StatsArgs),
}

/// Arguments for `followers stats`.
#[derive(Args)]
pub struct StatsArgs {
    /// Account to inspect (handle or DID); defaults to the logged-in account.
    #[arg(long)]
    pub user: Option<String>,

    /// Count followers first indexed after this date (YYYY-MM-DD).
    #[arg(long)]
    pub since: Option<String>,

    /// Split followers by whether they posted in this many days.
    #[arg(long)]
    pub inactive: Option<u32>,

    /// Concurrent per-account requests (defaults to the configured value).
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Skip the activity cache.
    #[arg(long)]
    pub no_cache: bool,
}

/// Arguments shared by the followers and following commands.
#[derive(Args)]
pub struct FollowersArgs {
    /// Account to inspect (handle or DID); defaults to the logged-in account.
    #[arg(long)]
    pub user: Option<String>,

    /// Maximum accounts to fetch (0 = all).
    #[arg(long, short, default_value_t = 0)]
    pub limit: usize,

    /// Only accounts first indexed after this date (YYYY-MM-DD).
    #[arg(long)]
    pub since: Option<String>,

    /// Only accounts with no post in this many days.
    #[arg(long)]
    pub inactive: Option<u32>,

    /// Only accounts posting at or below --threshold posts per day.
    #[arg(long)]
    pub quiet: bool,

    /// Posts per day for --quiet (defaults to the configured threshold).
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Concurrent per-account requests (defaults to the configured value).
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Skip the activity cache.
    #[arg(long)]
    pub no_cache: bool,
}

/// Runs the followers or following command.
pub async fn run(relation: Relation, args: &FollowersArgs, cli: &Cli) -> Result<()> {
    let mut app = App::authenticated().await?;
    let result = list(relation, args, cli, &app).await;
    app.persist_rotated_tokens().await;
    result
}

async fn list(relation: Relation, args: &FollowersArgs, cli: &Cli, app: &App) -> Result<()> {
    let api = app.api();
    let actor = resolve_actor(args.user.as_deref(), app)?;
    let max = (args.limit > 0).then_some(args.limit);

    let mut profiles = match relation {
        Relation::Followers => api.all_followers(&actor, max).await,
        Relation::Following => api.all_follows(&actor, max).await,
    }
    .with_context(|| format!("failed to fetch {}", relation.noun()))?;
    info!(actor = %actor, count = profiles.len(), "Fetched {}", relation.noun());

    if let Some(since) = &args.since {
        let since = parse_since(since)?;
        profiles.retain(|p| indexed_after(p, since));
    }

    let batcher = interruptible_batcher(args.concurrency.unwrap_or(app.settings.concurrency));

    let ids = identities(&profiles);
    info!(count = ids.len(), "Fetching detailed profiles");
    let detailed = batcher.batch_profiles(Arc::new(api), &ids).await;

    let mut rows: Vec<AccountOutput> = profiles
        .iter()
        .map(|p| {
            let full = Identity::new(&p.did).ok().and_then(|id| detailed.get(&id));
            account_row(full.unwrap_or(p))
        })
        .collect();

    let analyzer = analyzer(app, batcher, args.no_cache)?;

    let now = app.clock.now();
    if let Some(days) = args.inactive {
        info!(days, "Checking activity status");
        let activity = analyzer.last_activity(&ids).await;
        rows = select_inactive(rows, &activity, days, now);
    }

    if args.quiet {
        let threshold = args.threshold.unwrap_or(app.settings.quiet_threshold);
        info!(threshold, "Computing post rates");
        let progress: ProgressFn = Arc::new(|done: usize, total: usize| {
            if done % 10 == 0 || done == total {
                info!("Progress: {done}/{total} accounts analyzed");
            }
        });
        let rates = analyzer.post_rates(&ids, Some(progress)).await;
        rows = select_quiet(rows, &rates, threshold, now);
        info!(count = rows.len(), "Found quiet posters");
    }

    let with_activity = args.inactive.is_some() || args.quiet;
    match cli.format {
        OutputFormat::Text => println!("{}", TextFormatter::new().format_accounts(&rows, with_activity)),
        OutputFormat::Json => println!("{}", JsonFormatter::new(cli.pretty).format(&rows)?),
    }
    Ok(())
}

/// Runs `followers stats`.
pub async fn stats(args: &StatsArgs, cli: &Cli) -> Result<()> {
    let mut app = App::authenticated().await?;
    let result = summarize(args, cli, &app).await;
    app.persist_rotated_tokens().await;
    result
}

async fn summarize(args: &StatsArgs, cli: &Cli, app: &App) -> Result<()> {
    let api = app.api();
    let actor = resolve_actor(args.user.as_deref(), app)?;
    let since = args.since.as_deref().map(parse_since).transpose()?;

    let profiles = api
        .all_followers(&actor, None)
        .await
        .context("failed to fetch followers")?;
    info!(actor = %actor, count = profiles.len(), "Fetched followers");

    let activity = match args.inactive {
        Some(days) => {
            let batcher =
                interruptible_batcher(args.concurrency.unwrap_or(app.settings.concurrency));
            let analyzer = analyzer(app, batcher, args.no_cache)?;
            info!(days, "Checking activity status");
            Some((analyzer.last_activity(&identities(&profiles)).await, days))
        }
        None => None,
    };

    let stats = tally(
        &profiles,
        activity.as_ref().map(|(map, days)| (map, *days)),
        since,
        app.clock.now(),
    );
    match cli.format {
        OutputFormat::Text => println!("{}", TextFormatter::new().format_stats(&stats)),
        OutputFormat::Json => println!("{}", JsonFormatter::new(cli.pretty).format(&stats)?),
    }
    Ok(())
}

fn resolve_actor(user: Option<&str>, app: &App) -> Result<Identity> {
    match user {
        Some(user) => Ok(Identity::new(user)?),
        None => match app.client.did() {
            Some(did) => Ok(Identity::new(did)?),
            None => bail!("no account to inspect; pass --user"),
        },
    }
}

/// A batcher cancelled by Ctrl-C.
fn interruptible_batcher(concurrency: usize) -> Batcher {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });
    Batcher::new(concurrency).with_cancellation(cancel)
}

fn analyzer(
    app: &App,
    batcher: Batcher,
    no_cache: bool,
) -> Result<ActivityAnalyzer<BlueskyApi>> {
    let engine = PostRateEngine::new(Arc::new(app.api()), Arc::clone(&app.clock));
    let analyzer = ActivityAnalyzer::new(engine, batcher)
        .with_sampling(app.settings.sample_size, app.settings.lookback_days);
    if no_cache {
        Ok(analyzer)
    } else {
        Ok(analyzer.with_cache(app.open_cache()?))
    }
}

fn identities(profiles: &[Profile]) -> Vec<Identity> {
    profiles
        .iter()
        .filter_map(|p| Identity::new(&p.did).ok())
        .collect()
}

/// Counts followers, splitting by activity when `activity` is given and
/// counting growth when `since` is given.
///
/// Accounts missing from the activity map count as inactive.
fn tally(
    profiles: &[Profile],
    activity: Option<(&HashMap<Identity, ActivitySample>, u32)>,
    since: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StatsOutput {
    let total = profiles.len();
    let inactive = activity.map(|(samples, days)| {
        profiles
            .iter()
            .filter(|p| lookup(samples, &p.did).is_none_or(|s| s.is_inactive(days, now)))
            .count()
    });

    StatsOutput {
        total,
        active: inactive.map(|n| total - n),
        inactive,
        inactive_days: activity.map(|(_, days)| days),
        since,
        growth: since.map(|since| profiles.iter().filter(|p| indexed_after(p, since)).count()),
    }
}

fn parse_since(value: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid date {value:?} (use YYYY-MM-DD)"))?;
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

fn indexed_after(profile: &Profile, since: DateTime<Utc>) -> bool {
    profile
        .indexed_at
        .as_deref()
        .and_then(|at| parse_timestamp(at).ok())
        .is_some_and(|at| at > since)
}

fn account_row(profile: &Profile) -> AccountOutput {
    AccountOutput {
        did: profile.did.clone(),
        handle: profile.handle.clone(),
        display_name: profile.display_name.clone(),
        followers_count: profile.followers_count,
        posts_count: profile.posts_count,
        last_post_at: None,
        days_since_post: None,
        posts_per_day: None,
    }
}

fn lookup<'a, T>(map: &'a HashMap<Identity, T>, did: &str) -> Option<&'a T> {
    Identity::new(did).ok().and_then(|id| map.get(&id))
}

/// Keeps accounts with no post in `days` days. Accounts whose activity
/// could not be fetched are kept too.
fn select_inactive(
    rows: Vec<AccountOutput>,
    activity: &HashMap<Identity, ActivitySample>,
    days: u32,
    now: DateTime<Utc>,
) -> Vec<AccountOutput> {
    rows.into_iter()
        .filter_map(|mut row| match lookup(activity, &row.did) {
            Some(sample) => {
                row.last_post_at = sample.last_post_at;
                row.days_since_post = sample.days_since_post(now);
                sample.is_inactive(days, now).then_some(row)
            }
            None => Some(row),
        })
        .collect()
}

/// Keeps accounts whose measured rate is at or below `threshold`.
fn select_quiet(
    rows: Vec<AccountOutput>,
    rates: &HashMap<Identity, PostRateSample>,
    threshold: f64,
    now: DateTime<Utc>,
) -> Vec<AccountOutput> {
    rows.into_iter()
        .filter_map(|mut row| {
            let rate = lookup(rates, &row.did)?;
            row.posts_per_day = Some(rate.posts_per_day);
            row.last_post_at = rate.last_post_at;
            row.days_since_post = ActivitySample::from(rate).days_since_post(now);
            rate.is_quiet(threshold).then_some(row)
        })
        .collect()
}
