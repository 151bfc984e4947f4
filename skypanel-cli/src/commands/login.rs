//! Login command - authenticate and save the session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::info;

use crate::app::App;
use crate::output::{JsonFormatter, StatusOutput};
use crate::{Cli, OutputFormat};

const HANDLE_KEY: &str = "BLUESKY_HANDLE";
const PASSWORD_KEY: &str = "BLUESKY_PASSWORD";

/// Arguments for the login command.
#[derive(Args)]
pub struct LoginArgs {
    /// Env file containing BLUESKY_HANDLE and BLUESKY_PASSWORD.
    #[arg(long, conflicts_with_all = ["handle", "password"])]
    pub file: Option<PathBuf>,

    /// Your Bluesky handle (e.g. alice.bsky.social).
    #[arg(long, short = 'u')]
    pub handle: Option<String>,

    /// An app password.
    #[arg(long, short = 'p')]
    pub password: Option<String>,

    /// Service to authenticate against (defaults to the configured service).
    #[arg(long)]
    pub service: Option<String>,
}

/// Runs the login command.
pub async fn run(args: &LoginArgs, cli: &Cli) -> Result<()> {
    let (handle, password) = credentials(args)?;

    let app = App::new(args.service.as_deref()).await?;
    let session = app
        .client
        .authenticate(&handle, &password)
        .await
        .context("login failed")?;
    app.store
        .save(&session)
        .await
        .context("failed to save session")?;
    info!(handle = %session.handle, "Logged in");

    match cli.format {
        OutputFormat::Text => println!("Logged in as @{}", session.handle),
        OutputFormat::Json => {
            let status = StatusOutput {
                authenticated: true,
                handle: Some(session.handle),
                did: Some(session.did),
                service_url: Some(session.service_url),
                expires_at: session.expires_at,
            };
            println!("{}", JsonFormatter::new(cli.pretty).format(&status)?);
        }
    }
    Ok(())
}

fn credentials(args: &LoginArgs) -> Result<(String, String)> {
    if let Some(path) = &args.file {
        let env = read_env_file(path)?;
        let Some(handle) = env.get(HANDLE_KEY).filter(|v| !v.is_empty()) else {
            bail!("{HANDLE_KEY} not found in {}", path.display());
        };
        let Some(password) = env.get(PASSWORD_KEY).filter(|v| !v.is_empty()) else {
            bail!("{PASSWORD_KEY} not found in {}", path.display());
        };
        return Ok((handle.clone(), password.clone()));
    }

    match (&args.handle, &args.password) {
        (Some(handle), Some(password)) if !handle.is_empty() && !password.is_empty() => {
            Ok((handle.clone(), password.clone()))
        }
        _ => bail!("provide --handle and --password, or --file"),
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_env(&contents))
}

/// Parses `KEY=value` lines. Blank lines, `#` comments and lines without `=`
/// are skipped; keys and values are trimmed.
fn parse_env(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}
