//! Logout and status commands.

use anyhow::{Context, Result};

use crate::app::App;
use crate::output::{JsonFormatter, StatusOutput, TextFormatter};
use crate::{Cli, OutputFormat};
use skypanel_store::SessionStore;

/// Forgets the saved session.
pub async fn logout(cli: &Cli) -> Result<()> {
    let removed = SessionStore::with_defaults()
        .clear()
        .await
        .context("failed to clear session")?;

    match cli.format {
        OutputFormat::Text if removed => println!("Logged out."),
        OutputFormat::Text => println!("No saved session."),
        OutputFormat::Json => println!(
            "{}",
            JsonFormatter::new(cli.pretty).format(&serde_json::json!({ "loggedOut": removed }))?
        ),
    }
    Ok(())
}

/// Shows the saved session.
pub async fn status(cli: &Cli) -> Result<()> {
    let status = match App::authenticated().await {
        Ok(app) => {
            let session = app.client.session();
            StatusOutput {
                authenticated: app.client.is_authenticated(),
                handle: session.as_ref().map(|s| s.handle.clone()),
                did: session.as_ref().map(|s| s.did.clone()),
                service_url: Some(app.client.service_url().to_string()),
                expires_at: session.and_then(|s| s.expires_at),
            }
        }
        Err(e) if e.downcast_ref::<crate::app::NotLoggedIn>().is_some() => StatusOutput {
            authenticated: false,
            handle: None,
            did: None,
            service_url: None,
            expires_at: None,
        },
        Err(e) => return Err(e),
    };

    match cli.format {
        OutputFormat::Text => println!("{}", TextFormatter::new().format_status(&status)),
        OutputFormat::Json => println!("{}", JsonFormatter::new(cli.pretty).format(&status)?),
    }
    Ok(())
}
