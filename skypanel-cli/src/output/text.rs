//! Plain-text output formatting.

use skypanel_core::{Post, Profile};

use super::{AccountOutput, StatsOutput, StatusOutput};

/// Longest bio shown in search results, in characters.
const BIO_PREVIEW: usize = 100;

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

fn count(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |n| n.to_string())
}

/// Text formatter.
#[derive(Debug, Default)]
pub struct TextFormatter;

impl TextFormatter {
    /// Creates a new text formatter.
    pub fn new() -> Self {
        Self
    }

    /// Renders accounts as an aligned table.
    ///
    /// Activity columns appear only when `with_activity` is set.
    pub fn format_accounts(&self, accounts: &[AccountOutput], with_activity: bool) -> String {
        if accounts.is_empty() {
            return "No accounts found.".to_string();
        }

        let handle_width = accounts
            .iter()
            .map(|a| a.handle.len() + 1)
            .max()
            .unwrap_or(0)
            .max("HANDLE".len());

        let mut lines = Vec::with_capacity(accounts.len() + 2);
        let mut header = format!("{:<handle_width$}  {:>9}", "HANDLE", "FOLLOWERS");
        if with_activity {
            header.push_str(&format!("  {:<10}  {:>9}", "LAST POST", "POSTS/DAY"));
        }
        lines.push(header);

        for account in accounts {
            let followers = count(account.followers_count);
            let mut line = format!(
                "{:<handle_width$}  {followers:>9}",
                format!("@{}", account.handle)
            );
            if with_activity {
                line.push_str(&format!(
                    "  {:<10}  {:>9}",
                    self.last_post(account),
                    account
                        .posts_per_day
                        .map_or_else(|| "-".to_string(), |r| format!("{r:.2}"))
                ));
            }
            lines.push(line.trim_end().to_string());
        }

        lines.push(String::new());
        lines.push(format!("{} account(s)", accounts.len()));
        lines.join("\n")
    }

    fn last_post(&self, account: &AccountOutput) -> String {
        match (account.last_post_at, account.days_since_post) {
            (_, Some(0)) => "today".to_string(),
            (_, Some(days)) => format!("{days}d ago"),
            (Some(at), None) => at.format("%Y-%m-%d").to_string(),
            (None, None) => "never".to_string(),
        }
    }

    /// Renders session status.
    pub fn format_status(&self, status: &StatusOutput) -> String {
        if !status.authenticated {
            return "Not authenticated. Run 'skycli login' to authenticate.".to_string();
        }

        let mut lines = vec!["Session Status".to_string(), "─".repeat(40)];
        if let Some(handle) = &status.handle {
            lines.push(format!("Handle:  @{handle}"));
        }
        if let Some(did) = &status.did {
            lines.push(format!("DID:     {did}"));
        }
        if let Some(url) = &status.service_url {
            lines.push(format!("Service: {url}"));
        }
        if let Some(expires_at) = status.expires_at {
            lines.push(format!(
                "Token:   expires {}",
                expires_at.format("%Y-%m-%d %H:%M UTC")
            ));
        }
        lines.push("Authenticated".to_string());
        lines.join("\n")
    }

    /// Renders actor search results, numbered from 1.
    pub fn format_actors(&self, query: &str, actors: &[Profile], cursor: Option<&str>) -> String {
        if actors.is_empty() {
            return format!("No users found matching query: {query}");
        }

        let mut lines = vec![format!("Search Results: {query}"), String::new()];
        for (i, actor) in actors.iter().enumerate() {
            lines.push(format!("[{}] @{}", i + 1, actor.handle));
            if let Some(name) = actor.display_name.as_deref().filter(|n| !n.is_empty()) {
                lines.push(format!("  Name: {name}"));
            }
            lines.push(format!("  DID: {}", actor.did));
            if let Some(bio) = actor.description.as_deref().filter(|b| !b.is_empty()) {
                lines.push(format!("  Bio: {}", truncate(bio, BIO_PREVIEW)));
            }
            lines.push(format!(
                "  Followers: {} | Following: {} | Posts: {}",
                count(actor.followers_count),
                count(actor.follows_count),
                count(actor.posts_count)
            ));
            lines.push(String::new());
        }
        lines.push(format!("Found {} user(s)", actors.len()));
        if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
            lines.push(format!("Next cursor: {cursor}"));
        }
        lines.join("\n")
    }

    /// Renders posts most recent first, one block per post.
    pub fn format_posts(&self, posts: &[Post], cursor: Option<&str>) -> String {
        if posts.is_empty() {
            return "No posts found.".to_string();
        }

        let mut lines = Vec::new();
        for post in posts {
            let author = post
                .author
                .as_ref()
                .map_or_else(|| "unknown".to_string(), |a| format!("@{}", a.handle));
            let when = post
                .indexed_time()
                .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M").to_string());
            lines.push(format!("{author}  {when}"));
            for text_line in post.text().lines() {
                lines.push(format!("  {text_line}"));
            }
            lines.push(format!(
                "  replies {} | reposts {} | likes {}",
                post.reply_count, post.repost_count, post.like_count
            ));
            lines.push(String::new());
        }
        lines.push(format!("{} post(s)", posts.len()));
        if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
            lines.push(format!("Next cursor: {cursor}"));
        }
        lines.join("\n")
    }

    /// Renders follower totals.
    pub fn format_stats(&self, stats: &StatsOutput) -> String {
        let mut lines = vec![format!("Total followers: {}", stats.total)];
        if let (Some(active), Some(inactive), Some(days)) =
            (stats.active, stats.inactive, stats.inactive_days)
        {
            lines.push(format!("Active: {active}"));
            lines.push(format!("Inactive: {inactive} (no post > {days} days)"));
        }
        if let (Some(since), Some(growth)) = (stats.since, stats.growth) {
            lines.push(format!("Growth since {}: +{growth}", since.format("%Y-%m-%d")));
        }
        lines.join("\n")
    }
}
