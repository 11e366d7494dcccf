//! Cache command - inspect and maintain the artifact cache

use crate::cache::{format_bytes, CacheEntry, CacheStore};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::coordinate::CoordinateKey;
use crate::error::{GrabError, GrabResult};
use crate::resolver::Resolver;
use crate::ui::{self, TaskSpinner, UiContext};
use console::style;
use std::time::Duration;
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> GrabResult<()> {
    let ctx = UiContext::detect();

    match args.action {
        CacheAction::List { format, older_than } => {
            list_entries(config, format, older_than).await
        }
        CacheAction::Path => {
            println!("{}", ConfigManager::cache_root(config).display());
            Ok(())
        }
        CacheAction::Verify { remove } => verify_entries(&ctx, config, remove).await,
        CacheAction::Remove { coordinate } => remove_entry(&ctx, config, &coordinate).await,
        CacheAction::Clean { hours } => clean_staging(&ctx, config, hours).await,
        CacheAction::Clear { yes } => clear_entries(&ctx.with_auto_yes(yes), config).await,
    }
}

/// List all cached artifacts
async fn list_entries(
    config: &Config,
    format: OutputFormat,
    older_than: Option<u32>,
) -> GrabResult<()> {
    // Listing never creates the cache root
    let store = CacheStore::new(ConfigManager::cache_root(config));
    let mut entries = store.list().await?;
    if let Some(days) = older_than {
        entries.retain(|e| e.is_older_than_days(days));
    }

    match format {
        OutputFormat::Table => print_entry_table(&entries),
        OutputFormat::Json => print_entry_json(&entries)?,
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.path.display());
            }
        }
    }

    Ok(())
}

fn print_entry_table(entries: &[CacheEntry]) {
    if entries.is_empty() {
        println!("No cached artifacts.");
        return;
    }

    println!(
        "{:<50} {:>10} {:<14} {:<16}",
        "COORDINATE", "SIZE", "DIGEST", "CACHED"
    );
    println!("{}", "-".repeat(94));

    let mut total = 0;
    for entry in entries {
        let size = entry.size_bytes.unwrap_or_default();
        total += size;
        let digest = entry
            .digest
            .as_ref()
            .map(|d| d.short().to_string())
            .unwrap_or_else(|| "-".to_string());
        let cached = entry
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<50} {:>10} {:<14} {:<16}",
            entry.key.to_string(),
            format_bytes(size),
            digest,
            cached
        );
    }

    println!();
    println!(
        "Total: {} artifact(s), {}",
        entries.len(),
        format_bytes(total)
    );
}

fn print_entry_json(entries: &[CacheEntry]) -> GrabResult<()> {
    #[derive(serde::Serialize)]
    struct EntryJson {
        coordinate: String,
        path: String,
        state: String,
        size_bytes: Option<u64>,
        digest: Option<String>,
        created_at: Option<String>,
    }

    let json_entries: Vec<EntryJson> = entries
        .iter()
        .map(|e| EntryJson {
            coordinate: e.key.to_string(),
            path: e.path.display().to_string(),
            state: e.state.to_string(),
            size_bytes: e.size_bytes,
            digest: e.digest.as_ref().map(ToString::to_string),
            created_at: e.created_at.map(|t| t.to_rfc3339()),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json_entries)?);
    Ok(())
}

/// Re-hash every artifact against its recorded digest
async fn verify_entries(ctx: &UiContext, config: &Config, remove: bool) -> GrabResult<()> {
    let resolver = Resolver::from_config(config).await?;
    let entries = resolver.store().list().await?;

    if entries.is_empty() {
        println!("No cached artifacts.");
        return Ok(());
    }

    let mut spinner = TaskSpinner::new(ctx);
    spinner.start(&format!("Verifying {} artifact(s)...", entries.len()));

    let mut failed = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        spinner.message(&format!("Verifying {}/{}: {}", index + 1, entries.len(), entry.key));
        if !resolver.store().verify_entry(entry).await? {
            failed.push(entry);
        }
    }

    if failed.is_empty() {
        spinner.stop(&format!("All {} artifact(s) match their digests", entries.len()));
        return Ok(());
    }

    spinner.stop_error(&format!("{} artifact(s) failed verification", failed.len()));
    for entry in &failed {
        if remove {
            resolver.invalidate(&entry.key).await?;
            ui::step_ok_detail(ctx, &entry.key.to_string(), "removed");
        } else {
            ui::step_error_detail(ctx, &entry.key.to_string(), "digest mismatch");
        }
    }

    if remove {
        return Ok(());
    }
    ui::remark(ctx, "Run with --remove to delete them; they are refetched on next resolve");
    Err(GrabError::User(format!(
        "{} cached artifact(s) are corrupt",
        failed.len()
    )))
}

/// Remove one cached artifact
async fn remove_entry(ctx: &UiContext, config: &Config, coordinate: &str) -> GrabResult<()> {
    let key = CoordinateKey::parse(coordinate)?;
    let resolver = Resolver::from_config(config).await?;

    if resolver.invalidate(&key).await? {
        ui::step_ok(ctx, &format!("Removed {}", key));
    } else {
        ui::step_warn(ctx, &format!("{} is not cached", key));
    }
    Ok(())
}

/// Remove staging files orphaned by crashed processes
async fn clean_staging(ctx: &UiContext, config: &Config, hours: Option<u32>) -> GrabResult<()> {
    let hours = hours.unwrap_or(config.cache.staging_max_age_hours);
    let store = CacheStore::new(ConfigManager::cache_root(config));

    let removed = store
        .clean_staging(Duration::from_secs(u64::from(hours) * 3600))
        .await?;

    for path in &removed {
        debug!("Removed {}", path.display());
    }

    if removed.is_empty() {
        ui::step_ok(ctx, &format!("No staging files older than {} hour(s)", hours));
    } else {
        ui::step_ok(ctx, &format!("Removed {} stale staging file(s)", removed.len()));
    }
    Ok(())
}

/// Remove every cached artifact
async fn clear_entries(ctx: &UiContext, config: &Config) -> GrabResult<()> {
    let resolver = Resolver::from_config(config).await?;
    let entries = resolver.store().list().await?;

    if entries.is_empty() {
        println!("No cached artifacts to clear.");
        return Ok(());
    }

    println!("This will remove {} cached artifact(s):", entries.len());
    for entry in &entries {
        println!("  {} {}", style("•").red(), entry.key);
    }
    println!();

    if !ui::confirm(ctx, "Are you sure?", false).await? {
        println!("Aborted.");
        return Ok(());
    }

    let removed = resolver.clear().await?;
    ui::outro_success(ctx, &format!("Cleared {} artifact(s)", removed));
    Ok(())
}
