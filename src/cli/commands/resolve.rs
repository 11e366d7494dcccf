//! Resolve command - materialize coordinates in the cache

use crate::cache::format_bytes;
use crate::cli::args::{OutputFormat, ResolveArgs};
use crate::config::Config;
use crate::coordinate::Coordinate;
use crate::error::GrabResult;
use crate::resolver::{ArtifactHandle, ArtifactOrigin, ResolveOptions, Resolver};
use crate::ui::{TaskSpinner, UiContext};
use console::style;
use std::time::Duration;
use tracing::debug;

/// Execute the resolve command
pub async fn execute(args: ResolveArgs, config: &Config) -> GrabResult<()> {
    let ctx = UiContext::detect();

    let coordinates = args
        .coordinates
        .iter()
        .map(|c| c.parse::<Coordinate>())
        .collect::<GrabResult<Vec<_>>>()?;

    let mut config = config.clone();
    if let Some(ref repository) = args.repository {
        config.repository.path = repository.clone();
    }

    let options = options_for(&args, &config);
    debug!("Resolve options: {:?}", options);

    let resolver = Resolver::from_config(&config).await?;

    let mut spinner = TaskSpinner::new(&ctx);
    if args.format == OutputFormat::Table {
        spinner.start(&format!("Resolving {} artifact(s)...", coordinates.len()));
    }

    let handles = match resolver.resolve_all(&coordinates, &options).await {
        Ok(handles) => handles,
        Err(e) => {
            spinner.stop_error("Resolution failed");
            return Err(e);
        }
    };

    match args.format {
        OutputFormat::Table => {
            let downloaded = handles
                .iter()
                .filter(|h| h.origin == ArtifactOrigin::Downloaded)
                .count();
            spinner.stop(&format!(
                "Resolved {} artifact(s), {} downloaded",
                handles.len(),
                downloaded
            ));
            print_table(&handles);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&handles)?),
        OutputFormat::Plain => {
            for handle in &handles {
                println!("{}", handle.path.display());
            }
        }
    }

    Ok(())
}

/// Config defaults with command-line overrides applied
fn options_for(args: &ResolveArgs, config: &Config) -> ResolveOptions {
    let mut options = ResolveOptions::from(config);
    if args.offline {
        options = options.offline();
    }
    if args.no_checksums {
        options = options.without_checksums();
    }
    if args.verify {
        options.verify_on_hit = true;
    }
    if let Some(secs) = args.timeout {
        options.lock_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    options
}

fn print_table(handles: &[ArtifactHandle]) {
    println!(
        "{:<50} {:<11} {:>10}  {}",
        "COORDINATE", "ORIGIN", "SIZE", "PATH"
    );
    println!("{}", "-".repeat(100));

    for handle in handles {
        let origin = match handle.origin {
            ArtifactOrigin::Downloaded => style("downloaded").green().to_string(),
            ArtifactOrigin::Cached => style("cached").dim().to_string(),
        };
        println!(
            "{:<50} {:<11} {:>10}  {}",
            handle.key.to_string(),
            origin,
            format_bytes(handle.size_bytes),
            handle.path.display()
        );
    }
}
