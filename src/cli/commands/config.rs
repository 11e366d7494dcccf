//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::GrabResult;
use crate::ui::{self, UiContext};

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> GrabResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config),
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await,
    }
}

fn show_config(config: &Config) -> GrabResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    println!(
        "# effective cache root: {}",
        ConfigManager::cache_root(config).display()
    );
    Ok(())
}

fn show_path(manager: &ConfigManager) -> GrabResult<()> {
    println!("{}", manager.path().display());
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> GrabResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;

    ui::step_ok_detail(
        &ctx,
        "Configuration initialized",
        &path.display().to_string(),
    );

    Ok(())
}
