use crate::cli::output::Output;
use crate::cli::{CommandStatus, ConfigAction};
use crate::config::{get_repo_config_dir, load_settings, Settings};
use crate::errors::Result;
use crate::git::{get_current_repository, VcsBackend};
use std::path::Path;

/// Handle configuration commands
pub async fn run(action: ConfigAction) -> Result<CommandStatus> {
    let repo = get_current_repository()?;
    let git_dir = repo.git_dir();
    let config_file = get_repo_config_dir(git_dir).join("config.json");

    match action {
        ConfigAction::Set { key, value } => set_config_value(&config_file, &key, &value).await?,
        ConfigAction::Get { key } => get_config_value(git_dir, &key).await?,
        ConfigAction::List => list_config_values(git_dir).await?,
    }
    Ok(CommandStatus::Success)
}

/// Writes go to the repository file only; the global file is left alone
async fn set_config_value(config_file: &Path, key: &str, value: &str) -> Result<()> {
    let mut settings = Settings::load_from_file(config_file)?;
    settings.set_value(key, value)?;
    settings.save_to_file(config_file)?;

    Output::success(format!("Configuration updated: {key} = {value}"));
    if key == "transaction.conflict_policy" && value == "abort" {
        Output::sub_item("Conflicting pushes will now leave the stack unchanged");
    }
    Ok(())
}

async fn get_config_value(git_dir: &Path, key: &str) -> Result<()> {
    let settings = load_settings(git_dir)?;
    println!("{}", settings.get_value(key)?);
    Ok(())
}

async fn list_config_values(git_dir: &Path) -> Result<()> {
    let settings = load_settings(git_dir)?;

    Output::section("Configuration");
    for (key, value) in settings.entries() {
        Output::bullet(format!("{key} = {value}"));
    }
    Ok(())
}
