use crate::cli::output::Output;
use crate::cli::CommandStatus;
use crate::config::{ensure_config_dir, get_repo_config_dir};
use crate::errors::Result;
use crate::git::{get_current_repository, VcsBackend};
use crate::stack::StackStore;
use crate::utils::short_id;

/// Start a stack on the current branch
pub async fn run() -> Result<CommandStatus> {
    let repo = get_current_repository()?;
    ensure_config_dir(&get_repo_config_dir(repo.git_dir()))?;

    let store = StackStore::for_current_branch(&repo)?;
    let snapshot = store.init()?;

    Output::success(format!(
        "Initialized patch stack on '{}' at {}",
        store.branch(),
        short_id(&snapshot.state.base())
    ));
    Output::tip("Create a patch with `pstk new -m \"message\"`");
    Ok(CommandStatus::Success)
}
