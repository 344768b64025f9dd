use crate::cli::output::Output;
use crate::cli::CommandStatus;
use crate::errors::Result;
use crate::git::get_current_repository;
use crate::stack::{self, StackStore};
use crate::utils::short_id;

/// Create a new empty patch on top of the stack
pub async fn new(name: Option<String>, message: String) -> Result<CommandStatus> {
    let repo = get_current_repository()?;
    let store = StackStore::for_current_branch(&repo)?;

    let patch = stack::new_patch(&store, name.as_deref(), &message)?;
    Output::success(format!("Now at patch '{}'", patch.name));
    Ok(CommandStatus::Success)
}

/// Record the working tree changes in the top patch
pub async fn refresh(message: Option<String>) -> Result<CommandStatus> {
    let repo = get_current_repository()?;
    let store = StackStore::for_current_branch(&repo)?;

    let refreshed = stack::refresh_top(&store, message.as_deref())?;
    if refreshed.resolved_conflict {
        Output::success(format!(
            "Conflict in '{}' resolved",
            refreshed.patch.name
        ));
    }
    Output::success(format!(
        "Refreshed '{}' ({})",
        refreshed.patch.name,
        short_id(&refreshed.patch.commit_id)
    ));
    if refreshed.patch.is_empty {
        Output::sub_item("The patch is empty");
    }
    Ok(CommandStatus::Success)
}
