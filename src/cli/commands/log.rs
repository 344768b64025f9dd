use crate::cli::CommandStatus;
use crate::errors::Result;
use crate::git::get_current_repository;
use crate::stack::StackStore;
use crate::utils::short_id;
use console::style;

/// Print the transaction log of the stack, newest first
pub async fn run(limit: Option<usize>) -> Result<CommandStatus> {
    let repo = get_current_repository()?;
    let store = StackStore::for_current_branch(&repo)?;
    if !store.is_initialized()? {
        return Err(crate::errors::StackError::NotInitialized(
            store.branch().to_string(),
        ));
    }

    let history = store.history()?;
    for entry in history.iter().take(limit.unwrap_or(usize::MAX)) {
        let marker = if entry.old == Some(entry.new) {
            style("(no change)").dim().to_string()
        } else {
            String::new()
        };
        println!(
            "{}  {}  {} {}",
            style(short_id(&entry.new)).yellow(),
            style(entry.time.format("%Y-%m-%d %H:%M:%S")).dim(),
            entry.reason,
            marker
        );
    }
    Ok(CommandStatus::Success)
}
