use crate::cli::output::Output;
use crate::cli::CommandStatus;
use crate::errors::Result;
use crate::git::get_current_repository;
use crate::stack::{self, RepairReport, StackStore};
use crate::utils::short_id;

pub async fn run(force: bool) -> Result<CommandStatus> {
    let repo = get_current_repository()?;
    let store = StackStore::for_current_branch(&repo)?;

    match stack::repair(&store, force)? {
        RepairReport::Consistent => {
            Output::success(format!("Branch '{}' matches its stack", store.branch()));
        }
        RepairReport::Recovered => {
            Output::success("Finished the interrupted transaction");
        }
        RepairReport::Adopted(names) => {
            Output::success(format!("Adopted {} commits as patches", names.len()));
            for name in names {
                Output::bullet(name);
            }
        }
        RepairReport::Reset { previous } => {
            let previous = previous.map_or_else(|| "nothing".to_string(), |id| short_id(&id));
            Output::warning(format!(
                "Moved '{}' back to the stack head (was at {previous})",
                store.branch()
            ));
        }
    }
    Ok(CommandStatus::Success)
}
