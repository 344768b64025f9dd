use crate::cli::output::{Output, PatchKind};
use crate::cli::{CheckoutArgs, CommandStatus};
use crate::errors::{Result, StackError};
use crate::git::{get_current_repository, GitRepository};
use crate::stack::series::{self, Request};
use crate::stack::{Outcome, StackState, StackStore, StackTransaction, TransactionOptions};

/// List the patches of the stack
pub async fn show(all: bool) -> Result<CommandStatus> {
    let repo = get_current_repository()?;
    let store = StackStore::for_current_branch(&repo)?;
    let state = store.load()?.state;

    let top = state.top();
    for name in state.applied() {
        let kind = if state.is_conflicted(name) {
            PatchKind::Conflicted
        } else if Some(name.as_str()) == top {
            PatchKind::Top
        } else {
            PatchKind::Applied
        };
        Output::patch_line(kind, name, state.patch(name)?.subject());
    }
    for name in state.unapplied() {
        Output::patch_line(PatchKind::Unapplied, name, state.patch(name)?.subject());
    }
    if all {
        for name in state.hidden() {
            Output::patch_line(PatchKind::Hidden, name, state.patch(name)?.subject());
        }
    }

    if let Some(conflict) = state.conflict() {
        Output::warning(format!(
            "'{}' has conflicts in {}",
            conflict.patch,
            conflict.files.join(", ")
        ));
    }
    Ok(CommandStatus::Success)
}

pub async fn push(
    names: Vec<String>,
    number: usize,
    all: bool,
    checkout: CheckoutArgs,
) -> Result<CommandStatus> {
    run_request("push", checkout, |state| {
        let number = if all { state.unapplied().len() } else { number };
        series::push(state, &names, number)
    })
}

pub async fn pop(
    names: Vec<String>,
    number: usize,
    all: bool,
    checkout: CheckoutArgs,
) -> Result<CommandStatus> {
    run_request("pop", checkout, |state| {
        let number = if all { state.applied().len() } else { number };
        series::pop(state, &names, number)
    })
}

pub async fn goto(name: String, checkout: CheckoutArgs) -> Result<CommandStatus> {
    run_request("goto", checkout, |state| series::goto(state, &name))
}

pub async fn hide(names: Vec<String>, checkout: CheckoutArgs) -> Result<CommandStatus> {
    run_request("hide", checkout, |state| series::hide(state, &names))
}

pub async fn unhide(names: Vec<String>) -> Result<CommandStatus> {
    let checkout = CheckoutArgs {
        discard_local_changes: false,
    };
    run_request("unhide", checkout, |state| series::unhide(state, &names))
}

/// Build a target from the loaded state and run it as one transaction
fn run_request<F>(reason: &str, checkout: CheckoutArgs, build: F) -> Result<CommandStatus>
where
    F: FnOnce(&StackState) -> Result<Request>,
{
    let repo = get_current_repository()?;
    let store = StackStore::for_current_branch(&repo)?;
    let snapshot = store.load()?;

    let mut transaction = StackTransaction::open(&store, snapshot, reason).with_options(
        TransactionOptions {
            discard_local_changes: checkout.discard_local_changes,
        },
    );

    let request = build(transaction.current())?;
    for name in &request.satisfied {
        Output::warning(already_satisfied(reason, name));
    }

    let target = request.target;
    transaction.set_target(target.applied, target.unapplied, target.hidden)?;
    let outcome = transaction.run()?;
    report(&store, outcome)
}

fn already_satisfied(reason: &str, name: &str) -> String {
    match reason {
        "hide" => format!("Patch '{name}' already hidden"),
        "unhide" => format!("Patch '{name}' is not hidden"),
        "push" => format!("Patch '{name}' already applied"),
        "pop" => format!("Patch '{name}' is not applied"),
        _ => format!("Nothing to do for '{name}'"),
    }
}

fn report(store: &StackStore<'_, GitRepository>, outcome: Outcome) -> Result<CommandStatus> {
    match outcome {
        Outcome::Success { state, .. } => {
            match state.top() {
                Some(top) => Output::success(format!("Now at patch '{top}'")),
                None => Output::success(format!("No patches applied on '{}'", store.branch())),
            }
            Ok(CommandStatus::Success)
        }
        Outcome::Conflict {
            patch,
            files,
            state,
        } => {
            Output::error(format!("Merge conflict while pushing '{patch}'"));
            for file in &files {
                Output::bullet(file);
            }
            if state.is_some() {
                Output::tip("Resolve the conflicts, `git add` the files and run `pstk refresh`");
            } else {
                Output::info("The transaction was discarded; the stack is unchanged");
            }
            Ok(CommandStatus::Conflict)
        }
        Outcome::Race => Err(StackError::Race {
            stack: store.branch().to_string(),
        }),
    }
}
