//! Target arrangements for the stack commands.
//!
//! Each function takes the current state and a request and returns the
//! partition a transaction should reach. They only rearrange names; the
//! transaction decides which pops and pushes that takes.

use super::state::{Partition, StackState};
use crate::errors::{StackError, Result};
use std::collections::HashSet;

/// A target plus the requested names that needed no change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub target: Partition,
    /// Names already in the requested place, dropped from the request
    pub satisfied: Vec<String>,
}

fn check_known(state: &StackState, names: &[String]) -> Result<()> {
    match names.iter().find(|name| !state.contains(name)) {
        Some(name) => Err(StackError::unknown_patch(name.clone())),
        None => Ok(()),
    }
}

fn without(list: &[String], removed: &HashSet<&str>) -> Vec<String> {
    list.iter()
        .filter(|name| !removed.contains(name.as_str()))
        .cloned()
        .collect()
}

/// `names` with repeats dropped, first occurrence kept
fn unique(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

/// Move `names` to the hidden set, popping them first if applied
pub fn hide(state: &StackState, names: &[String]) -> Result<Request> {
    check_known(state, names)?;

    let (satisfied, patches): (Vec<String>, Vec<String>) = unique(names)
        .into_iter()
        .partition(|name| state.hidden().contains(name));
    let moved: HashSet<&str> = patches.iter().map(String::as_str).collect();

    let mut hidden = patches.clone();
    hidden.extend(state.hidden().iter().cloned());

    Ok(Request {
        target: Partition {
            applied: without(state.applied(), &moved),
            unapplied: without(state.unapplied(), &moved),
            hidden,
        },
        satisfied,
    })
}

/// Move hidden `names` back to the end of the unapplied set
pub fn unhide(state: &StackState, names: &[String]) -> Result<Request> {
    check_known(state, names)?;

    let (patches, satisfied): (Vec<String>, Vec<String>) = unique(names)
        .into_iter()
        .partition(|name| state.hidden().contains(name));
    let moved: HashSet<&str> = patches.iter().map(String::as_str).collect();

    let mut unapplied = state.unapplied().to_vec();
    unapplied.extend(patches.iter().cloned());

    Ok(Request {
        target: Partition {
            applied: state.applied().to_vec(),
            unapplied,
            hidden: without(state.hidden(), &moved),
        },
        satisfied,
    })
}

/// Push `names` in the given order, or the next `count` unapplied patches
pub fn push(state: &StackState, names: &[String], count: usize) -> Result<Request> {
    check_known(state, names)?;

    let patches: Vec<String> = if names.is_empty() {
        state.unapplied().iter().take(count).cloned().collect()
    } else {
        names.to_vec()
    };
    if patches.is_empty() {
        return Err(StackError::validation("No unapplied patches to push"));
    }

    let mut satisfied = Vec::new();
    let mut to_push = Vec::new();
    for name in patches {
        if state.applied().contains(&name) {
            satisfied.push(name);
        } else if state.hidden().contains(&name) {
            return Err(StackError::validation(format!(
                "Patch '{name}' is hidden; unhide it first"
            )));
        } else if !to_push.contains(&name) {
            to_push.push(name);
        }
    }

    let moved: HashSet<&str> = to_push.iter().map(String::as_str).collect();
    let mut applied = state.applied().to_vec();
    applied.extend(to_push.iter().cloned());

    Ok(Request {
        target: Partition {
            applied,
            unapplied: without(state.unapplied(), &moved),
            hidden: state.hidden().to_vec(),
        },
        satisfied,
    })
}

/// Pop `names`, or the top `count` applied patches. Patches above a popped
/// one stay applied and are pushed again.
pub fn pop(state: &StackState, names: &[String], count: usize) -> Result<Request> {
    check_known(state, names)?;

    let patches: Vec<String> = if names.is_empty() {
        let keep = state.applied().len().saturating_sub(count);
        state.applied()[keep..].to_vec()
    } else {
        unique(names)
    };
    if state.applied().is_empty() {
        return Err(StackError::validation("No patches applied"));
    }

    let (to_pop, satisfied): (Vec<String>, Vec<String>) = patches
        .into_iter()
        .partition(|name| state.applied().contains(name));
    let moved: HashSet<&str> = to_pop.iter().map(String::as_str).collect();

    // Popped patches go to the front of the unapplied set, in stack order
    let mut unapplied: Vec<String> = state
        .applied()
        .iter()
        .filter(|name| moved.contains(name.as_str()))
        .cloned()
        .collect();
    unapplied.extend(state.unapplied().iter().cloned());

    Ok(Request {
        target: Partition {
            applied: without(state.applied(), &moved),
            unapplied,
            hidden: state.hidden().to_vec(),
        },
        satisfied,
    })
}

/// Make `name` the top patch, pushing or popping whatever is in between
pub fn goto(state: &StackState, name: &str) -> Result<Request> {
    if !state.contains(name) {
        return Err(StackError::unknown_patch(name));
    }
    if state.hidden().iter().any(|n| n == name) {
        return Err(StackError::validation(format!(
            "Patch '{name}' is hidden; unhide it first"
        )));
    }

    let applied = state.applied();
    let unapplied = state.unapplied();

    let target = if let Some(pos) = applied.iter().position(|n| n == name) {
        let mut new_unapplied = applied[pos + 1..].to_vec();
        new_unapplied.extend(unapplied.iter().cloned());
        Partition {
            applied: applied[..=pos].to_vec(),
            unapplied: new_unapplied,
            hidden: state.hidden().to_vec(),
        }
    } else {
        let pos = unapplied
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| StackError::unknown_patch(name))?;
        let mut new_applied = applied.to_vec();
        new_applied.extend(unapplied[..=pos].iter().cloned());
        Partition {
            applied: new_applied,
            unapplied: unapplied[pos + 1..].to_vec(),
            hidden: state.hidden().to_vec(),
        }
    };

    Ok(Request {
        target,
        satisfied: Vec::new(),
    })
}
