//! Patch stack management
//!
//! This module implements the patch stack on top of a git branch:
//! - Patch and stack state data structures
//! - Persistence of stack states under `refs/patchstack/`
//! - The push/pop merge engine
//! - Transactions moving a stack between arrangements

pub mod edit;
pub mod engine;
pub mod patch;
pub mod series;
pub mod state;
pub mod store;
pub mod transaction;

pub use edit::{new_patch, refresh_top, repair, Refreshed, RepairReport};
pub use engine::{MergeEngine, PushConflict, PushPath, PushResult};
pub use patch::Patch;
pub use state::{ConflictRecord, Partition, StackState};
pub use store::{BranchStatus, LogEntry, Publication, StackSnapshot, StackStore};
pub use transaction::{Outcome, StackTransaction, TransactionOptions};
