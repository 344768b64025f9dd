/// How a caller should treat a [`StackError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reload the stack state and try again
    Retryable,
    /// The repository is usable, but the request was not carried out
    Soft,
    /// The command cannot continue
    Fatal,
}

/// Patchstack Error Types
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    /// Target references a patch that does not exist in the stack
    #[error("Unknown patch: {0}")]
    UnknownPatch(String),

    /// Target lists a patch more than once
    #[error("Duplicate patch: {0}")]
    DuplicatePatch(String),

    /// Target drops patches that exist in the stack
    #[error("Target is missing patches: {}", .0.join(", "))]
    IncompleteTarget(Vec<String>),

    /// Another transaction holds the stack lock
    #[error("Stack is locked: {0}")]
    LockContention(String),

    /// The stack ref moved while the transaction was running
    #[error("Stack '{stack}' was updated concurrently")]
    Race { stack: String },

    /// The working tree has local changes that a checkout would clobber
    #[error("Local changes in the working tree: {}", .0.join(", "))]
    DirtyWorkingTree(Vec<String>),

    /// Object id does not resolve in the object store
    #[error("Unknown object: {0}")]
    UnknownObject(String),

    /// Git-related errors
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// Unexpected backend failures
    #[error("Backend error: {0}")]
    Backend(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// The branch has no patch stack yet
    #[error("Branch '{0}' is not initialized; run `pstk init`")]
    NotInitialized(String),
}

impl StackError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        StackError::Config(msg.into())
    }

    pub fn backend<S: Into<String>>(msg: S) -> Self {
        StackError::Backend(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        StackError::Validation(msg.into())
    }

    pub fn unknown_patch<S: Into<String>>(name: S) -> Self {
        StackError::UnknownPatch(name.into())
    }

    pub fn lock_contention<S: Into<String>>(msg: S) -> Self {
        StackError::LockContention(msg.into())
    }

    /// Classify the error for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StackError::LockContention(_) | StackError::Race { .. } => ErrorKind::Retryable,
            StackError::UnknownPatch(_)
            | StackError::DuplicatePatch(_)
            | StackError::IncompleteTarget(_)
            | StackError::DirtyWorkingTree(_)
            | StackError::Validation(_)
            | StackError::NotInitialized(_) => ErrorKind::Soft,
            StackError::UnknownObject(_)
            | StackError::Git(_)
            | StackError::Backend(_)
            | StackError::Io(_)
            | StackError::Json(_)
            | StackError::Config(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
