use thiserror::Error;
use uuid::Uuid;

/// Failures raised by a [`TaskStore`](crate::task::store::TaskStore) backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Task {0} not found")]
    NotFound(Uuid),

    #[error("Concurrent update on task {id}: expected version {expected}, found {actual}")]
    Conflict {
        id: Uuid,
        expected: u64,
        actual: u64,
    },

    /// The record already reached Completed or Failed
    #[error("Task {0} is already finished")]
    Terminal(Uuid),

    #[error("Task {0} has not been claimed")]
    NotClaimed(Uuid),

    #[error("Store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// An ownership query ran before `Membership::init`
    #[error("Membership is not initialized")]
    NotInitialized,

    #[error("Membership is already initialized")]
    AlreadyInitialized,

    #[error("Hash ring has no servers")]
    EmptyRing,

    #[error("Unknown task action: {0}")]
    UnknownAction(String),

    #[error("Invalid target application: {0}")]
    InvalidTarget(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Action handler error: {0}")]
    ActionHandler(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

impl DispatchError {
    pub fn config(msg: impl Into<String>) -> Self {
        DispatchError::Config(msg.into())
    }

    pub fn invalid_target(msg: impl Into<String>) -> Self {
        DispatchError::InvalidTarget(msg.into())
    }

    /// Ownership-level errors make a whole poll pass meaningless, unlike a
    /// single record's store or handler failure.
    pub fn is_ownership_error(&self) -> bool {
        matches!(self, DispatchError::NotInitialized | DispatchError::EmptyRing)
    }
}

impl From<anyhow::Error> for DispatchError {
    fn from(e: anyhow::Error) -> Self {
        DispatchError::ActionHandler(format!("{:#}", e))
    }
}
