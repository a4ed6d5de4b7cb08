use crate::plan::PlanningError;
use crate::state::GroupStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Atomic replace failed: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("Snapshots are not comparable: key scheme '{previous}' vs '{current}'")]
    IncomparableSnapshots { previous: String, current: String },

    #[error("Group '{group}' cannot move from {from} to {to}")]
    InvalidTransition {
        group: String,
        from: GroupStatus,
        to: GroupStatus,
    },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
