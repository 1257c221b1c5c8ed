use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, RetryError>;

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store error: {0}")]
    Store(String),
    #[error("claim conflict: {0}")]
    ClaimConflict(String),
    #[error("retry policy {0} not found")]
    PolicyNotFound(Uuid),
    #[error("retry schedule {0} not found")]
    ScheduleNotFound(Uuid),
    #[error("retry attempt {0} not found")]
    AttemptNotFound(Uuid),
    #[error("retry job {0} not found")]
    JobNotFound(Uuid),
    #[error("retry schedule {0} is already resolved")]
    AlreadyResolved(Uuid),
    #[error("payment execution error: {0}")]
    Execution(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unrecognised {kind} value: {value}")]
    InvalidValue { kind: &'static str, value: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RetryError {
    pub fn code(&self) -> &'static str {
        match self {
            RetryError::Database(_) | RetryError::Store(_) => "PERSISTENCE_ERROR",
            RetryError::ClaimConflict(_) => "CLAIM_CONFLICT",
            RetryError::PolicyNotFound(_) => "POLICY_NOT_FOUND",
            RetryError::ScheduleNotFound(_) => "SCHEDULE_NOT_FOUND",
            RetryError::AttemptNotFound(_) => "ATTEMPT_NOT_FOUND",
            RetryError::JobNotFound(_) => "JOB_NOT_FOUND",
            RetryError::AlreadyResolved(_) => "ALREADY_RESOLVED",
            RetryError::Execution(_) => "EXECUTION_ERROR",
            RetryError::InvalidRequest(_) | RetryError::InvalidValue { .. } => "INVALID_REQUEST",
            RetryError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Maps a Postgres `lock_not_available` failure onto `ClaimConflict`.
    pub fn from_lock_error(err: sqlx::Error) -> Self {
        let is_lock_conflict = err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == "55P03");
        if is_lock_conflict {
            RetryError::ClaimConflict(err.to_string())
        } else {
            RetryError::Database(err)
        }
    }
}
