use super::constraints::ConstraintViolation;
use super::domain::{ConfigId, ResultId, TaskId};
use super::matching::Interrupted;
use super::repository::RepositoryError;

/// Failure reported by the allocation engine operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AllocationError {
    #[error("allocation config {0:?} not found")]
    ConfigNotFound(ConfigId),
    #[error("allocation config {0:?} is disabled")]
    ConfigDisabled(ConfigId),
    #[error("unknown algorithm code '{0}'")]
    UnknownAlgorithm(String),
    #[error("task {0:?} not found")]
    TaskNotFound(TaskId),
    #[error("result {0:?} not found")]
    ResultNotFound(ResultId),
    #[error("cannot {action} a task that is {from}")]
    InvalidTaskTransition { from: &'static str, action: &'static str },
    #[error("another task of config {0:?} is already queued or running")]
    ExclusiveConfigBusy(ConfigId),
    #[error("cannot {action} a result that is {from}")]
    InvalidReviewTransition { from: &'static str, action: &'static str },
    #[error("result {0:?} does not belong to the task")]
    ResultNotInTask(ResultId),
    #[error("bed {0} not found")]
    BedNotFound(String),
    #[error("student {0} not found")]
    StudentNotFound(String),
    #[error("constraint violated: {0}")]
    Constraint(#[from] ConstraintViolation),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
    #[error("matching produced an invalid plan: {0}")]
    PlanRejected(String),
}

impl AllocationError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AllocationError::ConfigNotFound(_)
                | AllocationError::TaskNotFound(_)
                | AllocationError::ResultNotFound(_)
                | AllocationError::BedNotFound(_)
                | AllocationError::StudentNotFound(_)
                | AllocationError::Repository(RepositoryError::NotFound)
        )
    }
}
