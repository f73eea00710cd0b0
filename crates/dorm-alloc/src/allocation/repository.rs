use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::domain::{
    AllocationConfig, AllocationTask, AssignmentResult, Bed, BedId, ConfigId, PopulationScope,
    ResultId, RoomId, Student, StudentId, TaskId, TaskStatus,
};

/// Read access to allocation configs.
pub trait ConfigProvider: Send + Sync {
    fn get_config(&self, id: &ConfigId) -> Result<Option<AllocationConfig>, RepositoryError>;
}

/// Read access to the student and bed population.
pub trait PopulationProvider: Send + Sync {
    /// Enrolled students in scope that do not currently hold a bed.
    fn eligible_students(&self, scope: &PopulationScope) -> Result<Vec<Student>, RepositoryError>;
    /// Beds in scope, whatever their status. Callers decide what is usable.
    fn list_beds(&self, scope: &PopulationScope) -> Result<Vec<Bed>, RepositoryError>;
    fn student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError>;
    fn bed(&self, id: &BedId) -> Result<Option<Bed>, RepositoryError>;
    fn room_beds(&self, room: &RoomId) -> Result<Vec<Bed>, RepositoryError>;
}

/// Task persistence with status compare-and-set.
pub trait TaskStore: Send + Sync {
    fn insert_task(&self, task: AllocationTask) -> Result<AllocationTask, RepositoryError>;
    fn fetch_task(&self, id: &TaskId) -> Result<Option<AllocationTask>, RepositoryError>;
    fn list_tasks(&self) -> Result<Vec<AllocationTask>, RepositoryError>;
    /// Replaces the stored task only when its current status is one of `expected`.
    fn compare_and_set(
        &self,
        id: &TaskId,
        expected: &[TaskStatus],
        task: AllocationTask,
    ) -> Result<AllocationTask, RepositoryError>;
    /// Records progress; percentages lower than the stored value are ignored.
    fn update_progress(&self, id: &TaskId, progress: u8) -> Result<(), RepositoryError>;
    /// Queued or running tasks that belong to the config.
    fn active_for_config(&self, config: &ConfigId) -> Result<Vec<TaskId>, RepositoryError>;
}

/// Handle to a staged, not yet visible, batch of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub u64);

/// Outcome of publishing a staged run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitReport {
    pub committed: usize,
    /// Students whose staged bed was taken by someone else before the commit.
    pub conflicts: Vec<StudentId>,
}

/// Result persistence. Staged rows stay invisible until `commit` publishes them at once.
pub trait ResultStore: Send + Sync {
    fn begin_run(&self, task: &TaskId) -> Result<RunId, RepositoryError>;
    fn stage(&self, run: RunId, rows: Vec<AssignmentResult>) -> Result<(), RepositoryError>;
    fn rollback(&self, run: RunId) -> Result<(), RepositoryError>;
    /// Publishes the run and marks its beds occupied in one step.
    fn commit(&self, run: RunId) -> Result<CommitReport, RepositoryError>;

    fn results_for_task(&self, task: &TaskId) -> Result<Vec<AssignmentResult>, RepositoryError>;
    fn result(&self, id: &ResultId) -> Result<Option<AssignmentResult>, RepositoryError>;
    fn active_result_for_student(
        &self,
        student: &StudentId,
    ) -> Result<Option<AssignmentResult>, RepositoryError>;
    /// Results that still hold a bed in the room.
    fn results_in_room(&self, room: &RoomId) -> Result<Vec<AssignmentResult>, RepositoryError>;

    /// Persists a review decision that does not change bed ownership.
    fn update_review(&self, row: AssignmentResult) -> Result<(), RepositoryError>;
    /// Persists a rejection and frees the bed the row held. `row` must no longer hold a bed.
    fn release_bed(&self, row: AssignmentResult) -> Result<(), RepositoryError>;
    /// Moves the row to its new bed, freeing `previous`. Fails with `Conflict` when the
    /// new bed is no longer free.
    fn move_bed(&self, row: AssignmentResult, previous: &BedId) -> Result<(), RepositoryError>;
    /// Overwrites the score of rows that still hold a bed. Review fields are left alone.
    fn rescore(&self, scores: Vec<(ResultId, f64)>) -> Result<(), RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists or was modified concurrently")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// The storage collaborators the engine runs against.
#[derive(Clone)]
pub struct AllocationStores {
    pub configs: Arc<dyn ConfigProvider>,
    pub population: Arc<dyn PopulationProvider>,
    pub tasks: Arc<dyn TaskStore>,
    pub results: Arc<dyn ResultStore>,
}

impl AllocationStores {
    /// Uses one backend for every concern.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ConfigProvider + PopulationProvider + TaskStore + ResultStore + 'static,
    {
        Self {
            configs: store.clone(),
            population: store.clone(),
            tasks: store.clone(),
            results: store,
        }
    }
}
