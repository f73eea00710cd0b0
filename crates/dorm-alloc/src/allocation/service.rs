use super::domain::{AllocationTask, AssignmentResult, BedId, ResultId, TaskId};
use super::error::AllocationError;
use super::matching::{AlgorithmOption, StrategyRegistry};
use super::orchestrator::{NewTask, TaskOrchestrator, TaskPreview, TaskProgress};
use super::repository::AllocationStores;
use super::review::{ResultQuery, ResultReview};
use super::settings::EngineSettings;

/// Service composing the task orchestrator and the result review workflow behind the
/// operational surface used by the router and the CLI.
pub struct AllocationService {
    orchestrator: TaskOrchestrator,
    review: ResultReview,
}

impl AllocationService {
    pub fn new(
        stores: AllocationStores,
        registry: StrategyRegistry,
        settings: EngineSettings,
    ) -> Self {
        let review = ResultReview::new(stores.clone(), settings.review, settings.problem_threshold);
        let orchestrator = TaskOrchestrator::new(stores, registry, settings);
        Self {
            orchestrator,
            review,
        }
    }

    /// Service with the built-in strategies registered.
    pub fn with_default_strategies(stores: AllocationStores, settings: EngineSettings) -> Self {
        Self::new(stores, StrategyRegistry::default(), settings)
    }

    pub fn orchestrator(&self) -> &TaskOrchestrator {
        &self.orchestrator
    }

    pub fn review(&self) -> &ResultReview {
        &self.review
    }

    pub fn list_algorithms(&self, population: usize) -> Vec<AlgorithmOption> {
        self.orchestrator.list_algorithms(population)
    }

    pub fn create_task(&self, request: NewTask) -> Result<AllocationTask, AllocationError> {
        self.orchestrator.create_task(request)
    }

    pub fn get_task(&self, task_id: &TaskId) -> Result<AllocationTask, AllocationError> {
        self.orchestrator.get_task(task_id)
    }

    pub fn list_tasks(&self) -> Result<Vec<AllocationTask>, AllocationError> {
        self.orchestrator.list_tasks()
    }

    pub async fn preview_task(&self, task_id: &TaskId) -> Result<TaskPreview, AllocationError> {
        self.orchestrator.preview(task_id).await
    }

    pub async fn execute_task(&self, task_id: &TaskId) -> Result<AllocationTask, AllocationError> {
        self.orchestrator.execute(task_id).await
    }

    pub async fn wait_for_completion(
        &self,
        task_id: &TaskId,
    ) -> Result<AllocationTask, AllocationError> {
        self.orchestrator.wait_for_completion(task_id).await
    }

    pub fn get_task_progress(&self, task_id: &TaskId) -> Result<TaskProgress, AllocationError> {
        self.orchestrator.progress(task_id)
    }

    pub fn cancel_task(&self, task_id: &TaskId) -> Result<AllocationTask, AllocationError> {
        self.orchestrator.cancel(task_id)
    }

    pub fn get_results(
        &self,
        task_id: &TaskId,
        query: &ResultQuery,
    ) -> Result<Vec<AssignmentResult>, AllocationError> {
        self.review.get_results(task_id, query)
    }

    pub fn confirm_results(
        &self,
        task_id: &TaskId,
        result_ids: &[ResultId],
    ) -> Result<Vec<AssignmentResult>, AllocationError> {
        self.review.confirm(task_id, result_ids)
    }

    pub fn confirm_all_results(&self, task_id: &TaskId) -> Result<usize, AllocationError> {
        self.review.confirm_all(task_id)
    }

    pub fn reject_results(
        &self,
        task_id: &TaskId,
        result_ids: &[ResultId],
        reason: Option<String>,
    ) -> Result<Vec<AssignmentResult>, AllocationError> {
        self.review.reject(task_id, result_ids, reason)
    }

    pub fn adjust_result(
        &self,
        result_id: &ResultId,
        new_bed_id: &BedId,
        reason: Option<String>,
    ) -> Result<AssignmentResult, AllocationError> {
        self.review.adjust(result_id, new_bed_id, reason)
    }

    /// Problem list at `threshold`, or at the configured default when `None`.
    pub fn get_problem_list(
        &self,
        task_id: &TaskId,
        threshold: Option<f64>,
    ) -> Result<Vec<AssignmentResult>, AllocationError> {
        self.review.problem_list(task_id, threshold)
    }
}
