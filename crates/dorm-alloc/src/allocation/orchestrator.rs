use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};

use super::constraints::{ConstraintValidator, OccupancyView};
use super::domain::{
    AcademicStatus, AllocationConfig, AllocationTask, AssignmentResult, Bed, BedId, ConfigId,
    ConfigStatus, PopulationScope, ResultId, ReviewStatus, RunSummary, Student, StudentId, TaskId,
    TaskPhase, TaskStatus,
};
use super::error::AllocationError;
use super::matching::{
    self, AlgorithmOption, AssignmentPlan, Checkpoint, Interrupted, MatchingInput,
    MatchingStrategy, Placement, StrategyRegistry, TentativeOccupancy, Unobserved,
};
use super::repository::{AllocationStores, CommitReport, RepositoryError, RunId};
use super::scoring::round_score;
use super::settings::EngineSettings;

/// Request to create a draft task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub config_id: ConfigId,
    pub name: String,
    #[serde(default)]
    pub scope: PopulationScope,
}

/// Polled progress of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub phase: TaskPhase,
    pub percent: u8,
    pub cancellation_requested: bool,
}

impl TaskProgress {
    fn of(task: &AllocationTask) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            phase: task.phase,
            percent: task.progress,
            cancellation_requested: task.cancellation_requested,
        }
    }
}

/// Candidate assignment computed without committing anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPreview {
    pub task_id: TaskId,
    pub algorithm_code: String,
    pub students_considered: usize,
    pub placements: Vec<Placement>,
    pub unassigned: Vec<StudentId>,
    pub mean_score: Option<f64>,
}

struct RunHandle {
    generation: u64,
    cancel: watch::Sender<bool>,
    progress: watch::Receiver<TaskProgress>,
}

struct Inner {
    stores: AllocationStores,
    registry: StrategyRegistry,
    settings: EngineSettings,
    workers: Arc<Semaphore>,
    admission: Mutex<()>,
    runs: Mutex<HashMap<TaskId, RunHandle>>,
    sequence: AtomicU64,
    generations: AtomicU64,
}

/// Owns the task state machine and the bounded pool executions run on.
///
/// It is the only writer of task state. Cloning is cheap and every clone drives the same
/// pool.
#[derive(Clone)]
pub struct TaskOrchestrator {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TaskOrchestrator {
    pub fn new(
        stores: AllocationStores,
        registry: StrategyRegistry,
        settings: EngineSettings,
    ) -> Self {
        let permits = settings.worker_pool_size.max(1);
        Self {
            inner: Arc::new(Inner {
                stores,
                registry,
                settings,
                workers: Arc::new(Semaphore::new(permits)),
                admission: Mutex::new(()),
                runs: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(1),
                generations: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn stores(&self) -> &AllocationStores {
        &self.inner.stores
    }

    pub fn list_algorithms(&self, population: usize) -> Vec<AlgorithmOption> {
        self.inner.registry.list_algorithms(population)
    }

    /// Creates a Draft task. Configuration problems are reported before anything is stored.
    pub fn create_task(&self, request: NewTask) -> Result<AllocationTask, AllocationError> {
        let config = self.inner.usable_config(&request.config_id)?;
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);

        let task = AllocationTask {
            id: TaskId(format!("task-{sequence:06}")),
            config_id: config.id.clone(),
            name: request.name,
            scope: request.scope,
            status: TaskStatus::Draft,
            progress: 0,
            phase: TaskPhase::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            cancellation_requested: false,
            summary: None,
            failure: None,
        };

        let stored = self.inner.stores.tasks.insert_task(task)?;
        tracing::info!(
            task_id = %stored.id.0,
            config_id = %config.id.0,
            algorithm = %config.algorithm_code,
            "allocation task created"
        );
        Ok(stored)
    }

    pub fn get_task(&self, task_id: &TaskId) -> Result<AllocationTask, AllocationError> {
        self.inner.task(task_id)
    }

    pub fn list_tasks(&self) -> Result<Vec<AllocationTask>, AllocationError> {
        Ok(self.inner.stores.tasks.list_tasks()?)
    }

    /// Runs the configured strategy without committing and marks the task Previewed.
    pub async fn preview(&self, task_id: &TaskId) -> Result<TaskPreview, AllocationError> {
        let task = self.inner.task(task_id)?;
        if !task.status.can_preview() {
            return Err(AllocationError::InvalidTaskTransition {
                from: task.status.label(),
                action: "preview",
            });
        }
        let config = self.inner.usable_config(&task.config_id)?;
        let strategy = self.inner.strategy(&config)?;
        tracing::info!(task_id = %task.id.0, algorithm = %config.algorithm_code, "preview started");

        let inner = self.inner.clone();
        let scope = task.scope.clone();
        let run_config = config.clone();
        let (population, plan) = tokio::task::spawn_blocking(move || {
            let population = inner.load_population(&scope)?;
            let plan = inner.plan(strategy.as_ref(), &run_config, &population, &Unobserved)?;
            verify_plan(&plan, &population, &run_config)?;
            Ok::<_, AllocationError>((population, plan))
        })
        .await
        .map_err(|err| {
            AllocationError::PlanRejected(format!("matching worker stopped: {err}"))
        })??;

        self.inner.transition(
            task_id,
            &[TaskStatus::Draft, TaskStatus::Previewed],
            "preview",
            |task| task.status = TaskStatus::Previewed,
        )?;

        Ok(TaskPreview {
            task_id: task_id.clone(),
            algorithm_code: config.algorithm_code.clone(),
            students_considered: population.students.len(),
            mean_score: plan.mean_score(),
            placements: plan.placements,
            unassigned: plan.unassigned,
        })
    }

    /// Queues the task for execution on the worker pool and returns immediately.
    pub async fn execute(&self, task_id: &TaskId) -> Result<AllocationTask, AllocationError> {
        let task = self.inner.task(task_id)?;
        if !task.status.can_execute() {
            return Err(AllocationError::InvalidTaskTransition {
                from: task.status.label(),
                action: "execute",
            });
        }
        let config = self.inner.usable_config(&task.config_id)?;
        let strategy = self.inner.strategy(&config)?;

        let queued = {
            let _admission = lock(&self.inner.admission);
            if config.exclusive {
                let active = self.inner.stores.tasks.active_for_config(&config.id)?;
                if active.iter().any(|id| id != task_id) {
                    return Err(AllocationError::ExclusiveConfigBusy(config.id.clone()));
                }
            }

            let queued = self.inner.transition(
                task_id,
                &[
                    TaskStatus::Draft,
                    TaskStatus::Previewed,
                    TaskStatus::Cancelled,
                    TaskStatus::Failed,
                ],
                "execute",
                |task| {
                    task.status = TaskStatus::Queued;
                    task.phase = TaskPhase::Pending;
                    task.progress = 0;
                    task.cancellation_requested = false;
                    task.started_at = None;
                    task.finished_at = None;
                    task.summary = None;
                    task.failure = None;
                },
            )?;

            let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let (progress_tx, progress_rx) = watch::channel(TaskProgress::of(&queued));
            lock(&self.inner.runs).insert(
                task_id.clone(),
                RunHandle {
                    generation,
                    cancel: cancel_tx,
                    progress: progress_rx,
                },
            );

            tokio::spawn(run_execution(
                self.inner.clone(),
                generation,
                queued.clone(),
                config,
                strategy,
                cancel_rx,
                progress_tx,
            ));
            queued
        };

        tracing::info!(task_id = %queued.id.0, "execution queued");
        Ok(queued)
    }

    /// Latest progress; live while the task runs, from the store otherwise.
    pub fn progress(&self, task_id: &TaskId) -> Result<TaskProgress, AllocationError> {
        let task = self.inner.task(task_id)?;
        let mut progress = TaskProgress::of(&task);

        if let Some(handle) = lock(&self.inner.runs).get(task_id) {
            let live = handle.progress.borrow();
            if !task.status.is_terminal() {
                progress.phase = progress.phase.max(live.phase);
            }
            progress.percent = progress.percent.max(live.percent);
        }
        Ok(progress)
    }

    /// Requests cooperative cancellation of a Queued or Running task.
    pub fn cancel(&self, task_id: &TaskId) -> Result<AllocationTask, AllocationError> {
        let updated = self.inner.transition(
            task_id,
            &[TaskStatus::Queued, TaskStatus::Running],
            "cancel",
            |task| task.cancellation_requested = true,
        )?;

        if let Some(handle) = lock(&self.inner.runs).get(task_id) {
            handle.cancel.send_replace(true);
        }
        tracing::warn!(task_id = %task_id.0, "cancellation requested");
        Ok(updated)
    }

    /// Waits until the task leaves Queued/Running and returns its final state.
    pub async fn wait_for_completion(
        &self,
        task_id: &TaskId,
    ) -> Result<AllocationTask, AllocationError> {
        let receiver = lock(&self.inner.runs)
            .get(task_id)
            .map(|handle| handle.progress.clone());

        if let Some(mut receiver) = receiver {
            // A closed channel means the worker already finished and stored the outcome.
            let _ = receiver.wait_for(|progress| progress.status.is_terminal()).await;
        }
        self.inner.task(task_id)
    }
}

struct Population {
    students: Vec<Student>,
    beds: Vec<Bed>,
    ineligible: usize,
}

impl Inner {
    fn task(&self, task_id: &TaskId) -> Result<AllocationTask, AllocationError> {
        self.stores
            .tasks
            .fetch_task(task_id)?
            .ok_or_else(|| AllocationError::TaskNotFound(task_id.clone()))
    }

    fn usable_config(&self, config_id: &ConfigId) -> Result<AllocationConfig, AllocationError> {
        let config = self
            .stores
            .configs
            .get_config(config_id)?
            .ok_or_else(|| AllocationError::ConfigNotFound(config_id.clone()))?;
        if config.status == ConfigStatus::Disabled {
            return Err(AllocationError::ConfigDisabled(config_id.clone()));
        }
        if !self.registry.contains(&config.algorithm_code) {
            return Err(AllocationError::UnknownAlgorithm(config.algorithm_code));
        }
        Ok(config)
    }

    fn strategy(
        &self,
        config: &AllocationConfig,
    ) -> Result<Arc<dyn MatchingStrategy>, AllocationError> {
        self.registry
            .get(&config.algorithm_code)
            .ok_or_else(|| AllocationError::UnknownAlgorithm(config.algorithm_code.clone()))
    }

    /// Applies `change` if the stored status is still one of `expected`.
    fn transition(
        &self,
        task_id: &TaskId,
        expected: &[TaskStatus],
        action: &'static str,
        change: impl FnOnce(&mut AllocationTask),
    ) -> Result<AllocationTask, AllocationError> {
        let mut task = self.task(task_id)?;
        if !expected.contains(&task.status) {
            return Err(AllocationError::InvalidTaskTransition {
                from: task.status.label(),
                action,
            });
        }
        change(&mut task);

        match self.stores.tasks.compare_and_set(task_id, expected, task) {
            Ok(stored) => Ok(stored),
            Err(RepositoryError::Conflict) => {
                let current = self.task(task_id)?;
                Err(AllocationError::InvalidTaskTransition {
                    from: current.status.label(),
                    action,
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    fn load_population(&self, scope: &PopulationScope) -> Result<Population, AllocationError> {
        let candidates = self.stores.population.eligible_students(scope)?;
        let total = candidates.len();
        let students: Vec<Student> = candidates
            .into_iter()
            .filter(|student| {
                student.academic_status == AcademicStatus::Enrolled
                    && scope.admits_student(student)
            })
            .collect();
        let beds = self.stores.population.list_beds(scope)?;

        Ok(Population {
            ineligible: total - students.len(),
            students,
            beds,
        })
    }

    fn plan(
        &self,
        strategy: &dyn MatchingStrategy,
        config: &AllocationConfig,
        population: &Population,
        checkpoint: &dyn Checkpoint,
    ) -> Result<AssignmentPlan, Interrupted> {
        matching::assign(
            strategy,
            MatchingInput {
                students: &population.students,
                beds: &population.beds,
                config,
                settings: self.settings.matching,
            },
            checkpoint,
        )
    }
}

/// Re-validates a strategy's output against the hard constraints before it may be used.
fn verify_plan(
    plan: &AssignmentPlan,
    population: &Population,
    config: &AllocationConfig,
) -> Result<(), AllocationError> {
    let validator = ConstraintValidator::from_config(config);
    let students: HashMap<&StudentId, &Student> = population
        .students
        .iter()
        .map(|student| (&student.id, student))
        .collect();
    let beds: HashMap<&BedId, &Bed> = population.beds.iter().map(|bed| (&bed.id, bed)).collect();
    let mut occupancy = TentativeOccupancy::from_beds(&population.beds);

    for placement in &plan.placements {
        let student = students.get(&placement.student_id).ok_or_else(|| {
            AllocationError::PlanRejected(format!("unknown student {}", placement.student_id.0))
        })?;
        let bed = beds.get(&placement.bed_id).ok_or_else(|| {
            AllocationError::PlanRejected(format!("unknown bed {}", placement.bed_id.0))
        })?;
        if bed.room_id != placement.room_id {
            return Err(AllocationError::PlanRejected(format!(
                "bed {} is not in room {}",
                bed.id.0, placement.room_id.0
            )));
        }
        validator.validate(student, bed, &occupancy).map_err(|violation| {
            AllocationError::PlanRejected(format!(
                "{} -> {}: {violation}",
                student.id.0, bed.id.0
            ))
        })?;
        occupancy.record(&student.id, bed);
    }

    if let Some(student) = plan
        .unassigned
        .iter()
        .find(|student| occupancy.assigned_bed(student).is_some())
    {
        return Err(AllocationError::PlanRejected(format!(
            "student {} is both placed and unassigned",
            student.0
        )));
    }
    Ok(())
}

/// Maps run units to the externally visible percentage.
fn percent_for(phase: TaskPhase, processed: usize, total: usize) -> u8 {
    let fraction = if total == 0 {
        1.0
    } else {
        (processed.min(total) as f64) / (total as f64)
    };
    let percent = match phase {
        TaskPhase::Pending => 0.0,
        TaskPhase::Loading => 2.0,
        TaskPhase::Scoring | TaskPhase::Matching => 5.0 + 80.0 * fraction,
        TaskPhase::Persisting => 85.0 + 14.0 * fraction,
        TaskPhase::Finished => 100.0,
    };
    percent.floor() as u8
}

/// Publishes progress and observes cancellation for one execution.
struct RunCheckpoint {
    task_id: TaskId,
    inner: Arc<Inner>,
    cancel: watch::Receiver<bool>,
    progress: watch::Sender<TaskProgress>,
    percent: AtomicU8,
    phase: Mutex<TaskPhase>,
}

impl RunCheckpoint {
    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

impl Checkpoint for RunCheckpoint {
    fn reached(&self, phase: TaskPhase, processed: usize, total: usize) -> Result<(), Interrupted> {
        let percent = percent_for(phase, processed, total);
        let percent = self.percent.fetch_max(percent, Ordering::AcqRel).max(percent);

        {
            let mut last = lock(&self.phase);
            if *last != phase {
                tracing::debug!(task_id = %self.task_id.0, phase = phase.label(), "phase changed");
                *last = phase;
            }
        }

        self.progress.send_modify(|progress| {
            progress.status = TaskStatus::Running;
            progress.phase = progress.phase.max(phase);
            progress.percent = progress.percent.max(percent);
        });
        if let Err(error) = self.inner.stores.tasks.update_progress(&self.task_id, percent) {
            tracing::warn!(task_id = %self.task_id.0, %error, "progress not persisted");
        }
        tracing::trace!(task_id = %self.task_id.0, processed, total, percent, "checkpoint");

        if self.cancelled() {
            return Err(Interrupted);
        }
        Ok(())
    }
}

async fn run_execution(
    inner: Arc<Inner>,
    generation: u64,
    task: AllocationTask,
    config: AllocationConfig,
    strategy: Arc<dyn MatchingStrategy>,
    mut cancel: watch::Receiver<bool>,
    progress: watch::Sender<TaskProgress>,
) {
    let task_id = task.id.clone();

    let permit = tokio::select! {
        permit = inner.workers.clone().acquire_owned() => permit.ok(),
        _ = cancel.wait_for(|cancelled| *cancelled) => None,
    };

    let outcome = match permit {
        Some(_permit) if !*cancel.borrow() => {
            tracing::debug!(task_id = %task_id.0, "worker slot acquired");
            match inner.transition(&task_id, &[TaskStatus::Queued], "start", |task| {
                task.status = TaskStatus::Running;
                task.phase = TaskPhase::Loading;
                task.started_at = Some(Utc::now());
            }) {
                Ok(running) => {
                    progress.send_modify(|current| *current = TaskProgress::of(&running));
                    let checkpoint = RunCheckpoint {
                        task_id: task_id.clone(),
                        inner: inner.clone(),
                        cancel: cancel.clone(),
                        progress: progress.clone(),
                        percent: AtomicU8::new(0),
                        phase: Mutex::new(TaskPhase::Loading),
                    };
                    let worker = inner.clone();
                    let scope = running.scope.clone();
                    tokio::task::spawn_blocking(move || {
                        execute_blocking(&worker, &scope, &config, strategy.as_ref(), &checkpoint)
                    })
                    .await
                    .unwrap_or_else(|err| {
                        Err(AllocationError::PlanRejected(format!(
                            "matching worker stopped: {err}"
                        )))
                    })
                }
                Err(error) => Err(error),
            }
        }
        _ => Err(AllocationError::Interrupted(Interrupted)),
    };

    let finished = finish_run(&inner, &task_id, outcome);
    {
        // The task may already have been re-executed under a newer handle.
        let mut runs = lock(&inner.runs);
        if runs
            .get(&task_id)
            .is_some_and(|handle| handle.generation == generation)
        {
            runs.remove(&task_id);
        }
    }
    if let Some(task) = finished {
        progress.send_replace(TaskProgress::of(&task));
    }
}

fn finish_run(
    inner: &Inner,
    task_id: &TaskId,
    outcome: Result<RunSummary, AllocationError>,
) -> Option<AllocationTask> {
    let active = [TaskStatus::Queued, TaskStatus::Running];
    let result = match outcome {
        Ok(summary) => {
            tracing::info!(
                task_id = %task_id.0,
                assigned = summary.assigned,
                unassigned = summary.unassigned.len(),
                "execution completed"
            );
            inner.transition(task_id, &active, "complete", |task| {
                task.status = TaskStatus::Completed;
                task.phase = TaskPhase::Finished;
                task.progress = 100;
                task.finished_at = Some(Utc::now());
                task.summary = Some(summary);
            })
        }
        Err(AllocationError::Interrupted(_)) => {
            tracing::warn!(task_id = %task_id.0, "execution cancelled, staged results discarded");
            inner.transition(task_id, &active, "cancel", |task| {
                task.status = TaskStatus::Cancelled;
                task.cancellation_requested = true;
                task.finished_at = Some(Utc::now());
            })
        }
        Err(error) => {
            tracing::error!(
                task_id = %task_id.0,
                %error,
                "execution failed, staged results discarded"
            );
            let failure = error.to_string();
            inner.transition(task_id, &active, "fail", |task| {
                task.status = TaskStatus::Failed;
                task.finished_at = Some(Utc::now());
                task.failure = Some(failure);
            })
        }
    };

    match result {
        Ok(task) => Some(task),
        Err(error) => {
            tracing::error!(task_id = %task_id.0, %error, "final task state not recorded");
            None
        }
    }
}

fn execute_blocking(
    inner: &Inner,
    scope: &PopulationScope,
    config: &AllocationConfig,
    strategy: &dyn MatchingStrategy,
    checkpoint: &RunCheckpoint,
) -> Result<RunSummary, AllocationError> {
    checkpoint.reached(TaskPhase::Loading, 0, 1)?;
    let population = inner.load_population(scope)?;
    tracing::debug!(
        task_id = %checkpoint.task_id.0,
        students = population.students.len(),
        beds = population.beds.len(),
        "population loaded"
    );

    let plan = inner.plan(strategy, config, &population, checkpoint)?;
    verify_plan(&plan, &population, config)?;

    let run = inner.stores.results.begin_run(&checkpoint.task_id)?;
    match persist(inner, run, &plan, checkpoint) {
        Ok(committed) => {
            let mut unassigned = plan.unassigned.clone();
            unassigned.extend(committed.conflicts.iter().cloned());
            if !committed.conflicts.is_empty() {
                tracing::warn!(
                    task_id = %checkpoint.task_id.0,
                    conflicts = committed.conflicts.len(),
                    "beds taken by a concurrent commit, students left unassigned"
                );
            }

            let kept: Vec<f64> = plan
                .placements
                .iter()
                .filter(|placement| !committed.conflicts.contains(&placement.student_id))
                .map(|placement| placement.score)
                .collect();
            let mean_score = if kept.is_empty() {
                None
            } else {
                Some(round_score(kept.iter().sum::<f64>() / kept.len() as f64))
            };

            Ok(RunSummary {
                algorithm_code: config.algorithm_code.clone(),
                students_considered: population.students.len(),
                ineligible: population.ineligible,
                assigned: committed.committed,
                unassigned,
                commit_conflicts: committed.conflicts.len(),
                mean_score,
            })
        }
        Err(error) => {
            if let Err(rollback) = inner.stores.results.rollback(run) {
                tracing::error!(task_id = %checkpoint.task_id.0, %rollback, "rollback failed");
            }
            Err(error)
        }
    }
}

/// Stages result rows in checkpointed chunks and publishes them in one commit.
fn persist(
    inner: &Inner,
    run: RunId,
    plan: &AssignmentPlan,
    checkpoint: &RunCheckpoint,
) -> Result<CommitReport, AllocationError> {
    let created_at = Utc::now();
    let rows: Vec<AssignmentResult> = plan
        .placements
        .iter()
        .enumerate()
        .map(|(index, placement)| AssignmentResult {
            id: ResultId(format!("{}-r{:06}", checkpoint.task_id.0, index + 1)),
            task_id: checkpoint.task_id.clone(),
            student_id: placement.student_id.clone(),
            bed_id: placement.bed_id.clone(),
            room_id: placement.room_id.clone(),
            compatibility_score: placement.score,
            review_status: ReviewStatus::Pending,
            adjustment_reason: None,
            rejection_reason: None,
            adjusted: false,
            created_at,
            reviewed_at: None,
            adjusted_at: None,
        })
        .collect();

    let total = rows.len();
    let chunk = inner.settings.matching.checkpoint_interval.max(1);
    let mut staged = 0;
    checkpoint.reached(TaskPhase::Persisting, staged, total)?;

    for batch in rows.chunks(chunk) {
        inner.stores.results.stage(run, batch.to_vec())?;
        staged += batch.len();
        checkpoint.reached(TaskPhase::Persisting, staged, total)?;
    }

    Ok(inner.stores.results.commit(run)?)
}
