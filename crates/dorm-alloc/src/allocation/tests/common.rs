use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::Response;
use chrono::Utc;
use serde_json::Value;

use crate::allocation::matching::{Batch, Interrupted, Progress, StrategyDescriptor, Workspace};
use crate::allocation::{
    default_weights, AcademicStatus, AllocationConfig, AllocationService, AllocationStores,
    AllocationTask, AssignmentResult, Bed, BedId, BedStatus, CapacityPolicy, ClusterStrategy,
    CommitReport, ConfigId, ConfigProvider, ConfigStatus, EngineSettings, Gender,
    GenderEligibility, InMemoryStore, LifestyleAttribute, LifestyleVector, MatchingStrategy,
    NewTask, OrgGrouping, OrgPath, RepositoryError, ResultId, ResultStore, ReviewStatus, RoomId,
    RunId, StrategyRegistry, Student, StudentId, TaskId, TaskPhase, TaskStatus, TaskStore,
};

pub(super) const CONFIG: &str = "cfg-fall";

pub(super) fn student(id: &str, gender: Gender, answers: &[(LifestyleAttribute, u8)]) -> Student {
    let lifestyle = answers
        .iter()
        .fold(LifestyleVector::default(), |vector, (attribute, level)| {
            vector.with(*attribute, *level)
        });
    Student {
        id: StudentId(id.to_string()),
        name: format!("Student {id}"),
        gender,
        org: OrgPath {
            campus: "north".to_string(),
            department: "engineering".to_string(),
            major: "cs".to_string(),
            class_code: "cs-2025".to_string(),
        },
        academic_status: AcademicStatus::Enrolled,
        enrollment_year: Some(2025),
        lifestyle,
    }
}

pub(super) fn night_owl(id: &str, gender: Gender) -> Student {
    student(
        id,
        gender,
        &[
            (LifestyleAttribute::SleepSchedule, 3),
            (LifestyleAttribute::SmokingStatus, 1),
            (LifestyleAttribute::CleanlinessLevel, 1),
        ],
    )
}

pub(super) fn early_bird(id: &str, gender: Gender) -> Student {
    student(
        id,
        gender,
        &[
            (LifestyleAttribute::SleepSchedule, 0),
            (LifestyleAttribute::SmokingStatus, 0),
            (LifestyleAttribute::CleanlinessLevel, 4),
        ],
    )
}

pub(super) fn bed(id: &str, room: &str, slot: u8, eligibility: GenderEligibility) -> Bed {
    Bed {
        id: BedId(id.to_string()),
        room_id: RoomId(room.to_string()),
        floor_id: "floor-1".to_string(),
        building_id: "hall-a".to_string(),
        campus: "north".to_string(),
        slot,
        gender_eligibility: eligibility,
        status: BedStatus::Free,
    }
}

/// Two-bed rooms `room-1..=rooms` with the given eligibility.
pub(super) fn double_rooms(rooms: usize, eligibility: GenderEligibility) -> Vec<Bed> {
    (1..=rooms)
        .flat_map(|room| {
            let room_id = format!("room-{room}");
            [
                bed(&format!("{room_id}-a"), &room_id, 1, eligibility),
                bed(&format!("{room_id}-b"), &room_id, 2, eligibility),
            ]
        })
        .collect()
}

pub(super) fn config(id: &str, algorithm: &str) -> AllocationConfig {
    AllocationConfig {
        id: ConfigId(id.to_string()),
        name: "Fall intake".to_string(),
        algorithm_code: algorithm.to_string(),
        weights: default_weights(),
        enforce_gender: true,
        capacity: CapacityPolicy::FillAll,
        grouping: OrgGrouping::None,
        status: ConfigStatus::Enabled,
        exclusive: false,
    }
}

pub(super) fn seeded_store(
    students: Vec<Student>,
    beds: Vec<Bed>,
    configs: Vec<AllocationConfig>,
) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.load_population(students, beds).expect("load population");
    for config in configs {
        store.insert_config(config).expect("insert config");
    }
    store
}

pub(super) fn build_service(store: &Arc<InMemoryStore>) -> AllocationService {
    AllocationService::with_default_strategies(
        AllocationStores::shared(store.clone()),
        EngineSettings::default(),
    )
}

pub(super) fn new_task(config_id: &str) -> NewTask {
    NewTask {
        config_id: ConfigId(config_id.to_string()),
        name: "Fall allocation".to_string(),
        scope: Default::default(),
    }
}

/// Creates, executes and waits for a task.
pub(super) async fn run_to_completion(
    service: &AllocationService,
    config_id: &str,
) -> AllocationTask {
    let task = service.create_task(new_task(config_id)).expect("create task");
    service.execute_task(&task.id).await.expect("execute task");
    service
        .wait_for_completion(&task.id)
        .await
        .expect("wait for task")
}

/// Writes a Completed task with results at fixed scores straight into the store.
///
/// Each entry is `(student, bed, score)`; students and beds must already be loaded.
pub(super) fn seed_completed_task(
    store: &InMemoryStore,
    task_id: &str,
    rows: &[(&str, &str, f64)],
) -> TaskId {
    let task_id = TaskId(task_id.to_string());
    store
        .insert_task(AllocationTask {
            id: task_id.clone(),
            config_id: ConfigId(CONFIG.to_string()),
            name: "Seeded".to_string(),
            scope: Default::default(),
            status: TaskStatus::Completed,
            progress: 100,
            phase: TaskPhase::Finished,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            cancellation_requested: false,
            summary: None,
            failure: None,
        })
        .expect("insert task");

    let run = store.begin_run(&task_id).expect("begin run");
    let staged = rows
        .iter()
        .enumerate()
        .map(|(index, (student, bed, score))| AssignmentResult {
            id: result_id(&task_id, index + 1),
            task_id: task_id.clone(),
            student_id: StudentId(student.to_string()),
            bed_id: BedId(bed.to_string()),
            room_id: RoomId(bed.rsplit_once('-').map_or(*bed, |(room, _)| room).to_string()),
            compatibility_score: *score,
            review_status: ReviewStatus::Pending,
            adjustment_reason: None,
            rejection_reason: None,
            adjusted: false,
            created_at: Utc::now(),
            reviewed_at: None,
            adjusted_at: None,
        })
        .collect();
    store.stage(run, staged).expect("stage rows");
    let report = store.commit(run).expect("commit rows");
    assert!(report.conflicts.is_empty(), "seeded rows must not conflict");
    task_id
}

pub(super) fn result_id(task_id: &TaskId, index: usize) -> ResultId {
    ResultId(format!("{}-r{index:06}", task_id.0))
}

pub(super) fn bed_status(store: &InMemoryStore, id: &str) -> BedStatus {
    use crate::allocation::PopulationProvider;

    store
        .bed(&BedId(id.to_string()))
        .expect("bed lookup")
        .expect("bed exists")
        .status
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub(super) fn assert_status(response: &Response, status: StatusCode) {
    assert_eq!(response.status(), status, "unexpected status code");
}

/// Polls until `check` holds or a few seconds pass.
pub(super) async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Strategy that parks the matching worker until the test opens the gate, then behaves like
/// the clustering strategy.
#[derive(Default)]
pub(super) struct GatedStrategy {
    arrivals: AtomicUsize,
    open: Mutex<bool>,
    signal: Condvar,
}

impl GatedStrategy {
    pub(super) fn entered(&self) -> bool {
        self.arrivals() > 0
    }

    /// Batches that reached the gate so far, across all tasks.
    pub(super) fn arrivals(&self) -> usize {
        self.arrivals.load(Ordering::SeqCst)
    }

    pub(super) fn open(&self) {
        *self.open.lock().expect("gate lock") = true;
        self.signal.notify_all();
    }
}

impl MatchingStrategy for GatedStrategy {
    fn descriptor(&self) -> StrategyDescriptor {
        StrategyDescriptor {
            code: "gated",
            name: "Gated",
            description: "Waits for the test before matching",
            advantages: "Deterministic interleavings",
            disadvantages: "Test only",
            recommended: false,
        }
    }

    fn estimated_time(&self, _students: usize) -> &'static str {
        "until released"
    }

    fn place_batch<'s>(
        &self,
        batch: &Batch<'s>,
        workspace: &mut Workspace<'s>,
        progress: &mut Progress<'_>,
    ) -> Result<(), Interrupted> {
        self.arrivals.fetch_add(1, Ordering::SeqCst);
        let guard = self.open.lock().expect("gate lock");
        // Bounded so a failing test cannot keep the runtime from shutting down.
        let (guard, _) = self
            .signal
            .wait_timeout_while(guard, Duration::from_secs(5), |open| !*open)
            .expect("gate wait");
        drop(guard);
        progress.boundary(TaskPhase::Matching)?;
        ClusterStrategy.place_batch(batch, workspace, progress)
    }
}

/// Service whose registry also knows the gated strategy under the code `gated`.
pub(super) fn gated_service(
    store: &Arc<InMemoryStore>,
    workers: usize,
) -> (AllocationService, Arc<GatedStrategy>) {
    let gate = Arc::new(GatedStrategy::default());
    let mut registry = StrategyRegistry::default();
    registry.register(gate.clone());
    let settings = EngineSettings {
        worker_pool_size: workers,
        ..EngineSettings::default()
    };
    let service =
        AllocationService::new(AllocationStores::shared(store.clone()), registry, settings);
    (service, gate)
}

/// Result store whose commit always fails, delegating everything else.
pub(super) struct FailingCommit {
    pub(super) inner: Arc<InMemoryStore>,
}

impl ResultStore for FailingCommit {
    fn begin_run(&self, task: &TaskId) -> Result<RunId, RepositoryError> {
        self.inner.begin_run(task)
    }

    fn stage(&self, run: RunId, rows: Vec<AssignmentResult>) -> Result<(), RepositoryError> {
        self.inner.stage(run, rows)
    }

    fn rollback(&self, run: RunId) -> Result<(), RepositoryError> {
        self.inner.rollback(run)
    }

    fn commit(&self, _run: RunId) -> Result<CommitReport, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn results_for_task(&self, task: &TaskId) -> Result<Vec<AssignmentResult>, RepositoryError> {
        self.inner.results_for_task(task)
    }

    fn result(&self, id: &ResultId) -> Result<Option<AssignmentResult>, RepositoryError> {
        self.inner.result(id)
    }

    fn active_result_for_student(
        &self,
        student: &StudentId,
    ) -> Result<Option<AssignmentResult>, RepositoryError> {
        self.inner.active_result_for_student(student)
    }

    fn results_in_room(&self, room: &RoomId) -> Result<Vec<AssignmentResult>, RepositoryError> {
        self.inner.results_in_room(room)
    }

    fn update_review(&self, row: AssignmentResult) -> Result<(), RepositoryError> {
        self.inner.update_review(row)
    }

    fn release_bed(&self, row: AssignmentResult) -> Result<(), RepositoryError> {
        self.inner.release_bed(row)
    }

    fn move_bed(&self, row: AssignmentResult, previous: &BedId) -> Result<(), RepositoryError> {
        self.inner.move_bed(row, previous)
    }

    fn rescore(&self, scores: Vec<(ResultId, f64)>) -> Result<(), RepositoryError> {
        self.inner.rescore(scores)
    }
}

/// Config provider that is always down.
pub(super) struct UnavailableConfigs;

impl ConfigProvider for UnavailableConfigs {
    fn get_config(&self, _id: &ConfigId) -> Result<Option<AllocationConfig>, RepositoryError> {
        Err(RepositoryError::Unavailable("config service down".to_string()))
    }
}
