use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::domain::{
    AcademicStatus, AllocationConfig, AllocationTask, AssignmentResult, Bed, BedId, BedStatus,
    ConfigId, PopulationScope, ResultId, RoomId, Student, StudentId, TaskId, TaskStatus,
};
use super::repository::{
    CommitReport, ConfigProvider, PopulationProvider, RepositoryError, ResultStore, RunId,
    TaskStore,
};

#[derive(Default)]
struct StoreState {
    configs: HashMap<ConfigId, AllocationConfig>,
    students: BTreeMap<StudentId, Student>,
    beds: BTreeMap<BedId, Bed>,
    tasks: BTreeMap<TaskId, AllocationTask>,
    results: BTreeMap<ResultId, AssignmentResult>,
    staged: HashMap<RunId, StagedRun>,
    next_run: u64,
    beds_by_room: HashMap<RoomId, BTreeSet<BedId>>,
    rows_by_task: HashMap<TaskId, BTreeSet<ResultId>>,
    holdings: Holdings,
}

/// Indexes over the rows that currently hold a bed.
#[derive(Default)]
struct Holdings {
    by_bed: HashMap<BedId, ResultId>,
    by_student: HashMap<StudentId, ResultId>,
    by_room: HashMap<RoomId, BTreeSet<ResultId>>,
}

impl Holdings {
    fn hold(&mut self, row: &AssignmentResult) {
        self.by_bed.insert(row.bed_id.clone(), row.id.clone());
        self.by_student.insert(row.student_id.clone(), row.id.clone());
        self.by_room
            .entry(row.room_id.clone())
            .or_default()
            .insert(row.id.clone());
    }

    fn release(&mut self, row: &AssignmentResult) {
        if self.by_bed.get(&row.bed_id) == Some(&row.id) {
            self.by_bed.remove(&row.bed_id);
        }
        if self.by_student.get(&row.student_id) == Some(&row.id) {
            self.by_student.remove(&row.student_id);
        }
        if let Some(rows) = self.by_room.get_mut(&row.room_id) {
            rows.remove(&row.id);
            if rows.is_empty() {
                self.by_room.remove(&row.room_id);
            }
        }
    }
}

struct StagedRun {
    task_id: TaskId,
    rows: Vec<AssignmentResult>,
}

impl StoreState {
    fn bed_holder(&self, bed: &BedId) -> Option<&ResultId> {
        self.holdings.by_bed.get(bed)
    }

    fn student_row(&self, student: &StudentId) -> Option<&AssignmentResult> {
        self.holdings
            .by_student
            .get(student)
            .and_then(|id| self.results.get(id))
    }

    fn set_bed_status(&mut self, bed: &BedId, status: BedStatus) {
        if let Some(bed) = self.beds.get_mut(bed) {
            bed.status = status;
        }
    }

    fn put_bed(&mut self, bed: Bed) {
        let id = bed.id.clone();
        let room = bed.room_id.clone();
        if let Some(replaced) = self.beds.insert(id.clone(), bed) {
            if let Some(ids) = self.beds_by_room.get_mut(&replaced.room_id) {
                ids.remove(&id);
            }
        }
        self.beds_by_room.entry(room).or_default().insert(id);
    }

    fn rows(&self, ids: Option<&BTreeSet<ResultId>>) -> Vec<AssignmentResult> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.results.get(id))
            .cloned()
            .collect()
    }
}

/// Single-process store backing every repository trait with one lock.
///
/// All multi-record writes (commit, release, move) happen under that lock, which is what
/// makes them atomic for concurrent readers. Bed, student and room lookups go through
/// indexes kept in step with those writes, so a commit costs one lookup per staged row.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish_non_exhaustive()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store lock poisoned".to_string()))
    }

    pub fn insert_config(&self, config: AllocationConfig) -> Result<(), RepositoryError> {
        self.state()?.configs.insert(config.id.clone(), config);
        Ok(())
    }

    pub fn insert_student(&self, student: Student) -> Result<(), RepositoryError> {
        self.state()?.students.insert(student.id.clone(), student);
        Ok(())
    }

    pub fn insert_bed(&self, bed: Bed) -> Result<(), RepositoryError> {
        self.state()?.put_bed(bed);
        Ok(())
    }

    /// Loads a whole population, replacing students and beds with the same ids.
    pub fn load_population(
        &self,
        students: impl IntoIterator<Item = Student>,
        beds: impl IntoIterator<Item = Bed>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        for student in students {
            state.students.insert(student.id.clone(), student);
        }
        for bed in beds {
            state.put_bed(bed);
        }
        Ok(())
    }

    pub fn update_bed_status(&self, bed: &BedId, status: BedStatus) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        let bed = state.beds.get_mut(bed).ok_or(RepositoryError::NotFound)?;
        bed.status = status;
        Ok(())
    }

    pub fn staged_runs(&self) -> Result<usize, RepositoryError> {
        Ok(self.state()?.staged.len())
    }
}

impl ConfigProvider for InMemoryStore {
    fn get_config(&self, id: &ConfigId) -> Result<Option<AllocationConfig>, RepositoryError> {
        Ok(self.state()?.configs.get(id).cloned())
    }
}

impl PopulationProvider for InMemoryStore {
    fn eligible_students(&self, scope: &PopulationScope) -> Result<Vec<Student>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .students
            .values()
            .filter(|student| student.academic_status == AcademicStatus::Enrolled)
            .filter(|student| scope.admits_student(student))
            .filter(|student| !state.holdings.by_student.contains_key(&student.id))
            .cloned()
            .collect())
    }

    fn list_beds(&self, scope: &PopulationScope) -> Result<Vec<Bed>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .beds
            .values()
            .filter(|bed| scope.admits_bed(bed))
            .cloned()
            .collect())
    }

    fn student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        Ok(self.state()?.students.get(id).cloned())
    }

    fn bed(&self, id: &BedId) -> Result<Option<Bed>, RepositoryError> {
        Ok(self.state()?.beds.get(id).cloned())
    }

    fn room_beds(&self, room: &RoomId) -> Result<Vec<Bed>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .beds_by_room
            .get(room)
            .into_iter()
            .flatten()
            .filter_map(|id| state.beds.get(id))
            .cloned()
            .collect())
    }
}

impl TaskStore for InMemoryStore {
    fn insert_task(&self, task: AllocationTask) -> Result<AllocationTask, RepositoryError> {
        let mut state = self.state()?;
        if state.tasks.contains_key(&task.id) {
            return Err(RepositoryError::Conflict);
        }
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    fn fetch_task(&self, id: &TaskId) -> Result<Option<AllocationTask>, RepositoryError> {
        Ok(self.state()?.tasks.get(id).cloned())
    }

    fn list_tasks(&self) -> Result<Vec<AllocationTask>, RepositoryError> {
        Ok(self.state()?.tasks.values().cloned().collect())
    }

    fn compare_and_set(
        &self,
        id: &TaskId,
        expected: &[TaskStatus],
        task: AllocationTask,
    ) -> Result<AllocationTask, RepositoryError> {
        let mut state = self.state()?;
        let current = state.tasks.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if !expected.contains(&current.status) {
            return Err(RepositoryError::Conflict);
        }
        let mut task = task;
        task.progress = task.progress.max(current.progress).min(100);
        if matches!(task.status, TaskStatus::Queued) {
            // A fresh run starts counting again.
            task.progress = 0;
        }
        *current = task.clone();
        Ok(task)
    }

    fn update_progress(&self, id: &TaskId, progress: u8) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        let task = state.tasks.get_mut(id).ok_or(RepositoryError::NotFound)?;
        task.progress = task.progress.max(progress.min(100));
        Ok(())
    }

    fn active_for_config(&self, config: &ConfigId) -> Result<Vec<TaskId>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .tasks
            .values()
            .filter(|task| &task.config_id == config && task.status.is_active())
            .map(|task| task.id.clone())
            .collect())
    }
}

impl ResultStore for InMemoryStore {
    fn begin_run(&self, task: &TaskId) -> Result<RunId, RepositoryError> {
        let mut state = self.state()?;
        state.next_run += 1;
        let run = RunId(state.next_run);
        state.staged.insert(
            run,
            StagedRun {
                task_id: task.clone(),
                rows: Vec::new(),
            },
        );
        Ok(run)
    }

    fn stage(&self, run: RunId, rows: Vec<AssignmentResult>) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        let staged = state.staged.get_mut(&run).ok_or(RepositoryError::NotFound)?;
        if rows.iter().any(|row| row.task_id != staged.task_id) {
            return Err(RepositoryError::Conflict);
        }
        staged.rows.extend(rows);
        Ok(())
    }

    fn rollback(&self, run: RunId) -> Result<(), RepositoryError> {
        self.state()?.staged.remove(&run);
        Ok(())
    }

    fn commit(&self, run: RunId) -> Result<CommitReport, RepositoryError> {
        let mut state = self.state()?;
        let staged = state.staged.remove(&run).ok_or(RepositoryError::NotFound)?;
        let mut report = CommitReport::default();

        for row in staged.rows {
            let bed_free = state
                .beds
                .get(&row.bed_id)
                .is_some_and(|bed| bed.status == BedStatus::Free);
            let contested = state.bed_holder(&row.bed_id).is_some()
                || state.student_row(&row.student_id).is_some()
                || state.results.contains_key(&row.id);

            if !bed_free || contested {
                report.conflicts.push(row.student_id);
                continue;
            }

            state.set_bed_status(&row.bed_id, BedStatus::Occupied);
            state.holdings.hold(&row);
            state
                .rows_by_task
                .entry(row.task_id.clone())
                .or_default()
                .insert(row.id.clone());
            state.results.insert(row.id.clone(), row);
            report.committed += 1;
        }

        Ok(report)
    }

    fn results_for_task(&self, task: &TaskId) -> Result<Vec<AssignmentResult>, RepositoryError> {
        let state = self.state()?;
        Ok(state.rows(state.rows_by_task.get(task)))
    }

    fn result(&self, id: &ResultId) -> Result<Option<AssignmentResult>, RepositoryError> {
        Ok(self.state()?.results.get(id).cloned())
    }

    fn active_result_for_student(
        &self,
        student: &StudentId,
    ) -> Result<Option<AssignmentResult>, RepositoryError> {
        Ok(self.state()?.student_row(student).cloned())
    }

    fn results_in_room(&self, room: &RoomId) -> Result<Vec<AssignmentResult>, RepositoryError> {
        let state = self.state()?;
        Ok(state.rows(state.holdings.by_room.get(room)))
    }

    fn update_review(&self, row: AssignmentResult) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        let current = state.results.get_mut(&row.id).ok_or(RepositoryError::NotFound)?;
        if current.bed_id != row.bed_id
            || current.room_id != row.room_id
            || current.holds_bed() != row.holds_bed()
        {
            return Err(RepositoryError::Conflict);
        }
        *current = row;
        Ok(())
    }

    fn release_bed(&self, row: AssignmentResult) -> Result<(), RepositoryError> {
        if row.holds_bed() {
            return Err(RepositoryError::Conflict);
        }
        let mut state = self.state()?;
        let current = state
            .results
            .get(&row.id)
            .ok_or(RepositoryError::NotFound)?
            .clone();
        if current.holds_bed() {
            state.holdings.release(&current);
            state.set_bed_status(&current.bed_id, BedStatus::Free);
        }
        state.results.insert(row.id.clone(), row);
        Ok(())
    }

    fn move_bed(&self, row: AssignmentResult, previous: &BedId) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        let current = state
            .results
            .get(&row.id)
            .ok_or(RepositoryError::NotFound)?
            .clone();
        if !current.holds_bed() || &current.bed_id != previous || !row.holds_bed() {
            return Err(RepositoryError::Conflict);
        }

        let target_free = state
            .beds
            .get(&row.bed_id)
            .is_some_and(|bed| bed.status == BedStatus::Free);
        let target_held = state
            .bed_holder(&row.bed_id)
            .is_some_and(|holder| holder != &row.id);
        if !target_free || target_held {
            return Err(RepositoryError::Conflict);
        }

        state.holdings.release(&current);
        state.set_bed_status(previous, BedStatus::Free);
        state.set_bed_status(&row.bed_id, BedStatus::Occupied);
        state.holdings.hold(&row);
        state.results.insert(row.id.clone(), row);
        Ok(())
    }

    fn rescore(&self, scores: Vec<(ResultId, f64)>) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        for (id, score) in scores {
            if let Some(row) = state.results.get_mut(&id).filter(|row| row.holds_bed()) {
                row.compatibility_score = score;
            }
        }
        Ok(())
    }
}
