use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::constraints::{ConstraintValidator, ConstraintViolation, OccupancyView};
use super::domain::{
    AllocationTask, AssignmentResult, BedId, BedStatus, LifestyleVector, ResultId, ReviewStatus,
    RoomId, StudentId, TaskId, TaskStatus,
};
use super::error::AllocationError;
use super::repository::{AllocationStores, RepositoryError};
use super::scoring::{round_score, CompatibilityScorer};

/// Review rules that sites may tune.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPolicy {
    /// Lets `reject` re-open results that were already confirmed.
    pub reopen_confirmed: bool,
}

/// Filters accepted by `get_results`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultQuery {
    #[serde(default)]
    pub review_status: Option<ReviewStatus>,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub room_id: Option<String>,
    /// Only Pending results below the configured problem threshold.
    #[serde(default)]
    pub problem_only: bool,
}

const LOCK_STRIPES: usize = 64;

/// Confirm / reject / adjust operations over committed results.
///
/// Operations on the same result are serialized. Operations that change who sleeps in a
/// room also hold that room, so roommate scores are recomputed against a stable make-up.
/// Result stripes are always taken before room stripes.
pub struct ResultReview {
    stores: AllocationStores,
    policy: ReviewPolicy,
    problem_threshold: f64,
    result_locks: StripedLocks,
    room_locks: StripedLocks,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed set of mutexes shared by all keys hashing to the same stripe.
struct StripedLocks {
    stripes: Vec<Mutex<()>>,
}

impl StripedLocks {
    fn new(count: usize) -> Self {
        Self {
            stripes: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe<K: Hash>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Locks the stripes of every key in ascending stripe order.
    fn acquire<'k, K: Hash + 'k>(
        &self,
        keys: impl IntoIterator<Item = &'k K>,
    ) -> Vec<MutexGuard<'_, ()>> {
        let mut stripes: Vec<usize> = keys.into_iter().map(|key| self.stripe(key)).collect();
        stripes.sort_unstable();
        stripes.dedup();
        stripes
            .into_iter()
            .map(|stripe| lock(&self.stripes[stripe]))
            .collect()
    }
}

impl ResultReview {
    pub fn new(stores: AllocationStores, policy: ReviewPolicy, problem_threshold: f64) -> Self {
        Self {
            stores,
            policy,
            problem_threshold,
            result_locks: StripedLocks::new(LOCK_STRIPES),
            room_locks: StripedLocks::new(LOCK_STRIPES),
        }
    }

    pub fn policy(&self) -> ReviewPolicy {
        self.policy
    }

    pub fn default_threshold(&self) -> f64 {
        self.problem_threshold
    }

    fn task(&self, task_id: &TaskId) -> Result<AllocationTask, AllocationError> {
        self.stores
            .tasks
            .fetch_task(task_id)?
            .ok_or_else(|| AllocationError::TaskNotFound(task_id.clone()))
    }

    fn completed_task(&self, task_id: &TaskId) -> Result<AllocationTask, AllocationError> {
        let task = self.task(task_id)?;
        if task.status != TaskStatus::Completed {
            return Err(AllocationError::InvalidTaskTransition {
                from: task.status.label(),
                action: "review",
            });
        }
        Ok(task)
    }

    fn row(&self, task_id: &TaskId, id: &ResultId) -> Result<AssignmentResult, AllocationError> {
        let row = self
            .stores
            .results
            .result(id)?
            .ok_or_else(|| AllocationError::ResultNotFound(id.clone()))?;
        if &row.task_id != task_id {
            return Err(AllocationError::ResultNotInTask(id.clone()));
        }
        Ok(row)
    }

    /// Results of a task matching the query, ordered by id.
    pub fn get_results(
        &self,
        task_id: &TaskId,
        query: &ResultQuery,
    ) -> Result<Vec<AssignmentResult>, AllocationError> {
        self.task(task_id)?;
        let rows = self.stores.results.results_for_task(task_id)?;
        Ok(rows
            .into_iter()
            .filter(|row| {
                query
                    .review_status
                    .map_or(true, |status| row.review_status == status)
            })
            .filter(|row| query.min_score.map_or(true, |min| row.compatibility_score >= min))
            .filter(|row| query.max_score.map_or(true, |max| row.compatibility_score <= max))
            .filter(|row| {
                query
                    .room_id
                    .as_deref()
                    .map_or(true, |room| row.room_id.0 == room)
            })
            .filter(|row| !query.problem_only || self.is_problem(row, self.problem_threshold))
            .collect())
    }

    fn is_problem(&self, row: &AssignmentResult, threshold: f64) -> bool {
        row.review_status == ReviewStatus::Pending && row.compatibility_score < threshold
    }

    /// Pending results below `threshold`, worst first.
    pub fn problem_list(
        &self,
        task_id: &TaskId,
        threshold: Option<f64>,
    ) -> Result<Vec<AssignmentResult>, AllocationError> {
        let threshold = threshold.unwrap_or(self.problem_threshold);
        self.task(task_id)?;
        let mut rows: Vec<AssignmentResult> = self
            .stores
            .results
            .results_for_task(task_id)?
            .into_iter()
            .filter(|row| self.is_problem(row, threshold))
            .collect();
        rows.sort_by(|a, b| {
            a.compatibility_score
                .total_cmp(&b.compatibility_score)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(rows)
    }

    /// Pending results become Confirmed; already confirmed ones are left alone.
    ///
    /// Every id is checked before anything is written, so a bad id leaves all rows as
    /// they were.
    pub fn confirm(
        &self,
        task_id: &TaskId,
        result_ids: &[ResultId],
    ) -> Result<Vec<AssignmentResult>, AllocationError> {
        self.completed_task(task_id)?;
        let _guards = self.result_locks.acquire(result_ids);

        let rows = result_ids
            .iter()
            .map(|id| {
                let row = self.row(task_id, id)?;
                if row.review_status == ReviewStatus::Rejected {
                    return Err(AllocationError::InvalidReviewTransition {
                        from: row.review_status.label(),
                        action: "confirm",
                    });
                }
                Ok(row)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let reviewed_at = Utc::now();
        let mut confirmed = Vec::with_capacity(rows.len());
        for mut row in rows {
            if row.review_status == ReviewStatus::Pending {
                row.review_status = ReviewStatus::Confirmed;
                row.reviewed_at = Some(reviewed_at);
                self.stores.results.update_review(row.clone())?;
            }
            confirmed.push(row);
        }

        tracing::info!(task_id = %task_id.0, results = confirmed.len(), "results confirmed");
        Ok(confirmed)
    }

    /// Confirms every Pending result of the task and returns how many changed.
    pub fn confirm_all(&self, task_id: &TaskId) -> Result<usize, AllocationError> {
        self.completed_task(task_id)?;
        let pending: Vec<ResultId> = self
            .stores
            .results
            .results_for_task(task_id)?
            .into_iter()
            .filter(|row| row.review_status == ReviewStatus::Pending)
            .map(|row| row.id)
            .collect();

        let _guards = self.result_locks.acquire(&pending);

        let reviewed_at = Utc::now();
        let mut changed = 0;
        for id in &pending {
            let mut row = self.row(task_id, id)?;
            // Another reviewer may have acted between listing and locking.
            if row.review_status != ReviewStatus::Pending {
                continue;
            }
            row.review_status = ReviewStatus::Confirmed;
            row.reviewed_at = Some(reviewed_at);
            self.stores.results.update_review(row)?;
            changed += 1;
        }

        tracing::info!(task_id = %task_id.0, confirmed = changed, "all pending results confirmed");
        Ok(changed)
    }

    /// Rejects results and frees their beds. Matching is not re-run for the students, but
    /// the roommates they leave behind are rescored.
    pub fn reject(
        &self,
        task_id: &TaskId,
        result_ids: &[ResultId],
        reason: Option<String>,
    ) -> Result<Vec<AssignmentResult>, AllocationError> {
        self.completed_task(task_id)?;
        let _guards = self.result_locks.acquire(result_ids);

        let rows = result_ids
            .iter()
            .map(|id| {
                let row = self.row(task_id, id)?;
                if row.review_status == ReviewStatus::Confirmed && !self.policy.reopen_confirmed {
                    return Err(AllocationError::InvalidReviewTransition {
                        from: row.review_status.label(),
                        action: "reject",
                    });
                }
                Ok(row)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let vacated: Vec<RoomId> = rows
            .iter()
            .filter(|row| row.holds_bed())
            .map(|row| row.room_id.clone())
            .collect();
        let _room_guards = self.room_locks.acquire(&vacated);

        let reviewed_at = Utc::now();
        let mut rejected = Vec::with_capacity(rows.len());
        for mut row in rows {
            if row.review_status != ReviewStatus::Rejected {
                row.review_status = ReviewStatus::Rejected;
                row.rejection_reason = reason.clone();
                row.reviewed_at = Some(reviewed_at);
                self.stores.results.release_bed(row.clone())?;
            }
            rejected.push(row);
        }
        self.rescore_rooms(&vacated)?;

        tracing::info!(task_id = %task_id.0, results = rejected.len(), "results rejected");
        Ok(rejected)
    }

    /// Moves a result to another bed after re-validating the hard constraints.
    ///
    /// On any failure nothing changes. The review status is kept and the score is
    /// recomputed against the new room's current occupants, as are the scores of everyone
    /// in the room left behind and the room joined.
    pub fn adjust(
        &self,
        result_id: &ResultId,
        new_bed_id: &BedId,
        reason: Option<String>,
    ) -> Result<AssignmentResult, AllocationError> {
        let _guards = self.result_locks.acquire([result_id]);

        let row = self
            .stores
            .results
            .result(result_id)?
            .ok_or_else(|| AllocationError::ResultNotFound(result_id.clone()))?;
        let task = self.completed_task(&row.task_id)?;
        if !row.holds_bed() {
            return Err(AllocationError::InvalidReviewTransition {
                from: row.review_status.label(),
                action: "adjust",
            });
        }
        if &row.bed_id == new_bed_id {
            return Ok(row);
        }

        let population = &self.stores.population;
        let bed = population
            .bed(new_bed_id)?
            .ok_or_else(|| AllocationError::BedNotFound(new_bed_id.0.clone()))?;
        let student = population
            .student(&row.student_id)?
            .ok_or_else(|| AllocationError::StudentNotFound(row.student_id.0.clone()))?;
        let config = self
            .stores
            .configs
            .get_config(&task.config_id)?
            .ok_or_else(|| AllocationError::ConfigNotFound(task.config_id.clone()))?;

        let touched = [row.room_id.clone(), bed.room_id.clone()];
        let _room_guards = self.room_locks.acquire(&touched);

        let room_beds = population.room_beds(&bed.room_id)?;
        let room_rows = self.stores.results.results_in_room(&bed.room_id)?;
        let view = CommittedRoom {
            target: bed.id.clone(),
            target_held: room_rows
                .iter()
                .any(|other| other.id != row.id && other.bed_id == bed.id),
            occupancy: room_beds
                .iter()
                .filter(|candidate| {
                    candidate.status == BedStatus::Occupied && candidate.id != row.bed_id
                })
                .count(),
        };

        let validator = ConstraintValidator::from_config(&config);
        if let Err(violation) = validator.validate(&student, &bed, &view) {
            tracing::warn!(
                result_id = %result_id.0,
                bed_id = %new_bed_id.0,
                violation = violation.kind(),
                "adjustment rejected"
            );
            return Err(violation.into());
        }

        let scorer = CompatibilityScorer::new(&config.weights);
        let mut roommates = Vec::new();
        for other in room_rows.iter().filter(|other| other.id != row.id) {
            if let Some(roommate) = population.student(&other.student_id)? {
                roommates.push(roommate.lifestyle);
            }
        }
        let roommate_refs: Vec<_> = roommates.iter().collect();

        let previous = row.bed_id.clone();
        let mut updated = row;
        updated.bed_id = bed.id.clone();
        updated.room_id = bed.room_id.clone();
        updated.compatibility_score =
            round_score(scorer.against(&student.lifestyle, &roommate_refs));
        updated.adjusted = true;
        updated.adjusted_at = Some(Utc::now());
        updated.adjustment_reason = reason;

        match self.stores.results.move_bed(updated.clone(), &previous) {
            Ok(()) => {}
            Err(RepositoryError::Conflict) => {
                tracing::warn!(
                    result_id = %result_id.0,
                    bed_id = %new_bed_id.0,
                    "bed taken concurrently"
                );
                return Err(ConstraintViolation::CapacityExceeded.into());
            }
            Err(other) => return Err(other.into()),
        }
        self.rescore_rooms(&touched)?;

        tracing::info!(
            result_id = %result_id.0,
            from = %previous.0,
            to = %updated.bed_id.0,
            "result adjusted"
        );
        Ok(updated)
    }

    /// Recomputes every held row in the rooms against its current roommates. Callers hold
    /// the room locks.
    fn rescore_rooms(&self, rooms: &[RoomId]) -> Result<(), AllocationError> {
        let mut rooms: Vec<&RoomId> = rooms.iter().collect();
        rooms.sort();
        rooms.dedup();

        let mut scorers: HashMap<TaskId, CompatibilityScorer> = HashMap::new();
        for room in rooms {
            let rows = self.stores.results.results_in_room(room)?;
            let mut lifestyles: Vec<Option<LifestyleVector>> = Vec::with_capacity(rows.len());
            for row in &rows {
                let student = self.stores.population.student(&row.student_id)?;
                lifestyles.push(student.map(|student| student.lifestyle));
            }

            let mut scores = Vec::with_capacity(rows.len());
            for (index, row) in rows.iter().enumerate() {
                let Some(own) = &lifestyles[index] else {
                    continue;
                };
                let scorer = match scorers.entry(row.task_id.clone()) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => entry.insert(self.scorer_for(&row.task_id)?),
                };
                let roommates: Vec<&LifestyleVector> = lifestyles
                    .iter()
                    .enumerate()
                    .filter(|(other, _)| *other != index)
                    .filter_map(|(_, lifestyle)| lifestyle.as_ref())
                    .collect();
                scores.push((row.id.clone(), round_score(scorer.against(own, &roommates))));
            }
            tracing::debug!(room_id = %room.0, rows = scores.len(), "room rescored");
            self.stores.results.rescore(scores)?;
        }
        Ok(())
    }

    fn scorer_for(&self, task_id: &TaskId) -> Result<CompatibilityScorer, AllocationError> {
        let task = self.task(task_id)?;
        let config = self
            .stores
            .configs
            .get_config(&task.config_id)?
            .ok_or_else(|| AllocationError::ConfigNotFound(task.config_id.clone()))?;
        Ok(CompatibilityScorer::new(&config.weights))
    }
}

/// Committed state of the room an adjustment targets, seen from the moving student.
struct CommittedRoom {
    target: BedId,
    target_held: bool,
    occupancy: usize,
}

impl OccupancyView for CommittedRoom {
    fn bed_taken(&self, bed: &BedId) -> bool {
        bed == &self.target && self.target_held
    }

    fn assigned_bed(&self, _student: &StudentId) -> Option<BedId> {
        // The student is leaving their current bed as part of this operation.
        None
    }

    fn room_occupancy(&self, _room: &RoomId) -> usize {
        self.occupancy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn striped_locks_never_grow_with_the_ids_seen() {
        let locks = StripedLocks::new(LOCK_STRIPES);
        let ids: Vec<ResultId> = (0..10_000)
            .map(|index| ResultId(format!("task-r{index:06}")))
            .collect();

        let guards = locks.acquire(&ids);

        assert!(guards.len() <= LOCK_STRIPES);
        drop(guards);
        assert_eq!(locks.stripes.len(), LOCK_STRIPES);
    }

    #[test]
    fn repeated_keys_share_one_stripe() {
        let locks = StripedLocks::new(8);
        let id = ResultId("task-r000001".to_string());

        assert_eq!(locks.stripe(&id), locks.stripe(&id.clone()));
        let guards = locks.acquire([&id, &id, &id]);
        assert_eq!(guards.len(), 1);
    }
}
