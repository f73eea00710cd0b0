//! Pluggable matching strategies and the shared driver that runs them.
//!
//! The driver partitions students into eligibility buckets, splits buckets into lifestyle
//! sorted batches, scores each batch in parallel and then lets the selected strategy place
//! the batch into rooms through a [`Workspace`] that validates every tentative mapping.

mod annealing;
mod cluster;
mod greedy;
mod workspace;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::constraints::ConstraintValidator;
use super::domain::{AllocationConfig, Bed, BedId, Gender, RoomId, Student, StudentId, TaskPhase};
use super::scoring::{round_score, CompatibilityScorer};

pub use annealing::AnnealingStrategy;
pub use cluster::ClusterStrategy;
pub use greedy::GreedyStrategy;
pub use workspace::{TentativeOccupancy, Workspace};

/// Code of the strategy used when a caller does not care.
pub const DEFAULT_ALGORITHM: &str = "cluster";

/// Order in which equally eligible rooms are offered to a strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomTieBreak {
    #[default]
    LowestRoomId,
    MostFreeBeds,
}

impl RoomTieBreak {
    pub const fn label(self) -> &'static str {
        match self {
            RoomTieBreak::LowestRoomId => "lowest_room_id",
            RoomTieBreak::MostFreeBeds => "most_free_beds",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "lowest_room_id" => Some(RoomTieBreak::LowestRoomId),
            "most_free_beds" => Some(RoomTieBreak::MostFreeBeds),
            _ => None,
        }
    }
}

/// Knobs of the matching driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchingSettings {
    pub batch_size: usize,
    pub checkpoint_interval: usize,
    pub tie_break: RoomTieBreak,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            batch_size: 400,
            checkpoint_interval: 500,
            tie_break: RoomTieBreak::LowestRoomId,
        }
    }
}

/// Everything a strategy run consumes.
#[derive(Debug, Clone, Copy)]
pub struct MatchingInput<'a> {
    pub students: &'a [Student],
    pub beds: &'a [Bed],
    pub config: &'a AllocationConfig,
    pub settings: MatchingSettings,
}

/// One accepted student-to-bed mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub student_id: StudentId,
    pub bed_id: BedId,
    pub room_id: RoomId,
    pub score: f64,
}

/// Candidate assignment produced by a strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentPlan {
    pub placements: Vec<Placement>,
    pub unassigned: Vec<StudentId>,
}

impl AssignmentPlan {
    pub fn mean_score(&self) -> Option<f64> {
        if self.placements.is_empty() {
            return None;
        }
        let sum: f64 = self.placements.iter().map(|placement| placement.score).sum();
        Some(round_score(sum / self.placements.len() as f64))
    }
}

/// Raised when a checkpoint observes a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("run interrupted at a checkpoint")]
pub struct Interrupted;

/// Suspension point called by long running work to publish progress and poll cancellation.
pub trait Checkpoint: Sync {
    fn reached(&self, phase: TaskPhase, processed: usize, total: usize) -> Result<(), Interrupted>;
}

/// Checkpoint used when nobody observes the run.
pub struct Unobserved;

impl Checkpoint for Unobserved {
    fn reached(
        &self,
        _phase: TaskPhase,
        _processed: usize,
        _total: usize,
    ) -> Result<(), Interrupted> {
        Ok(())
    }
}

/// Row counter that forwards to a [`Checkpoint`] every `interval` units and at explicit
/// boundaries.
pub struct Progress<'c> {
    checkpoint: &'c dyn Checkpoint,
    interval: usize,
    processed: usize,
    since_last: usize,
    total: usize,
}

impl<'c> Progress<'c> {
    fn new(checkpoint: &'c dyn Checkpoint, interval: usize, total: usize) -> Self {
        Self {
            checkpoint,
            interval: interval.max(1),
            processed: 0,
            since_last: 0,
            total,
        }
    }

    /// Counts finished units and checkpoints when the interval has been crossed.
    pub fn advance(&mut self, phase: TaskPhase, units: usize) -> Result<(), Interrupted> {
        self.processed = (self.processed + units).min(self.total);
        self.since_last += units;
        if self.since_last >= self.interval {
            self.since_last = 0;
            return self.boundary(phase);
        }
        Ok(())
    }

    /// Checkpoints unconditionally without counting new units.
    pub fn boundary(&mut self, phase: TaskPhase) -> Result<(), Interrupted> {
        self.checkpoint.reached(phase, self.processed, self.total)
    }
}

/// Dense square matrix of pair scores inside one batch.
#[derive(Debug, Clone)]
pub struct PairMatrix {
    size: usize,
    scores: Vec<f64>,
}

impl PairMatrix {
    fn build(scorer: &CompatibilityScorer, students: &[&Student]) -> Self {
        let size = students.len();
        let scores = (0..size)
            .into_par_iter()
            .flat_map_iter(|row| {
                let left = &students[row].lifestyle;
                students
                    .iter()
                    .map(move |right| scorer.pair(left, &right.lifestyle))
            })
            .collect();
        Self { size, scores }
    }

    pub fn get(&self, a: usize, b: usize) -> f64 {
        self.scores[a * self.size + b]
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Students of one eligibility bucket matched together, with their pair scores.
pub struct Batch<'a> {
    /// Position of the batch in the run, used to derive deterministic seeds.
    pub number: usize,
    pub bucket: usize,
    pub gender: Option<Gender>,
    pub students: Vec<&'a Student>,
    pub matrix: PairMatrix,
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

/// Static description of a strategy, listed through the algorithm catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyDescriptor {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub advantages: &'static str,
    pub disadvantages: &'static str,
    pub recommended: bool,
}

/// Catalogue entry returned by `list_algorithms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmOption {
    pub code: String,
    pub name: String,
    pub description: String,
    pub advantages: String,
    pub disadvantages: String,
    pub recommended: bool,
    pub estimated_time: String,
}

/// A way of placing one scored batch into rooms.
pub trait MatchingStrategy: Send + Sync {
    fn descriptor(&self) -> StrategyDescriptor;

    /// Rough wall-clock hint for a population of the given size.
    fn estimated_time(&self, students: usize) -> &'static str;

    /// Places as many batch students as possible. Students left unplaced are reported as
    /// unassigned by the driver.
    fn place_batch<'s>(
        &self,
        batch: &Batch<'s>,
        workspace: &mut Workspace<'s>,
        progress: &mut Progress<'_>,
    ) -> Result<(), Interrupted>;
}

/// Strategies keyed by algorithm code.
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<&'static str, Arc<dyn MatchingStrategy>>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ClusterStrategy));
        registry.register(Arc::new(GreedyStrategy));
        registry.register(Arc::new(AnnealingStrategy::default()));
        registry
    }
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    /// Adds or replaces the strategy registered under its descriptor code.
    pub fn register(&mut self, strategy: Arc<dyn MatchingStrategy>) {
        self.strategies.insert(strategy.descriptor().code, strategy);
    }

    pub fn get(&self, code: &str) -> Option<Arc<dyn MatchingStrategy>> {
        self.strategies.get(code).cloned()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.strategies.contains_key(code)
    }

    /// Catalogue of registered strategies, recommended first.
    pub fn list_algorithms(&self, population: usize) -> Vec<AlgorithmOption> {
        let mut options: Vec<AlgorithmOption> = self
            .strategies
            .values()
            .map(|strategy| {
                let descriptor = strategy.descriptor();
                AlgorithmOption {
                    code: descriptor.code.to_string(),
                    name: descriptor.name.to_string(),
                    description: descriptor.description.to_string(),
                    advantages: descriptor.advantages.to_string(),
                    disadvantages: descriptor.disadvantages.to_string(),
                    recommended: descriptor.recommended,
                    estimated_time: strategy.estimated_time(population).to_string(),
                }
            })
            .collect();
        options.sort_by(|a, b| b.recommended.cmp(&a.recommended).then(a.code.cmp(&b.code)));
        options
    }
}

type BucketKey = (Option<Gender>, Option<String>);

fn bucket_students<'a>(
    students: &[&'a Student],
    config: &AllocationConfig,
) -> Vec<(BucketKey, Vec<&'a Student>)> {
    let mut buckets: BTreeMap<BucketKey, Vec<&'a Student>> = BTreeMap::new();
    for student in students {
        let gender = config.enforce_gender.then_some(student.gender);
        let group = config.grouping.key_for(&student.org);
        buckets.entry((gender, group)).or_default().push(*student);
    }

    buckets
        .into_iter()
        .map(|(key, mut members)| {
            // Similar answers land in the same batch.
            members.sort_by(|a, b| {
                a.lifestyle
                    .0
                    .cmp(&b.lifestyle.0)
                    .then_with(|| a.id.cmp(&b.id))
            });
            (key, members)
        })
        .collect()
}

/// Runs `strategy` over the whole population.
///
/// Progress is reported in `2 * students` units: one for scoring and one for matching each
/// student. Infeasible students end up in [`AssignmentPlan::unassigned`].
pub fn assign(
    strategy: &dyn MatchingStrategy,
    input: MatchingInput<'_>,
    checkpoint: &dyn Checkpoint,
) -> Result<AssignmentPlan, Interrupted> {
    let scorer = CompatibilityScorer::new(&input.config.weights);
    let validator = ConstraintValidator::from_config(input.config);
    let settings = input.settings;
    let batch_size = settings.batch_size.max(2);

    let mut seen = HashSet::new();
    let students: Vec<&Student> = input
        .students
        .iter()
        .filter(|student| seen.insert(&student.id))
        .collect();

    let mut progress = Progress::new(
        checkpoint,
        settings.checkpoint_interval,
        students.len() * 2,
    );
    let mut workspace = Workspace::new(
        input.beds,
        validator,
        scorer.clone(),
        settings.tie_break,
    );

    let buckets = bucket_students(&students, input.config);
    let mut planned = Vec::new();
    for (bucket, ((gender, _), members)) in buckets.iter().enumerate() {
        for chunk in members.chunks(batch_size) {
            let number = planned.len();
            planned.push((bucket, *gender, number, chunk.to_vec()));
        }
    }

    let window = rayon::current_num_threads().max(1);
    let mut unassigned = Vec::new();
    let mut pending = planned.into_iter().peekable();

    while pending.peek().is_some() {
        let window_batches: Vec<_> = pending.by_ref().take(window).collect();
        let batches: Vec<Batch<'_>> = window_batches
            .into_par_iter()
            .map(|(bucket, gender, number, members)| {
                let matrix = PairMatrix::build(&scorer, &members);
                Batch {
                    number,
                    bucket,
                    gender,
                    students: members,
                    matrix,
                }
            })
            .collect();

        for batch in &batches {
            progress.advance(TaskPhase::Scoring, batch.len())?;
        }

        for batch in &batches {
            workspace.enter_bucket(batch.bucket);
            strategy.place_batch(batch, &mut workspace, &mut progress)?;
            for student in &batch.students {
                if !workspace.holds(&student.id) {
                    unassigned.push(student.id.clone());
                }
            }
            progress.boundary(TaskPhase::Matching)?;
        }
    }

    let placements = workspace.finish();
    Ok(AssignmentPlan {
        placements,
        unassigned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lists_recommended_strategy_first() {
        let registry = StrategyRegistry::default();
        let options = registry.list_algorithms(800);

        assert_eq!(options.len(), 3);
        assert_eq!(options[0].code, DEFAULT_ALGORITHM);
        assert!(options[0].recommended);
        assert!(registry.contains("greedy"));
        assert!(registry.contains("annealing"));
        assert!(registry.get("stable_marriage").is_none());
    }

    #[test]
    fn tie_break_parses_known_labels() {
        assert_eq!(
            RoomTieBreak::parse("MOST_FREE_BEDS"),
            Some(RoomTieBreak::MostFreeBeds)
        );
        assert_eq!(
            RoomTieBreak::parse(RoomTieBreak::LowestRoomId.label()),
            Some(RoomTieBreak::LowestRoomId)
        );
        assert_eq!(RoomTieBreak::parse("random"), None);
    }
}
