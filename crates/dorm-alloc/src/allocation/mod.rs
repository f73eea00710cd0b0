//! Allocation task engine: assigns students to dormitory beds by lifestyle compatibility.
//!
//! Tasks move through a guarded life cycle driven by [`TaskOrchestrator`]. Executions run on
//! a bounded worker pool, report progress at checkpoints, and publish their results in a
//! single commit that [`ResultReview`] then lets administrators confirm, reject or adjust.

pub mod constraints;
pub mod domain;
pub mod error;
pub mod matching;
pub mod memory;
pub mod orchestrator;
pub mod repository;
pub mod review;
pub mod router;
pub mod scoring;
pub mod service;
pub mod settings;

#[cfg(test)]
mod tests;

pub use constraints::{ConstraintValidator, ConstraintViolation, OccupancyView};
pub use domain::{
    AcademicStatus, AllocationConfig, AllocationTask, AssignmentResult, Bed, BedId, BedStatus,
    CapacityPolicy, ConfigId, ConfigStatus, Gender, GenderEligibility, LifestyleAttribute,
    LifestyleVector, OrgGrouping, OrgPath, PopulationScope, ResultId, ReviewStatus, RoomId,
    RunSummary, Student, StudentId, TaskId, TaskPhase, TaskStatus,
};
pub use error::AllocationError;
pub use matching::{
    AlgorithmOption, AnnealingStrategy, AssignmentPlan, ClusterStrategy, GreedyStrategy,
    MatchingSettings, MatchingStrategy, Placement, RoomTieBreak, StrategyRegistry,
    DEFAULT_ALGORITHM,
};
pub use memory::InMemoryStore;
pub use orchestrator::{NewTask, TaskOrchestrator, TaskPreview, TaskProgress};
pub use repository::{
    AllocationStores, CommitReport, ConfigProvider, PopulationProvider, RepositoryError,
    ResultStore, RunId, TaskStore,
};
pub use review::{ResultQuery, ResultReview, ReviewPolicy};
pub use router::allocation_router;
pub use scoring::{default_weights, CompatibilityScorer};
pub use service::AllocationService;
pub use settings::{EngineSettings, DEFAULT_PROBLEM_THRESHOLD};
