use super::matching::MatchingSettings;
use super::review::ReviewPolicy;

/// Threshold used by the problem list when the caller gives none.
pub const DEFAULT_PROBLEM_THRESHOLD: f64 = 60.0;

/// In-process tuning of the allocation engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Executions allowed to run at the same time.
    pub worker_pool_size: usize,
    pub matching: MatchingSettings,
    pub problem_threshold: f64,
    pub review: ReviewPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            matching: MatchingSettings::default(),
            problem_threshold: DEFAULT_PROBLEM_THRESHOLD,
            review: ReviewPolicy::default(),
        }
    }
}
