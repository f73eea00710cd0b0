mod rules;
mod weights;

pub use weights::default_weights;

pub(crate) use rules::distinctiveness;

use std::collections::BTreeMap;

use super::domain::{LifestyleAttribute, LifestyleVector};

/// Score used when two students share no weighted survey answer.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Score of a student who has no roommates.
pub const SOLO_SCORE: f64 = 100.0;

/// Stateless, symmetric compatibility scorer over lifestyle survey answers.
#[derive(Debug, Clone)]
pub struct CompatibilityScorer {
    weights: Vec<(LifestyleAttribute, f64)>,
}

impl CompatibilityScorer {
    /// Builds a scorer; non-finite and non-positive weights drop the attribute.
    pub fn new(weights: &BTreeMap<LifestyleAttribute, f64>) -> Self {
        let weights = weights
            .iter()
            .filter(|(_, weight)| weight.is_finite() && **weight > 0.0)
            .map(|(attribute, weight)| (*attribute, *weight))
            .collect();
        Self { weights }
    }

    /// Weighted similarity of two students in `[0, 100]`.
    ///
    /// Attributes missing on either side are left out of both the weighted sum and the
    /// normalizing weight total.
    pub fn pair(&self, a: &LifestyleVector, b: &LifestyleVector) -> f64 {
        let mut applied = 0.0;
        let mut total = 0.0;

        for (attribute, weight) in &self.weights {
            let (Some(left), Some(right)) = (a.get(*attribute), b.get(*attribute)) else {
                continue;
            };
            applied += weight;
            total += weight * rules::similarity(*attribute, left, right);
        }

        if applied <= 0.0 {
            return NEUTRAL_SCORE;
        }

        (total / applied * 100.0).clamp(0.0, 100.0)
    }

    /// Mean pairwise score across all occupant pairs of a room.
    pub fn group(&self, members: &[&LifestyleVector]) -> f64 {
        if members.len() < 2 {
            return SOLO_SCORE;
        }

        let mut sum = 0.0;
        let mut pairs = 0usize;
        for (index, left) in members.iter().enumerate() {
            for right in &members[index + 1..] {
                sum += self.pair(left, right);
                pairs += 1;
            }
        }
        sum / pairs as f64
    }

    /// Mean score of `subject` against each of its roommates.
    pub fn against(&self, subject: &LifestyleVector, roommates: &[&LifestyleVector]) -> f64 {
        if roommates.is_empty() {
            return SOLO_SCORE;
        }

        let sum: f64 = roommates
            .iter()
            .map(|roommate| self.pair(subject, roommate))
            .sum();
        sum / roommates.len() as f64
    }
}

/// Rounds a score to two decimals for persistence.
pub fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}
