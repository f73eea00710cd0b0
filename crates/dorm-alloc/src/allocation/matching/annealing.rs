use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::greedy::GreedyStrategy;
use super::{Batch, Interrupted, MatchingStrategy, Progress, StrategyDescriptor, Workspace};
use crate::allocation::domain::{Student, TaskPhase};

/// Simulated annealing over bed swaps, starting from the greedy placement of each batch.
#[derive(Debug, Clone, Copy)]
pub struct AnnealingStrategy {
    pub initial_temperature: f64,
    pub cooling_rate: f64,
    pub min_temperature: f64,
    /// Base seed; each batch mixes in its own number so runs are reproducible.
    pub seed: u64,
}

impl Default for AnnealingStrategy {
    fn default() -> Self {
        Self {
            initial_temperature: 50.0,
            cooling_rate: 0.97,
            min_temperature: 0.1,
            seed: 42,
        }
    }
}

impl MatchingStrategy for AnnealingStrategy {
    fn descriptor(&self) -> StrategyDescriptor {
        StrategyDescriptor {
            code: "annealing",
            name: "Simulated annealing",
            description: "Searches the space of bed swaps with a cooling acceptance probability",
            advantages: "Escapes local optima and gives the best overall compatibility",
            disadvantages: "Slowest option; meant for runs where quality matters most",
            recommended: false,
        }
    }

    fn estimated_time(&self, students: usize) -> &'static str {
        match students {
            0..=500 => "about 30-60 seconds",
            501..=2000 => "about 2-5 minutes",
            _ => "about 5-10 minutes",
        }
    }

    fn place_batch<'s>(
        &self,
        batch: &Batch<'s>,
        workspace: &mut Workspace<'s>,
        progress: &mut Progress<'_>,
    ) -> Result<(), Interrupted> {
        GreedyStrategy::place_all(batch, workspace, progress)?;

        let placed: Vec<&'s Student> = batch
            .students
            .iter()
            .copied()
            .filter(|student| workspace.holds(&student.id))
            .collect();
        if placed.len() < 2 || self.cooling_rate <= 0.0 || self.cooling_rate >= 1.0 {
            return Ok(());
        }

        let mut rng = StdRng::seed_from_u64(self.seed ^ batch.number as u64);
        let mut temperature = self.initial_temperature;

        while temperature > self.min_temperature {
            for _ in 0..placed.len() {
                let first = placed[rng.random_range(0..placed.len())];
                let second = placed[rng.random_range(0..placed.len())];
                let (Some(room_a), Some(room_b)) =
                    (workspace.room_of(&first.id), workspace.room_of(&second.id))
                else {
                    continue;
                };
                if room_a == room_b {
                    continue;
                }

                let delta = swap_delta(workspace, first, second, room_a, room_b);
                let accept = delta > 0.0 || rng.random::<f64>() < (delta / temperature).exp();
                if accept {
                    workspace.try_swap(&first.id, &second.id);
                }
            }
            temperature *= self.cooling_rate;
            progress.boundary(TaskPhase::Matching)?;
        }

        Ok(())
    }
}

/// Change of the summed pair scores of both rooms if `a` and `b` traded places.
fn swap_delta(
    workspace: &Workspace<'_>,
    a: &Student,
    b: &Student,
    room_a: usize,
    room_b: usize,
) -> f64 {
    let scorer = workspace.scorer();
    let gain = |incoming: &Student, leaving: &Student, room: usize| -> f64 {
        workspace
            .occupants(room)
            .filter(|occupant| occupant.id != leaving.id)
            .map(|occupant| {
                scorer.pair(&incoming.lifestyle, &occupant.lifestyle)
                    - scorer.pair(&leaving.lifestyle, &occupant.lifestyle)
            })
            .sum()
    };
    gain(b, a, room_a) + gain(a, b, room_b)
}
