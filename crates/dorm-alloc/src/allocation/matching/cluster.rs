use super::{Batch, Interrupted, MatchingStrategy, Progress, StrategyDescriptor, Workspace};
use crate::allocation::constraints::ConstraintViolation;
use crate::allocation::domain::{LifestyleVector, TaskPhase};

/// Constrained greedy clustering: every room is seeded with the most compatible remaining
/// pair and grown with whoever raises the group score most.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterStrategy;

impl MatchingStrategy for ClusterStrategy {
    fn descriptor(&self) -> StrategyDescriptor {
        StrategyDescriptor {
            code: "cluster",
            name: "Constrained clustering",
            description: "Seeds each room with the most compatible remaining pair, then grows the group around it",
            advantages: "Weighs every student's habits evenly and gives balanced rooms; recommended",
            disadvantages: "Moderate speed; quality depends on batch size",
            recommended: true,
        }
    }

    fn estimated_time(&self, students: usize) -> &'static str {
        match students {
            0..=1000 => "about 5-15 seconds",
            1001..=5000 => "about 30-60 seconds",
            _ => "about 1-2 minutes",
        }
    }

    fn place_batch<'s>(
        &self,
        batch: &Batch<'s>,
        workspace: &mut Workspace<'s>,
        progress: &mut Progress<'_>,
    ) -> Result<(), Interrupted> {
        let mut remaining: Vec<usize> = (0..batch.len()).collect();
        let mut rooms = workspace.partial_rooms();
        rooms.extend(workspace.fresh_rooms(batch.gender));

        for room in rooms {
            if remaining.is_empty() {
                break;
            }
            let capacity = workspace.capacity_left(room);
            if capacity == 0 {
                continue;
            }

            let anchors: Vec<&LifestyleVector> =
                workspace.occupants(room).map(|student| &student.lifestyle).collect();
            let group = form_group(batch, workspace, &anchors, &remaining, capacity);

            for member in group {
                match workspace.try_place(room, batch.students[member]) {
                    Ok(()) | Err(ConstraintViolation::StudentAlreadyAssigned) => {
                        remaining.retain(|&index| index != member);
                        progress.advance(TaskPhase::Matching, 1)?;
                    }
                    // Only this grouping is abandoned; the student stays available.
                    Err(_) => {}
                }
            }
        }

        progress.advance(TaskPhase::Matching, remaining.len())
    }
}

/// Picks up to `capacity` batch indices for one room.
fn form_group(
    batch: &Batch<'_>,
    workspace: &Workspace<'_>,
    anchors: &[&LifestyleVector],
    remaining: &[usize],
    capacity: usize,
) -> Vec<usize> {
    let mut group = Vec::with_capacity(capacity);
    let mut pool: Vec<usize> = remaining.to_vec();

    if anchors.is_empty() {
        if capacity == 1 || pool.len() == 1 {
            group.push(pool.remove(0));
            return group;
        }

        let (mut seed_a, mut seed_b, mut best) = (0, 1, f64::NEG_INFINITY);
        for (i, &left) in pool.iter().enumerate() {
            for (j, &right) in pool.iter().enumerate().skip(i + 1) {
                let score = batch.matrix.get(left, right);
                if score > best {
                    best = score;
                    seed_a = i;
                    seed_b = j;
                }
            }
        }
        group.push(pool[seed_a]);
        group.push(pool[seed_b]);
        pool.remove(seed_b);
        pool.remove(seed_a);
    }

    let anchor_score = |candidate: usize| -> f64 {
        let student = &batch.students[candidate].lifestyle;
        anchors
            .iter()
            .map(|anchor| workspace.scorer().pair(student, anchor))
            .sum()
    };

    while group.len() < capacity && !pool.is_empty() {
        let mut best_index = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (position, &candidate) in pool.iter().enumerate() {
            let score: f64 = group
                .iter()
                .map(|&member| batch.matrix.get(candidate, member))
                .sum::<f64>()
                + anchor_score(candidate);
            if score > best_score {
                best_score = score;
                best_index = position;
            }
        }
        group.push(pool.remove(best_index));
    }

    group
}
