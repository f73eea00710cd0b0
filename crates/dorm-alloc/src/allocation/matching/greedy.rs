use std::collections::HashSet;

use super::{Batch, Interrupted, MatchingStrategy, Progress, StrategyDescriptor, Workspace};
use crate::allocation::constraints::ConstraintViolation;
use crate::allocation::domain::{LifestyleVector, Student, TaskPhase};
use crate::allocation::scoring::{distinctiveness, NEUTRAL_SCORE};

/// Places students one at a time, hardest to house first, into the room whose current
/// occupants suit them best.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyStrategy;

impl GreedyStrategy {
    /// Visit order: most distinctive habits first, then by id.
    pub(crate) fn order<'s>(batch: &Batch<'s>) -> Vec<&'s Student> {
        let mut students = batch.students.clone();
        students.sort_by(|a, b| {
            distinctiveness(&b.lifestyle)
                .cmp(&distinctiveness(&a.lifestyle))
                .then_with(|| a.id.cmp(&b.id))
        });
        students
    }

    /// Places every student of the batch, returning how many found a bed.
    pub(crate) fn place_all<'s>(
        batch: &Batch<'s>,
        workspace: &mut Workspace<'s>,
        progress: &mut Progress<'_>,
    ) -> Result<usize, Interrupted> {
        let mut placed = 0;
        let mut fresh_cursor = 0;

        for student in Self::order(batch) {
            let mut excluded = HashSet::new();
            loop {
                let Some(room) = best_room(workspace, student, batch, &excluded, fresh_cursor)
                else {
                    break;
                };
                match workspace.try_place(room, student) {
                    Ok(()) => {
                        placed += 1;
                        break;
                    }
                    Err(ConstraintViolation::StudentAlreadyAssigned) => break,
                    Err(_) => {
                        excluded.insert(room);
                    }
                }
            }
            fresh_cursor = workspace
                .next_fresh_room(fresh_cursor, batch.gender)
                .unwrap_or(fresh_cursor);
            progress.advance(TaskPhase::Matching, 1)?;
        }

        Ok(placed)
    }
}

fn best_room(
    workspace: &Workspace<'_>,
    student: &Student,
    batch: &Batch<'_>,
    excluded: &HashSet<usize>,
    fresh_cursor: usize,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    let mut consider = |room: usize, score: f64| match best {
        Some((_, current)) if current >= score => {}
        _ => best = Some((room, score)),
    };

    for room in workspace.partial_rooms() {
        if excluded.contains(&room) {
            continue;
        }
        let roommates: Vec<&LifestyleVector> = workspace
            .occupants(room)
            .map(|occupant| &occupant.lifestyle)
            .collect();
        let score = if roommates.is_empty() {
            NEUTRAL_SCORE
        } else {
            workspace.scorer().against(&student.lifestyle, &roommates)
        };
        consider(room, score);
    }

    let mut from = fresh_cursor;
    while let Some(room) = workspace.next_fresh_room(from, batch.gender) {
        if !excluded.contains(&room) {
            consider(room, NEUTRAL_SCORE);
            break;
        }
        from = room + 1;
    }

    best.map(|(room, _)| room)
}

impl MatchingStrategy for GreedyStrategy {
    fn descriptor(&self) -> StrategyDescriptor {
        StrategyDescriptor {
            code: "greedy",
            name: "Greedy placement",
            description: "Finds the best bed for each student in turn, hardest to house first",
            advantages: "Very fast; suited to quick previews and tight deadlines",
            disadvantages: "Depends on processing order and may miss the global optimum",
            recommended: false,
        }
    }

    fn estimated_time(&self, students: usize) -> &'static str {
        match students {
            0..=1000 => "about 2-5 seconds",
            1001..=5000 => "about 10-20 seconds",
            _ => "about 30-60 seconds",
        }
    }

    fn place_batch<'s>(
        &self,
        batch: &Batch<'s>,
        workspace: &mut Workspace<'s>,
        progress: &mut Progress<'_>,
    ) -> Result<(), Interrupted> {
        Self::place_all(batch, workspace, progress).map(|_| ())
    }
}
