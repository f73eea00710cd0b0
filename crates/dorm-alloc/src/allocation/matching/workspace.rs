use std::collections::{BTreeMap, HashMap, HashSet};

use rayon::prelude::*;

use super::{Placement, RoomTieBreak};
use crate::allocation::constraints::{ConstraintValidator, ConstraintViolation, OccupancyView};
use crate::allocation::domain::{Bed, BedId, BedStatus, Gender, RoomId, Student, StudentId};
use crate::allocation::scoring::{round_score, CompatibilityScorer};

/// Occupancy of a plan under construction, layered over the committed bed states.
#[derive(Debug, Clone, Default)]
pub struct TentativeOccupancy {
    taken: HashSet<BedId>,
    holders: HashMap<StudentId, BedId>,
    rooms: HashMap<RoomId, usize>,
}

impl TentativeOccupancy {
    /// Starts from the beds already occupied before the run.
    pub fn from_beds<'b>(beds: impl IntoIterator<Item = &'b Bed>) -> Self {
        let mut occupancy = Self::default();
        for bed in beds {
            if bed.status == BedStatus::Occupied {
                *occupancy.rooms.entry(bed.room_id.clone()).or_default() += 1;
            }
        }
        occupancy
    }

    pub fn record(&mut self, student: &StudentId, bed: &Bed) {
        self.taken.insert(bed.id.clone());
        self.holders.insert(student.clone(), bed.id.clone());
        *self.rooms.entry(bed.room_id.clone()).or_default() += 1;
    }

    fn exchange(&mut self, a: &StudentId, b: &StudentId) {
        let first = self.holders.get(a).cloned();
        let second = self.holders.get(b).cloned();
        let (Some(first), Some(second)) = (first, second) else {
            return;
        };
        self.holders.insert(a.clone(), second);
        self.holders.insert(b.clone(), first);
    }
}

impl OccupancyView for TentativeOccupancy {
    fn bed_taken(&self, bed: &BedId) -> bool {
        self.taken.contains(bed)
    }

    fn assigned_bed(&self, student: &StudentId) -> Option<BedId> {
        self.holders.get(student).cloned()
    }

    fn room_occupancy(&self, room: &RoomId) -> usize {
        self.rooms.get(room).copied().unwrap_or(0)
    }
}

/// View used when two placed students trade beds: occupancy counts do not change, so
/// only the per-bed rules apply.
struct SwapView;

impl OccupancyView for SwapView {
    fn bed_taken(&self, _bed: &BedId) -> bool {
        false
    }

    fn assigned_bed(&self, _student: &StudentId) -> Option<BedId> {
        None
    }

    fn room_occupancy(&self, _room: &RoomId) -> usize {
        0
    }
}

struct Room<'s> {
    id: RoomId,
    beds: Vec<&'s Bed>,
    occupants: Vec<(&'s Student, &'s Bed)>,
    bucket: Option<usize>,
}

/// Rooms and tentative placements shared by every batch of a run.
///
/// Rooms are handed out per eligibility bucket: once a bucket places a student in a room,
/// students of other buckets never join it.
pub struct Workspace<'s> {
    rooms: Vec<Room<'s>>,
    occupancy: TentativeOccupancy,
    validator: ConstraintValidator,
    scorer: CompatibilityScorer,
    bucket: usize,
    owned: Vec<usize>,
    placed: HashMap<StudentId, usize>,
}

impl<'s> Workspace<'s> {
    pub fn new(
        beds: &'s [Bed],
        validator: ConstraintValidator,
        scorer: CompatibilityScorer,
        tie_break: RoomTieBreak,
    ) -> Self {
        let mut by_room: BTreeMap<&RoomId, Vec<&'s Bed>> = BTreeMap::new();
        for bed in beds {
            by_room.entry(&bed.room_id).or_default().push(bed);
        }

        let mut rooms: Vec<Room<'s>> = by_room
            .into_iter()
            .filter(|(_, beds)| beds.iter().any(|bed| bed.status == BedStatus::Free))
            .map(|(id, mut beds)| {
                beds.sort_by(|a, b| a.slot.cmp(&b.slot).then_with(|| a.id.cmp(&b.id)));
                Room {
                    id: id.clone(),
                    beds,
                    occupants: Vec::new(),
                    bucket: None,
                }
            })
            .collect();

        if tie_break == RoomTieBreak::MostFreeBeds {
            // Stable sort keeps the room id order among equal counts.
            rooms.sort_by_key(|room| {
                std::cmp::Reverse(
                    room.beds
                        .iter()
                        .filter(|bed| bed.status == BedStatus::Free)
                        .count(),
                )
            });
        }

        Self {
            rooms,
            occupancy: TentativeOccupancy::from_beds(beds),
            validator,
            scorer,
            bucket: 0,
            owned: Vec::new(),
            placed: HashMap::new(),
        }
    }

    pub(super) fn enter_bucket(&mut self, bucket: usize) {
        if bucket != self.bucket {
            self.bucket = bucket;
            self.owned.clear();
        }
    }

    pub fn scorer(&self) -> &CompatibilityScorer {
        &self.scorer
    }

    pub fn room_id(&self, room: usize) -> &RoomId {
        &self.rooms[room].id
    }

    /// Students a further placement in this room could still take.
    pub fn capacity_left(&self, room: usize) -> usize {
        let room = &self.rooms[room];
        let open = room
            .beds
            .iter()
            .filter(|bed| bed.status == BedStatus::Free && !self.occupancy.bed_taken(&bed.id))
            .count();
        match self.validator.room_limit() {
            Some(limit) => open.min(limit.saturating_sub(self.occupancy.room_occupancy(&room.id))),
            None => open,
        }
    }

    fn admits(&self, room: usize, gender: Option<Gender>) -> bool {
        let Some(gender) = gender else {
            return true;
        };
        self.rooms[room].beds.iter().any(|bed| {
            bed.status == BedStatus::Free
                && !self.occupancy.bed_taken(&bed.id)
                && bed.gender_eligibility.admits(gender)
        })
    }

    /// Untouched rooms with space, in tie-break order.
    pub fn fresh_rooms(&self, gender: Option<Gender>) -> Vec<usize> {
        (0..self.rooms.len())
            .filter(|&room| self.rooms[room].bucket.is_none())
            .filter(|&room| self.capacity_left(room) > 0 && self.admits(room, gender))
            .collect()
    }

    /// First untouched room with space at or after `from`, in tie-break order.
    pub fn next_fresh_room(&self, from: usize, gender: Option<Gender>) -> Option<usize> {
        (from..self.rooms.len()).find(|&room| {
            self.rooms[room].bucket.is_none()
                && self.capacity_left(room) > 0
                && self.admits(room, gender)
        })
    }

    /// Rooms already used by the current bucket that still have space.
    pub fn partial_rooms(&self) -> Vec<usize> {
        self.owned
            .iter()
            .copied()
            .filter(|&room| self.capacity_left(room) > 0)
            .collect()
    }

    pub fn occupants(&self, room: usize) -> impl Iterator<Item = &'s Student> + '_ {
        self.rooms[room].occupants.iter().map(|(student, _)| *student)
    }

    pub fn occupant_count(&self, room: usize) -> usize {
        self.rooms[room].occupants.len()
    }

    pub fn holds(&self, student: &StudentId) -> bool {
        self.placed.contains_key(student)
    }

    pub fn room_of(&self, student: &StudentId) -> Option<usize> {
        self.placed.get(student).copied()
    }

    /// Puts the student on the first bed of the room that passes validation.
    pub fn try_place(
        &mut self,
        room: usize,
        student: &'s Student,
    ) -> Result<(), ConstraintViolation> {
        let mut last = ConstraintViolation::CapacityExceeded;
        let mut chosen = None;

        for bed in &self.rooms[room].beds {
            if self.occupancy.bed_taken(&bed.id) {
                continue;
            }
            match self.validator.validate(student, bed, &self.occupancy) {
                Ok(()) => {
                    chosen = Some(*bed);
                    break;
                }
                Err(ConstraintViolation::StudentAlreadyAssigned) => {
                    return Err(ConstraintViolation::StudentAlreadyAssigned)
                }
                Err(violation) => last = violation,
            }
        }

        let bed = chosen.ok_or(last)?;
        self.occupancy.record(&student.id, bed);
        self.placed.insert(student.id.clone(), room);

        let entry = &mut self.rooms[room];
        entry.occupants.push((student, bed));
        if entry.bucket.is_none() {
            entry.bucket = Some(self.bucket);
            self.owned.push(room);
        }
        Ok(())
    }

    fn seat(&self, student: &StudentId) -> Option<(usize, usize)> {
        let room = self.room_of(student)?;
        let position = self.rooms[room]
            .occupants
            .iter()
            .position(|(occupant, _)| &occupant.id == student)?;
        Some((room, position))
    }

    /// Exchanges the beds of two placed students when both still satisfy the constraints.
    pub fn try_swap(&mut self, a: &StudentId, b: &StudentId) -> bool {
        let (Some((room_a, pos_a)), Some((room_b, pos_b))) = (self.seat(a), self.seat(b)) else {
            return false;
        };
        if room_a == room_b {
            return false;
        }

        let (student_a, bed_a) = self.rooms[room_a].occupants[pos_a];
        let (student_b, bed_b) = self.rooms[room_b].occupants[pos_b];
        let allowed = self.validator.validate(student_a, bed_b, &SwapView).is_ok()
            && self.validator.validate(student_b, bed_a, &SwapView).is_ok();
        if !allowed {
            return false;
        }

        self.rooms[room_a].occupants[pos_a] = (student_b, bed_a);
        self.rooms[room_b].occupants[pos_b] = (student_a, bed_b);
        self.placed.insert(student_a.id.clone(), room_b);
        self.placed.insert(student_b.id.clone(), room_a);
        self.occupancy.exchange(&student_a.id, &student_b.id);
        true
    }

    /// Final per-student scores against the roommates placed by this run.
    pub(super) fn finish(self) -> Vec<Placement> {
        let scorer = &self.scorer;
        self.rooms
            .par_iter()
            .flat_map_iter(|room| {
                room.occupants.iter().map(move |(student, bed)| {
                    let roommates: Vec<_> = room
                        .occupants
                        .iter()
                        .filter(|(other, _)| other.id != student.id)
                        .map(|(other, _)| &other.lifestyle)
                        .collect();
                    Placement {
                        student_id: student.id.clone(),
                        bed_id: bed.id.clone(),
                        room_id: room.id.clone(),
                        score: round_score(scorer.against(&student.lifestyle, &roommates)),
                    }
                })
            })
            .collect()
    }
}
