use serde::{Deserialize, Serialize};

use super::domain::{AllocationConfig, Bed, BedId, BedStatus, RoomId, Student, StudentId};

/// Hard-constraint violations. Automated matching skips the offending grouping; manual
/// adjustments surface them to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintViolation {
    #[error("bed or room capacity exceeded")]
    CapacityExceeded,
    #[error("bed gender eligibility does not match student")]
    GenderMismatch,
    #[error("bed is unavailable (maintenance or reserved)")]
    BedUnavailable,
    #[error("student already holds a bed")]
    StudentAlreadyAssigned,
}

impl ConstraintViolation {
    pub const fn kind(self) -> &'static str {
        match self {
            ConstraintViolation::CapacityExceeded => "capacity_exceeded",
            ConstraintViolation::GenderMismatch => "gender_mismatch",
            ConstraintViolation::BedUnavailable => "bed_unavailable",
            ConstraintViolation::StudentAlreadyAssigned => "student_already_assigned",
        }
    }
}

/// Occupancy facts the validator needs about the state a mapping would be applied to.
pub trait OccupancyView {
    /// Whether someone already sleeps in (or has been tentatively given) this bed.
    fn bed_taken(&self, bed: &BedId) -> bool;
    /// Bed currently held by the student, if any.
    fn assigned_bed(&self, student: &StudentId) -> Option<BedId>;
    /// Number of students currently in the room.
    fn room_occupancy(&self, room: &RoomId) -> usize;
}

/// Checks a proposed (student, bed) mapping against the hard constraints of a config.
#[derive(Debug, Clone)]
pub struct ConstraintValidator {
    enforce_gender: bool,
    room_limit: Option<usize>,
}

impl ConstraintValidator {
    pub fn from_config(config: &AllocationConfig) -> Self {
        Self {
            enforce_gender: config.enforce_gender,
            room_limit: config.capacity.room_limit(),
        }
    }

    pub fn enforces_gender(&self) -> bool {
        self.enforce_gender
    }

    pub fn room_limit(&self) -> Option<usize> {
        self.room_limit
    }

    pub fn validate(
        &self,
        student: &Student,
        bed: &Bed,
        state: &dyn OccupancyView,
    ) -> Result<(), ConstraintViolation> {
        if let Some(current) = state.assigned_bed(&student.id) {
            if current != bed.id {
                return Err(ConstraintViolation::StudentAlreadyAssigned);
            }
        }

        match bed.status {
            BedStatus::Maintenance | BedStatus::Reserved => {
                return Err(ConstraintViolation::BedUnavailable)
            }
            BedStatus::Occupied => return Err(ConstraintViolation::CapacityExceeded),
            BedStatus::Free => {}
        }

        if state.bed_taken(&bed.id) {
            return Err(ConstraintViolation::CapacityExceeded);
        }

        if let Some(limit) = self.room_limit {
            if state.room_occupancy(&bed.room_id) >= limit {
                return Err(ConstraintViolation::CapacityExceeded);
            }
        }

        if self.enforce_gender && !bed.gender_eligibility.admits(student.gender) {
            return Err(ConstraintViolation::GenderMismatch);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::domain::{
        AcademicStatus, CapacityPolicy, ConfigId, ConfigStatus, Gender, GenderEligibility,
        LifestyleVector, OrgGrouping, OrgPath,
    };
    use std::collections::{BTreeMap, HashMap, HashSet};

    #[derive(Default)]
    struct Snapshot {
        taken: HashSet<BedId>,
        holders: HashMap<StudentId, BedId>,
        rooms: HashMap<RoomId, usize>,
    }

    impl OccupancyView for Snapshot {
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

    fn config(enforce_gender: bool, capacity: CapacityPolicy) -> AllocationConfig {
        AllocationConfig {
            id: ConfigId("cfg".to_string()),
            name: "test".to_string(),
            algorithm_code: "cluster".to_string(),
            weights: BTreeMap::new(),
            enforce_gender,
            capacity,
            grouping: OrgGrouping::None,
            status: ConfigStatus::Enabled,
            exclusive: false,
        }
    }

    fn student(gender: Gender) -> Student {
        Student {
            id: StudentId("s-1".to_string()),
            name: "Student".to_string(),
            gender,
            org: OrgPath::default(),
            academic_status: AcademicStatus::Enrolled,
            enrollment_year: None,
            lifestyle: LifestyleVector::default(),
        }
    }

    fn bed(eligibility: GenderEligibility, status: BedStatus) -> Bed {
        Bed {
            id: BedId("b-1".to_string()),
            room_id: RoomId("r-1".to_string()),
            floor_id: "f-1".to_string(),
            building_id: "bld-1".to_string(),
            campus: String::new(),
            slot: 1,
            gender_eligibility: eligibility,
            status,
        }
    }

    #[test]
    fn accepts_eligible_free_bed() {
        let validator = ConstraintValidator::from_config(&config(true, CapacityPolicy::FillAll));
        let result = validator.validate(
            &student(Gender::Female),
            &bed(GenderEligibility::Female, BedStatus::Free),
            &Snapshot::default(),
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn rejects_gender_mismatch_only_when_enforced() {
        let male = student(Gender::Male);
        let female_bed = bed(GenderEligibility::Female, BedStatus::Free);

        let strict = ConstraintValidator::from_config(&config(true, CapacityPolicy::FillAll));
        assert_eq!(
            strict.validate(&male, &female_bed, &Snapshot::default()),
            Err(ConstraintViolation::GenderMismatch)
        );

        let relaxed = ConstraintValidator::from_config(&config(false, CapacityPolicy::FillAll));
        assert_eq!(
            relaxed.validate(&male, &female_bed, &Snapshot::default()),
            Ok(())
        );
    }

    #[test]
    fn maps_bed_status_to_violation_kinds() {
        let validator = ConstraintValidator::from_config(&config(true, CapacityPolicy::FillAll));
        let subject = student(Gender::Male);

        assert_eq!(
            validator.validate(
                &subject,
                &bed(GenderEligibility::Male, BedStatus::Maintenance),
                &Snapshot::default()
            ),
            Err(ConstraintViolation::BedUnavailable)
        );
        assert_eq!(
            validator.validate(
                &subject,
                &bed(GenderEligibility::Male, BedStatus::Occupied),
                &Snapshot::default()
            ),
            Err(ConstraintViolation::CapacityExceeded)
        );
    }

    #[test]
    fn rejects_second_bed_for_same_student() {
        let validator = ConstraintValidator::from_config(&config(true, CapacityPolicy::FillAll));
        let mut snapshot = Snapshot::default();
        snapshot.holders.insert(
            StudentId("s-1".to_string()),
            BedId("elsewhere".to_string()),
        );

        assert_eq!(
            validator.validate(
                &student(Gender::Male),
                &bed(GenderEligibility::Mixed, BedStatus::Free),
                &snapshot
            ),
            Err(ConstraintViolation::StudentAlreadyAssigned)
        );
    }

    #[test]
    fn enforces_room_limit_and_taken_beds() {
        let validator =
            ConstraintValidator::from_config(&config(false, CapacityPolicy::MaxPerRoom(2)));
        let subject = student(Gender::Male);
        let candidate = bed(GenderEligibility::Mixed, BedStatus::Free);

        let mut full_room = Snapshot::default();
        full_room.rooms.insert(RoomId("r-1".to_string()), 2);
        assert_eq!(
            validator.validate(&subject, &candidate, &full_room),
            Err(ConstraintViolation::CapacityExceeded)
        );

        let mut taken = Snapshot::default();
        taken.taken.insert(BedId("b-1".to_string()));
        assert_eq!(
            validator.validate(&subject, &candidate, &taken),
            Err(ConstraintViolation::CapacityExceeded)
        );
    }
}
