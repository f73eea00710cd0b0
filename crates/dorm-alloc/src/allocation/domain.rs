use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for students in the population snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StudentId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BedId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResultId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub const fn label(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

/// Which students a bed may house.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenderEligibility {
    Male,
    Female,
    Mixed,
}

impl GenderEligibility {
    pub fn admits(self, gender: Gender) -> bool {
        matches!(
            (self, gender),
            (GenderEligibility::Mixed, _)
                | (GenderEligibility::Male, Gender::Male)
                | (GenderEligibility::Female, Gender::Female)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcademicStatus {
    Enrolled,
    Suspended,
    Graduated,
}

/// Organizational path of a student, from campus down to class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgPath {
    pub campus: String,
    pub department: String,
    pub major: String,
    pub class_code: String,
}

/// Lifestyle survey questions. Every answer is an ordinal level starting at zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LifestyleAttribute {
    SmokingStatus,
    SmokingTolerance,
    SleepSchedule,
    SleepQuality,
    Snores,
    SensitiveToLight,
    SensitiveToSound,
    CleanlinessLevel,
    BedtimeCleanup,
    SocialPreference,
    AllowVisitors,
    PhoneCallTime,
    StudyInRoom,
    StudyEnvironment,
    ComputerUsageTime,
    GamingPreference,
    MusicPreference,
    MusicVolume,
    EatInRoom,
}

impl LifestyleAttribute {
    pub const ALL: [LifestyleAttribute; 19] = [
        LifestyleAttribute::SmokingStatus,
        LifestyleAttribute::SmokingTolerance,
        LifestyleAttribute::SleepSchedule,
        LifestyleAttribute::SleepQuality,
        LifestyleAttribute::Snores,
        LifestyleAttribute::SensitiveToLight,
        LifestyleAttribute::SensitiveToSound,
        LifestyleAttribute::CleanlinessLevel,
        LifestyleAttribute::BedtimeCleanup,
        LifestyleAttribute::SocialPreference,
        LifestyleAttribute::AllowVisitors,
        LifestyleAttribute::PhoneCallTime,
        LifestyleAttribute::StudyInRoom,
        LifestyleAttribute::StudyEnvironment,
        LifestyleAttribute::ComputerUsageTime,
        LifestyleAttribute::GamingPreference,
        LifestyleAttribute::MusicPreference,
        LifestyleAttribute::MusicVolume,
        LifestyleAttribute::EatInRoom,
    ];

    /// Number of answer levels on the survey scale.
    pub const fn levels(self) -> u8 {
        match self {
            LifestyleAttribute::SmokingStatus
            | LifestyleAttribute::SmokingTolerance
            | LifestyleAttribute::Snores
            | LifestyleAttribute::SensitiveToLight
            | LifestyleAttribute::SensitiveToSound => 2,
            LifestyleAttribute::SleepQuality
            | LifestyleAttribute::SocialPreference
            | LifestyleAttribute::AllowVisitors
            | LifestyleAttribute::PhoneCallTime
            | LifestyleAttribute::GamingPreference
            | LifestyleAttribute::MusicPreference
            | LifestyleAttribute::MusicVolume
            | LifestyleAttribute::EatInRoom => 3,
            LifestyleAttribute::SleepSchedule
            | LifestyleAttribute::BedtimeCleanup
            | LifestyleAttribute::StudyInRoom
            | LifestyleAttribute::StudyEnvironment
            | LifestyleAttribute::ComputerUsageTime => 4,
            LifestyleAttribute::CleanlinessLevel => 5,
        }
    }

    pub const fn key(self) -> &'static str {
        match self {
            LifestyleAttribute::SmokingStatus => "smoking_status",
            LifestyleAttribute::SmokingTolerance => "smoking_tolerance",
            LifestyleAttribute::SleepSchedule => "sleep_schedule",
            LifestyleAttribute::SleepQuality => "sleep_quality",
            LifestyleAttribute::Snores => "snores",
            LifestyleAttribute::SensitiveToLight => "sensitive_to_light",
            LifestyleAttribute::SensitiveToSound => "sensitive_to_sound",
            LifestyleAttribute::CleanlinessLevel => "cleanliness_level",
            LifestyleAttribute::BedtimeCleanup => "bedtime_cleanup",
            LifestyleAttribute::SocialPreference => "social_preference",
            LifestyleAttribute::AllowVisitors => "allow_visitors",
            LifestyleAttribute::PhoneCallTime => "phone_call_time",
            LifestyleAttribute::StudyInRoom => "study_in_room",
            LifestyleAttribute::StudyEnvironment => "study_environment",
            LifestyleAttribute::ComputerUsageTime => "computer_usage_time",
            LifestyleAttribute::GamingPreference => "gaming_preference",
            LifestyleAttribute::MusicPreference => "music_preference",
            LifestyleAttribute::MusicVolume => "music_volume",
            LifestyleAttribute::EatInRoom => "eat_in_room",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|attribute| attribute.key() == key)
    }
}

/// Survey answers for one student. Unanswered questions are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifestyleVector(pub BTreeMap<LifestyleAttribute, u8>);

impl LifestyleVector {
    pub fn get(&self, attribute: LifestyleAttribute) -> Option<u8> {
        self.0.get(&attribute).copied()
    }

    pub fn with(mut self, attribute: LifestyleAttribute, level: u8) -> Self {
        self.0.insert(attribute, level);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub gender: Gender,
    pub org: OrgPath,
    pub academic_status: AcademicStatus,
    #[serde(default)]
    pub enrollment_year: Option<u16>,
    #[serde(default)]
    pub lifestyle: LifestyleVector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BedStatus {
    Free,
    Occupied,
    Maintenance,
    Reserved,
}

impl BedStatus {
    pub const fn label(self) -> &'static str {
        match self {
            BedStatus::Free => "free",
            BedStatus::Occupied => "occupied",
            BedStatus::Maintenance => "maintenance",
            BedStatus::Reserved => "reserved",
        }
    }
}

/// One sleeping slot. Multi-bed rooms are modelled as several beds sharing a room id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bed {
    pub id: BedId,
    pub room_id: RoomId,
    pub floor_id: String,
    pub building_id: String,
    #[serde(default)]
    pub campus: String,
    pub slot: u8,
    pub gender_eligibility: GenderEligibility,
    pub status: BedStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStatus {
    Enabled,
    Disabled,
}

/// How many students a single room may hold after allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy", content = "limit")]
pub enum CapacityPolicy {
    /// Every free bed may be filled.
    FillAll,
    /// Occupancy of a room never exceeds the given number of students.
    MaxPerRoom(u8),
}

impl CapacityPolicy {
    pub fn room_limit(self) -> Option<usize> {
        match self {
            CapacityPolicy::FillAll => None,
            CapacityPolicy::MaxPerRoom(limit) => Some(limit as usize),
        }
    }
}

/// Organizational attribute students must share to be matched together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgGrouping {
    None,
    Campus,
    Department,
    Major,
    Class,
}

impl OrgGrouping {
    pub fn key_for(self, org: &OrgPath) -> Option<String> {
        match self {
            OrgGrouping::None => None,
            OrgGrouping::Campus => Some(org.campus.clone()),
            OrgGrouping::Department => Some(org.department.clone()),
            OrgGrouping::Major => Some(org.major.clone()),
            OrgGrouping::Class => Some(org.class_code.clone()),
        }
    }
}

/// Reusable allocation template maintained by administrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationConfig {
    pub id: ConfigId,
    pub name: String,
    pub algorithm_code: String,
    pub weights: BTreeMap<LifestyleAttribute, f64>,
    pub enforce_gender: bool,
    pub capacity: CapacityPolicy,
    pub grouping: OrgGrouping,
    pub status: ConfigStatus,
    #[serde(default)]
    pub exclusive: bool,
}

/// Population filter carried by a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationScope {
    #[serde(default)]
    pub campus: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub class_code: Option<String>,
    #[serde(default)]
    pub building_ids: Vec<String>,
}

impl PopulationScope {
    pub fn admits_student(&self, student: &Student) -> bool {
        fn matches(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().map_or(true, |expected| expected == value)
        }

        matches(&self.campus, &student.org.campus)
            && matches(&self.department, &student.org.department)
            && matches(&self.major, &student.org.major)
            && matches(&self.class_code, &student.org.class_code)
    }

    pub fn admits_bed(&self, bed: &Bed) -> bool {
        let campus_ok = self
            .campus
            .as_deref()
            .map_or(true, |campus| bed.campus.is_empty() || bed.campus == campus);
        let building_ok =
            self.building_ids.is_empty() || self.building_ids.contains(&bed.building_id);
        campus_ok && building_ok
    }
}

/// Task life cycle. See `TaskStatus::can_execute` for the re-execution rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    Previewed,
    Queued,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub const fn label(self) -> &'static str {
        match self {
            TaskStatus::Draft => "draft",
            TaskStatus::Previewed => "previewed",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Failed => "failed",
        }
    }

    pub const fn is_active(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed
        )
    }

    pub const fn can_preview(self) -> bool {
        matches!(self, TaskStatus::Draft | TaskStatus::Previewed)
    }

    pub const fn can_execute(self) -> bool {
        matches!(
            self,
            TaskStatus::Draft | TaskStatus::Previewed | TaskStatus::Cancelled | TaskStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Pending,
    Loading,
    Scoring,
    Matching,
    Persisting,
    Finished,
}

impl TaskPhase {
    pub const fn label(self) -> &'static str {
        match self {
            TaskPhase::Pending => "pending",
            TaskPhase::Loading => "loading",
            TaskPhase::Scoring => "scoring",
            TaskPhase::Matching => "matching",
            TaskPhase::Persisting => "persisting",
            TaskPhase::Finished => "finished",
        }
    }
}

/// Outcome of a completed execution, persisted on the task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub algorithm_code: String,
    pub students_considered: usize,
    pub ineligible: usize,
    pub assigned: usize,
    pub unassigned: Vec<StudentId>,
    pub commit_conflicts: usize,
    pub mean_score: Option<f64>,
}

/// Unit of orchestration and exclusivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationTask {
    pub id: TaskId,
    pub config_id: ConfigId,
    pub name: String,
    pub scope: PopulationScope,
    pub status: TaskStatus,
    pub progress: u8,
    pub phase: TaskPhase,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancellation_requested: bool,
    pub summary: Option<RunSummary>,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl ReviewStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Confirmed => "confirmed",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

/// A student-to-bed mapping produced by a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub id: ResultId,
    pub task_id: TaskId,
    pub student_id: StudentId,
    pub bed_id: BedId,
    pub room_id: RoomId,
    pub compatibility_score: f64,
    pub review_status: ReviewStatus,
    pub adjustment_reason: Option<String>,
    pub rejection_reason: Option<String>,
    pub adjusted: bool,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub adjusted_at: Option<DateTime<Utc>>,
}

impl AssignmentResult {
    /// Rejected rows are kept for audit but no longer hold their bed.
    pub fn holds_bed(&self) -> bool {
        self.review_status != ReviewStatus::Rejected
    }
}
