use super::common::*;
use std::collections::{HashMap, HashSet};

use crate::allocation::matching::{
    assign, Checkpoint, Interrupted, MatchingInput, MatchingSettings, Unobserved,
};
use crate::allocation::{
    AllocationConfig, AssignmentPlan, Bed, BedStatus, CapacityPolicy, Gender, GenderEligibility,
    MatchingStrategy, OrgGrouping, RoomTieBreak, StrategyRegistry, Student, TaskPhase,
};

fn run(
    code: &str,
    students: &[Student],
    beds: &[Bed],
    config: &AllocationConfig,
    settings: MatchingSettings,
) -> AssignmentPlan {
    let registry = StrategyRegistry::default();
    let strategy = registry.get(code).expect("registered strategy");
    assign(
        strategy.as_ref(),
        MatchingInput {
            students,
            beds,
            config,
            settings,
        },
        &Unobserved,
    )
    .expect("uninterrupted run")
}

fn rooms_of(plan: &AssignmentPlan) -> HashMap<String, Vec<String>> {
    let mut rooms: HashMap<String, Vec<String>> = HashMap::new();
    for placement in &plan.placements {
        rooms
            .entry(placement.room_id.0.clone())
            .or_default()
            .push(placement.student_id.0.clone());
    }
    for members in rooms.values_mut() {
        members.sort();
    }
    rooms
}

fn assert_hard_constraints(plan: &AssignmentPlan, students: &[Student], beds: &[Bed]) {
    let beds_by_id: HashMap<_, _> = beds.iter().map(|bed| (&bed.id, bed)).collect();
    let students_by_id: HashMap<_, _> = students.iter().map(|s| (&s.id, s)).collect();

    let used: HashSet<_> = plan.placements.iter().map(|p| &p.bed_id).collect();
    assert_eq!(used.len(), plan.placements.len(), "a bed was used twice");
    let housed: HashSet<_> = plan.placements.iter().map(|p| &p.student_id).collect();
    assert_eq!(housed.len(), plan.placements.len(), "a student was placed twice");
    assert_eq!(plan.placements.len() + plan.unassigned.len(), students.len());

    for placement in &plan.placements {
        let bed = beds_by_id[&placement.bed_id];
        let student = students_by_id[&placement.student_id];
        assert_eq!(bed.status, BedStatus::Free);
        assert_eq!(bed.room_id, placement.room_id);
        assert!(bed.gender_eligibility.admits(student.gender));
        assert!((0.0..=100.0).contains(&placement.score));
    }
}

fn night_and_day() -> (Vec<Student>, Vec<Bed>) {
    let students = vec![
        night_owl("s-1", Gender::Female),
        early_bird("s-2", Gender::Female),
        night_owl("s-3", Gender::Female),
        early_bird("s-4", Gender::Female),
    ];
    (students, double_rooms(2, GenderEligibility::Mixed))
}

#[test]
fn every_strategy_honours_the_hard_constraints() {
    let mut students = vec![
        night_owl("s-01", Gender::Female),
        early_bird("s-02", Gender::Male),
        night_owl("s-03", Gender::Male),
        early_bird("s-04", Gender::Female),
        night_owl("s-05", Gender::Female),
        early_bird("s-06", Gender::Male),
        student("s-07", Gender::Female, &[]),
    ];
    students[6].org.department = "arts".to_string();
    let mut beds = double_rooms(2, GenderEligibility::Female);
    beds.push(bed("room-7-a", "room-7", 1, GenderEligibility::Male));
    beds.push(bed("room-7-b", "room-7", 2, GenderEligibility::Male));
    beds.push(bed("room-8-a", "room-8", 1, GenderEligibility::Mixed));
    let mut taken = bed("room-8-b", "room-8", 2, GenderEligibility::Mixed);
    taken.status = BedStatus::Occupied;
    beds.push(taken);
    let mut config = config(CONFIG, "cluster");
    config.grouping = OrgGrouping::Department;

    for code in ["cluster", "greedy", "annealing"] {
        let plan = run(code, &students, &beds, &config, MatchingSettings::default());
        assert_hard_constraints(&plan, &students, &beds);
    }
}

#[test]
fn clustering_keeps_similar_students_together() {
    let (students, beds) = night_and_day();
    let config = config(CONFIG, "cluster");

    let plan = run("cluster", &students, &beds, &config, MatchingSettings::default());

    let mut rooms: Vec<Vec<String>> = rooms_of(&plan).into_values().collect();
    rooms.sort();
    assert_eq!(
        rooms,
        vec![
            vec!["s-1".to_string(), "s-3".to_string()],
            vec!["s-2".to_string(), "s-4".to_string()],
        ]
    );
    assert!(plan.placements.iter().all(|p| p.score == 100.0));
    assert_eq!(plan.mean_score(), Some(100.0));
}

#[test]
fn greedy_places_each_student_with_the_best_roommates_available() {
    let (students, beds) = night_and_day();
    let config = config(CONFIG, "greedy");

    let plan = run("greedy", &students, &beds, &config, MatchingSettings::default());

    let rooms = rooms_of(&plan);
    assert_eq!(rooms.len(), 2);
    for members in rooms.values() {
        let owls = members.iter().filter(|id| *id == "s-1" || *id == "s-3").count();
        assert!(owls == 0 || owls == 2, "mixed room {members:?}");
    }
}

#[test]
fn annealing_is_reproducible_for_a_seed() {
    let students: Vec<Student> = (0..12)
        .map(|index| {
            let id = format!("s-{index:02}");
            if index % 3 == 0 {
                night_owl(&id, Gender::Female)
            } else {
                early_bird(&id, Gender::Female)
            }
        })
        .collect();
    let beds = double_rooms(6, GenderEligibility::Female);
    let config = config(CONFIG, "annealing");

    let first = run("annealing", &students, &beds, &config, MatchingSettings::default());
    let second = run("annealing", &students, &beds, &config, MatchingSettings::default());

    assert_eq!(first, second);
    assert_hard_constraints(&first, &students, &beds);
}

#[test]
fn room_limit_caps_occupancy() {
    let (students, beds) = night_and_day();
    let mut config = config(CONFIG, "cluster");
    config.capacity = CapacityPolicy::MaxPerRoom(1);

    for code in ["cluster", "greedy", "annealing"] {
        let plan = run(code, &students, &beds, &config, MatchingSettings::default());

        assert_eq!(plan.placements.len(), 2, "{code}");
        assert_eq!(plan.unassigned.len(), 2, "{code}");
        assert!(rooms_of(&plan).values().all(|members| members.len() == 1));
    }
}

#[test]
fn unusable_beds_are_never_offered() {
    let students = vec![night_owl("s-1", Gender::Female), night_owl("s-2", Gender::Female)];
    let mut beds = double_rooms(1, GenderEligibility::Mixed);
    beds[0].status = BedStatus::Maintenance;
    beds[1].status = BedStatus::Reserved;
    let config = config(CONFIG, "cluster");

    let plan = run("cluster", &students, &beds, &config, MatchingSettings::default());

    assert!(plan.placements.is_empty());
    assert_eq!(plan.unassigned.len(), 2);
}

#[test]
fn org_grouping_keeps_departments_apart() {
    let mut students = vec![
        night_owl("s-1", Gender::Female),
        night_owl("s-2", Gender::Female),
        night_owl("s-3", Gender::Female),
        night_owl("s-4", Gender::Female),
    ];
    students[1].org.department = "arts".to_string();
    students[3].org.department = "arts".to_string();
    let beds = double_rooms(2, GenderEligibility::Mixed);
    let mut config = config(CONFIG, "cluster");
    config.grouping = OrgGrouping::Department;

    let plan = run("cluster", &students, &beds, &config, MatchingSettings::default());

    let mut rooms: Vec<Vec<String>> = rooms_of(&plan).into_values().collect();
    rooms.sort();
    assert_eq!(
        rooms,
        vec![
            vec!["s-1".to_string(), "s-3".to_string()],
            vec!["s-2".to_string(), "s-4".to_string()],
        ]
    );
}

#[test]
fn tie_break_decides_which_room_is_offered_first() {
    let students = vec![night_owl("s-1", Gender::Female)];
    let beds = vec![
        bed("room-1-a", "room-1", 1, GenderEligibility::Mixed),
        bed("room-2-a", "room-2", 1, GenderEligibility::Mixed),
        bed("room-2-b", "room-2", 2, GenderEligibility::Mixed),
        bed("room-2-c", "room-2", 3, GenderEligibility::Mixed),
    ];
    let config = config(CONFIG, "cluster");

    let lowest = run("cluster", &students, &beds, &config, MatchingSettings::default());
    let roomiest = run(
        "cluster",
        &students,
        &beds,
        &config,
        MatchingSettings {
            tie_break: RoomTieBreak::MostFreeBeds,
            ..MatchingSettings::default()
        },
    );

    assert_eq!(lowest.placements[0].room_id.0, "room-1");
    assert_eq!(roomiest.placements[0].room_id.0, "room-2");
}

#[test]
fn small_batches_still_place_everyone() {
    let students: Vec<Student> = (0..9)
        .map(|index| early_bird(&format!("s-{index}"), Gender::Male))
        .collect();
    let beds = double_rooms(5, GenderEligibility::Male);
    let config = config(CONFIG, "cluster");
    let settings = MatchingSettings {
        batch_size: 2,
        checkpoint_interval: 1,
        ..MatchingSettings::default()
    };

    let plan = run("cluster", &students, &beds, &config, settings);

    assert_eq!(plan.placements.len(), 9);
    assert_hard_constraints(&plan, &students, &beds);
}

#[test]
fn duplicate_students_are_placed_once() {
    let twin = night_owl("s-1", Gender::Female);
    let students = vec![twin.clone(), twin];
    let beds = double_rooms(1, GenderEligibility::Mixed);
    let config = config(CONFIG, "greedy");

    let plan = run("greedy", &students, &beds, &config, MatchingSettings::default());

    assert_eq!(plan.placements.len(), 1);
    assert!(plan.unassigned.is_empty());
}

struct StopImmediately;

impl Checkpoint for StopImmediately {
    fn reached(
        &self,
        _phase: TaskPhase,
        _processed: usize,
        _total: usize,
    ) -> Result<(), Interrupted> {
        Err(Interrupted)
    }
}

#[test]
fn interruption_at_a_checkpoint_aborts_the_run() {
    let (students, beds) = night_and_day();
    let config = config(CONFIG, "cluster");
    let registry = StrategyRegistry::default();
    let strategy = registry.get("cluster").expect("cluster");

    let outcome = assign(
        strategy.as_ref(),
        MatchingInput {
            students: &students,
            beds: &beds,
            config: &config,
            settings: MatchingSettings::default(),
        },
        &StopImmediately,
    );

    assert_eq!(outcome, Err(Interrupted));
}

#[test]
fn catalogue_describes_each_strategy() {
    let registry = StrategyRegistry::default();

    let options = registry.list_algorithms(200);
    let codes: Vec<&str> = options.iter().map(|option| option.code.as_str()).collect();

    assert_eq!(codes, vec!["cluster", "annealing", "greedy"]);
    assert!(options.iter().all(|option| !option.estimated_time.is_empty()));
    let strategy = registry.get("annealing").expect("annealing");
    assert_ne!(strategy.estimated_time(100), strategy.estimated_time(50_000));
    assert!(!strategy.descriptor().recommended);
}
