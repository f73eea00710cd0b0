use crate::cli::RosterArgs;
use crate::infra::{allocation_service, hydrated_store, DEFAULT_CONFIG_ID};
use clap::Args;
use dorm_alloc::allocation::{
    AcademicStatus, AllocationError, AllocationTask, AssignmentResult, Bed, BedId, BedStatus,
    ConfigId, EngineSettings, Gender, GenderEligibility, LifestyleAttribute, LifestyleVector,
    NewTask, OrgPath, RoomId, Student, StudentId, TaskPreview, DEFAULT_ALGORITHM,
    DEFAULT_PROBLEM_THRESHOLD,
};
use dorm_alloc::error::AppError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;

const DEPARTMENTS: [&str; 3] = ["engineering", "arts", "science"];
const BEDS_PER_ROOM: usize = 4;

#[derive(Args, Debug)]
pub(crate) struct PreviewArgs {
    /// Path to the students.csv export
    #[arg(long)]
    pub(crate) students: PathBuf,
    /// Path to the beds.csv export
    #[arg(long)]
    pub(crate) beds: PathBuf,
    /// Matching strategy to preview
    #[arg(long, default_value = DEFAULT_ALGORITHM)]
    pub(crate) algorithm: String,
    /// Scores below this are flagged as problems
    #[arg(long, default_value_t = DEFAULT_PROBLEM_THRESHOLD)]
    pub(crate) threshold: f64,
    /// Print every candidate placement
    #[arg(long)]
    pub(crate) list: bool,
}

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Number of generated students
    #[arg(long, default_value_t = 120)]
    pub(crate) students: usize,
    /// Seed of the generated population
    #[arg(long, default_value_t = 7)]
    pub(crate) seed: u64,
    /// Matching strategy to run
    #[arg(long, default_value = DEFAULT_ALGORITHM)]
    pub(crate) algorithm: String,
    /// Confirm every result once the run completes
    #[arg(long)]
    pub(crate) confirm: bool,
}

pub(crate) async fn run_preview(args: PreviewArgs) -> Result<(), AppError> {
    let PreviewArgs {
        students,
        beds,
        algorithm,
        threshold,
        list,
    } = args;

    let store = hydrated_store(&RosterArgs {
        students: Some(students),
        beds: Some(beds),
        algorithm,
    })?;
    let service = allocation_service(&store, EngineSettings::default());

    let task = service.create_task(demo_task("Roster preview"))?;
    let preview = service.preview_task(&task.id).await?;
    render_preview(&preview, threshold, list);
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        students,
        seed,
        algorithm,
        confirm,
    } = args;

    let store = hydrated_store(&RosterArgs {
        students: None,
        beds: None,
        algorithm,
    })?;
    let (population, beds) = synthetic_population(students, seed);
    store
        .load_population(population, beds)
        .map_err(AllocationError::from)?;
    let service = allocation_service(&store, EngineSettings::default());

    println!("Dormitory allocation demo ({students} students, seed {seed})");
    let task = service.create_task(demo_task("Demo intake"))?;

    let preview = service.preview_task(&task.id).await?;
    render_preview(&preview, DEFAULT_PROBLEM_THRESHOLD, false);

    service.execute_task(&task.id).await?;
    let finished = service.wait_for_completion(&task.id).await?;
    render_task(&finished);

    let problems = service.get_problem_list(&task.id, None)?;
    println!(
        "\nProblem list (score below {DEFAULT_PROBLEM_THRESHOLD:.0}): {} results",
        problems.len()
    );
    for row in problems.iter().take(10) {
        print_result(row);
    }

    if confirm {
        let confirmed = service.confirm_all_results(&task.id)?;
        println!("\nConfirmed {confirmed} results");
    }

    Ok(())
}

fn demo_task(name: &str) -> NewTask {
    NewTask {
        config_id: ConfigId(DEFAULT_CONFIG_ID.to_string()),
        name: name.to_string(),
        scope: Default::default(),
    }
}

fn render_preview(preview: &TaskPreview, threshold: f64, list: bool) {
    let flagged = preview
        .placements
        .iter()
        .filter(|placement| placement.score < threshold)
        .count();

    println!("\nPreview with '{}'", preview.algorithm_code);
    println!(
        "- {} students considered | {} placed | {} unassigned",
        preview.students_considered,
        preview.placements.len(),
        preview.unassigned.len()
    );
    match preview.mean_score {
        Some(mean) => println!("- mean compatibility {mean:.1}"),
        None => println!("- mean compatibility n/a"),
    }
    println!("- {flagged} placements below {threshold:.0}");

    if list {
        for placement in &preview.placements {
            println!(
                "  {} -> {} ({}) score {:.1}",
                placement.student_id.0, placement.bed_id.0, placement.room_id.0, placement.score
            );
        }
    }
}

fn render_task(task: &AllocationTask) {
    println!("\nTask {} finished as {}", task.id.0, task.status.label());
    let Some(summary) = &task.summary else {
        if let Some(failure) = &task.failure {
            println!("- failure: {failure}");
        }
        return;
    };

    println!(
        "- {} considered | {} ineligible skipped | {} assigned | {} unassigned",
        summary.students_considered,
        summary.ineligible,
        summary.assigned,
        summary.unassigned.len()
    );
    if summary.commit_conflicts > 0 {
        println!("- {} commit conflicts", summary.commit_conflicts);
    }
    if let Some(mean) = summary.mean_score {
        println!("- mean compatibility {mean:.1}");
    }
}

fn print_result(row: &AssignmentResult) {
    println!(
        "  {} in {} ({}) score {:.1}",
        row.student_id.0, row.room_id.0, row.bed_id.0, row.compatibility_score
    );
}

/// Generates a reproducible population: students answer most survey questions and beds come
/// in four-bed rooms split by gender, with one mixed room under maintenance.
pub(crate) fn synthetic_population(students: usize, seed: u64) -> (Vec<Student>, Vec<Bed>) {
    let mut rng = StdRng::seed_from_u64(seed);

    let population: Vec<Student> = (0..students)
        .map(|index| {
            let gender = if rng.random_bool(0.5) {
                Gender::Female
            } else {
                Gender::Male
            };
            let department = DEPARTMENTS[rng.random_range(0..DEPARTMENTS.len())];
            let lifestyle = LifestyleAttribute::ALL.iter().fold(
                LifestyleVector::default(),
                |vector, attribute| {
                    if rng.random_bool(0.85) {
                        vector.with(*attribute, rng.random_range(0..attribute.levels()))
                    } else {
                        vector
                    }
                },
            );
            let academic_status = if rng.random_bool(0.05) {
                AcademicStatus::Suspended
            } else {
                AcademicStatus::Enrolled
            };

            Student {
                id: StudentId(format!("stu-{index:05}")),
                name: format!("Student {index}"),
                gender,
                org: OrgPath {
                    campus: "main".to_string(),
                    department: department.to_string(),
                    major: format!("{department}-major"),
                    class_code: format!("{department}-2025"),
                },
                academic_status,
                enrollment_year: Some(2025),
                lifestyle,
            }
        })
        .collect();

    let females = population
        .iter()
        .filter(|student| student.gender == Gender::Female)
        .count();
    let males = population.len() - females;

    let mut beds = Vec::new();
    append_rooms(&mut beds, "hall-f", females, GenderEligibility::Female);
    append_rooms(&mut beds, "hall-m", males, GenderEligibility::Male);
    let mut maintenance = room_beds("hall-x", 1, GenderEligibility::Mixed);
    for bed in &mut maintenance {
        bed.status = BedStatus::Maintenance;
    }
    beds.extend(maintenance);

    (population, beds)
}

fn append_rooms(beds: &mut Vec<Bed>, building: &str, students: usize, gender: GenderEligibility) {
    let rooms = students.div_ceil(BEDS_PER_ROOM);
    for room in 1..=rooms {
        beds.extend(room_beds(building, room, gender));
    }
}

fn room_beds(building: &str, room: usize, gender: GenderEligibility) -> Vec<Bed> {
    let room_id = format!("{building}-{room:03}");
    (1..=BEDS_PER_ROOM)
        .map(|slot| Bed {
            id: BedId(format!("{room_id}-{slot}")),
            room_id: RoomId(room_id.clone()),
            floor_id: format!("{building}-floor-{}", room / 10 + 1),
            building_id: building.to_string(),
            campus: "main".to_string(),
            slot: slot as u8,
            gender_eligibility: gender,
            status: BedStatus::Free,
        })
        .collect()
}
