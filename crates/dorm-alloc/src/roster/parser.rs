use std::io::Read;

use serde::Deserialize;

use crate::allocation::{
    AcademicStatus, Bed, BedId, BedStatus, Gender, GenderEligibility, LifestyleAttribute,
    LifestyleVector, OrgPath, RoomId, Student, StudentId,
};

use super::RosterImportError;

#[derive(Debug, Deserialize)]
struct StudentRow {
    id: String,
    name: String,
    gender: Gender,
    #[serde(default)]
    campus: String,
    #[serde(default)]
    department: String,
    #[serde(default)]
    major: String,
    #[serde(default)]
    class_code: String,
    academic_status: AcademicStatus,
    #[serde(default)]
    enrollment_year: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct BedRow {
    id: String,
    room_id: String,
    #[serde(default)]
    floor_id: String,
    building_id: String,
    #[serde(default)]
    campus: String,
    slot: u8,
    gender_eligibility: GenderEligibility,
    status: BedStatus,
}

fn reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(source)
}

/// Parses `students.csv`. Columns named after a lifestyle attribute key carry survey answers;
/// a blank cell means the question was not answered.
pub(crate) fn parse_students<R: Read>(source: R) -> Result<Vec<Student>, RosterImportError> {
    let mut csv_reader = reader(source);
    let headers = csv_reader.headers()?.clone();
    let survey_columns: Vec<(usize, LifestyleAttribute)> = headers
        .iter()
        .enumerate()
        .filter_map(|(index, name)| LifestyleAttribute::from_key(name).map(|attr| (index, attr)))
        .collect();

    let mut students = Vec::new();
    for (line, record) in csv_reader.records().enumerate() {
        let record = record?;
        let row: StudentRow = record.deserialize(Some(&headers))?;

        let mut lifestyle = LifestyleVector::default();
        for (index, attribute) in &survey_columns {
            let raw = record.get(*index).unwrap_or_default();
            if raw.is_empty() {
                continue;
            }
            let level = raw
                .parse::<u8>()
                .ok()
                .filter(|level| *level < attribute.levels())
                .ok_or_else(|| RosterImportError::InvalidAnswer {
                    row: line + 1,
                    column: attribute.key(),
                    value: raw.to_string(),
                })?;
            lifestyle = lifestyle.with(*attribute, level);
        }

        students.push(Student {
            id: StudentId(row.id),
            name: row.name,
            gender: row.gender,
            org: OrgPath {
                campus: row.campus,
                department: row.department,
                major: row.major,
                class_code: row.class_code,
            },
            academic_status: row.academic_status,
            enrollment_year: row.enrollment_year,
            lifestyle,
        });
    }

    Ok(students)
}

pub(crate) fn parse_beds<R: Read>(source: R) -> Result<Vec<Bed>, RosterImportError> {
    let mut csv_reader = reader(source);
    let mut beds = Vec::new();

    for row in csv_reader.deserialize::<BedRow>() {
        let row = row?;
        beds.push(Bed {
            id: BedId(row.id),
            room_id: RoomId(row.room_id),
            floor_id: row.floor_id,
            building_id: row.building_id,
            campus: row.campus,
            slot: row.slot,
            gender_eligibility: row.gender_eligibility,
            status: row.status,
        });
    }

    Ok(beds)
}
