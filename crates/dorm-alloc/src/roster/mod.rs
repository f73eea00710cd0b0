//! CSV roster import hydrating the in-memory population store.

mod parser;

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use tracing::info;

use crate::allocation::{Bed, InMemoryStore, RepositoryError, Student};

#[derive(Debug)]
pub enum RosterImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidAnswer {
        row: usize,
        column: &'static str,
        value: String,
    },
    DuplicateId(String),
    Store(RepositoryError),
}

impl std::fmt::Display for RosterImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RosterImportError::Io(err) => write!(f, "failed to read roster file: {}", err),
            RosterImportError::Csv(err) => write!(f, "invalid roster CSV data: {}", err),
            RosterImportError::InvalidAnswer { row, column, value } => write!(
                f,
                "row {} has an out-of-range answer '{}' for {}",
                row, value, column
            ),
            RosterImportError::DuplicateId(id) => write!(f, "roster id {} appears twice", id),
            RosterImportError::Store(err) => write!(f, "could not load roster: {}", err),
        }
    }
}

impl std::error::Error for RosterImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RosterImportError::Io(err) => Some(err),
            RosterImportError::Csv(err) => Some(err),
            RosterImportError::Store(err) => Some(err),
            RosterImportError::InvalidAnswer { .. } | RosterImportError::DuplicateId(_) => None,
        }
    }
}

impl From<std::io::Error> for RosterImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for RosterImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<RepositoryError> for RosterImportError {
    fn from(err: RepositoryError) -> Self {
        Self::Store(err)
    }
}

/// Students and beds read from a pair of roster exports.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub students: Vec<Student>,
    pub beds: Vec<Bed>,
}

impl Roster {
    pub fn from_paths<S: AsRef<Path>, B: AsRef<Path>>(
        students: S,
        beds: B,
    ) -> Result<Self, RosterImportError> {
        let students = std::fs::File::open(students)?;
        let beds = std::fs::File::open(beds)?;
        Self::from_readers(students, beds)
    }

    pub fn from_readers<S: Read, B: Read>(
        students: S,
        beds: B,
    ) -> Result<Self, RosterImportError> {
        let students = parser::parse_students(students)?;
        let beds = parser::parse_beds(beds)?;
        ensure_unique(students.iter().map(|student| student.id.0.as_str()))?;
        ensure_unique(beds.iter().map(|bed| bed.id.0.as_str()))?;
        Ok(Self { students, beds })
    }

    /// Loads the roster into `store`, replacing records that share an id.
    pub fn load_into(self, store: &InMemoryStore) -> Result<(), RosterImportError> {
        let (students, beds) = (self.students.len(), self.beds.len());
        store.load_population(self.students, self.beds)?;
        info!(students, beds, "roster loaded");
        Ok(())
    }
}

fn ensure_unique<'a>(ids: impl Iterator<Item = &'a str>) -> Result<(), RosterImportError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(RosterImportError::DuplicateId(id.to_string()));
        }
    }
    Ok(())
}
