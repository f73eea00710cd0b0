use std::collections::BTreeMap;

use super::super::domain::LifestyleAttribute;

/// Default survey weights. Habits that tend to end roommate relationships weigh the most.
pub fn default_weights() -> BTreeMap<LifestyleAttribute, f64> {
    LifestyleAttribute::ALL
        .iter()
        .map(|attribute| (*attribute, default_weight(*attribute)))
        .collect()
}

fn default_weight(attribute: LifestyleAttribute) -> f64 {
    match attribute {
        LifestyleAttribute::SmokingStatus | LifestyleAttribute::SmokingTolerance => 3.0,
        LifestyleAttribute::SleepSchedule => 2.5,
        LifestyleAttribute::CleanlinessLevel | LifestyleAttribute::SensitiveToSound => 2.0,
        LifestyleAttribute::Snores
        | LifestyleAttribute::SensitiveToLight
        | LifestyleAttribute::StudyEnvironment
        | LifestyleAttribute::AllowVisitors => 1.5,
        _ => 1.0,
    }
}
