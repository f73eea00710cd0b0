use super::super::domain::LifestyleAttribute;

/// How two answers to the same question are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Comparison {
    /// Yes/no questions: full credit on agreement, nothing otherwise.
    Exact,
    /// Scaled questions: credit falls off linearly with the distance between levels.
    Ordinal,
}

pub(crate) fn comparison_for(attribute: LifestyleAttribute) -> Comparison {
    match attribute {
        LifestyleAttribute::SmokingStatus
        | LifestyleAttribute::SmokingTolerance
        | LifestyleAttribute::Snores => Comparison::Exact,
        _ => Comparison::Ordinal,
    }
}

/// Similarity of two answers in `[0, 1]`. Out-of-range levels are clamped to the scale.
pub(crate) fn similarity(attribute: LifestyleAttribute, a: u8, b: u8) -> f64 {
    let top = attribute.levels().saturating_sub(1);
    let (a, b) = (a.min(top), b.min(top));

    match comparison_for(attribute) {
        Comparison::Exact => {
            if a == b {
                1.0
            } else {
                0.0
            }
        }
        Comparison::Ordinal => {
            if top == 0 {
                return 1.0;
            }
            let distance = a.abs_diff(b) as f64;
            1.0 - distance / top as f64
        }
    }
}

/// Rough measure of how hard a student is to place: strong habits first.
pub(crate) fn distinctiveness(lifestyle: &super::super::domain::LifestyleVector) -> u32 {
    let mut score = 0;
    if lifestyle.get(LifestyleAttribute::SmokingStatus) == Some(1) {
        score += 10;
    }
    match lifestyle.get(LifestyleAttribute::SleepSchedule) {
        Some(0) | Some(3) => score += 8,
        _ => {}
    }
    if lifestyle.get(LifestyleAttribute::SensitiveToSound) == Some(1) {
        score += 5;
    }
    if lifestyle.get(LifestyleAttribute::Snores) == Some(1) {
        score += 5;
    }
    score
}
