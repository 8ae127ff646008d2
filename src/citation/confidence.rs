//! Composite confidence across the step scores.

use super::types::StepScores;

pub const CRITICAL_WEIGHT: f64 = 2.0;
pub const SUPPORTING_WEIGHT: f64 = 1.0;

/// Weighted mean of the steps that ran. Existence, holding, quote and bad
/// law count double; dicta (as `1 - risk`) and authority count once.
/// Returns 0 when nothing ran.
pub fn composite(scores: &StepScores) -> f64 {
    let weighted = [
        (scores.existence, CRITICAL_WEIGHT),
        (scores.holding, CRITICAL_WEIGHT),
        (scores.quote, CRITICAL_WEIGHT),
        (scores.bad_law, CRITICAL_WEIGHT),
        (scores.dicta_risk.map(|risk| 1.0 - risk), SUPPORTING_WEIGHT),
        (scores.authority, SUPPORTING_WEIGHT),
    ];
    let (sum, total) = weighted
        .iter()
        .filter_map(|&(score, weight)| score.map(|s| (s.clamp(0.0, 1.0) * weight, weight)))
        .fold((0.0, 0.0), |(sum, total), (s, w)| (sum + s, total + w));
    if total == 0.0 {
        0.0
    } else {
        (sum / total).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_ran_is_zero() {
        assert_eq!(composite(&StepScores::default()), 0.0);
    }

    #[test]
    fn critical_steps_count_double() {
        let scores = StepScores {
            existence: Some(1.0),
            authority: Some(0.4),
            ..Default::default()
        };
        // (2 * 1.0 + 0.4) / 3
        assert!((composite(&scores) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn dicta_risk_is_inverted() {
        let scores = StepScores {
            dicta_risk: Some(0.25),
            ..Default::default()
        };
        assert!((composite(&scores) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn all_perfect_is_one() {
        let scores = StepScores {
            existence: Some(1.0),
            holding: Some(1.0),
            dicta_risk: Some(0.0),
            quote: Some(1.0),
            bad_law: Some(1.0),
            authority: Some(1.0),
        };
        assert_eq!(composite(&scores), 1.0);
    }
}
