//! Step 6: how much weight does the authority carry?
//!
//! A fixed rule table keyed on the reporter. No model call.

use super::types::{Citation, CitationKind, Flag, FlagKind};

/// Scores below this earn a `WEAK_AUTHORITY` note.
pub const WEAK_AUTHORITY: f64 = 0.6;
const AGE_PENALTY_YEARS: i32 = 30;
const AGE_PENALTY: f64 = 0.1;
const FLOOR: f64 = 0.3;

/// (reporter prefix with whitespace removed, base score). First match wins.
const REPORTER_WEIGHTS: &[(&str, f64)] = &[
    ("U.S.", 1.0),
    ("S.Ct.", 1.0),
    ("L.Ed.", 1.0),
    ("Cal.App.", 0.8),
    ("Cal.Rptr.", 0.8),
    ("Cal.", 0.95),
    ("F.Supp.", 0.65),
    ("F.App'x", 0.6),
    ("F.", 0.85),
];
const OTHER_REPORTER: f64 = 0.5;
const STATUTE: f64 = 0.9;

fn base_score(citation: &Citation) -> f64 {
    if citation.kind == CitationKind::Statute {
        return STATUTE;
    }
    let Some(reporter) = citation.reporter.as_deref() else {
        return OTHER_REPORTER;
    };
    let compact: String = reporter.chars().filter(|c| !c.is_whitespace()).collect();
    REPORTER_WEIGHTS
        .iter()
        .find(|(prefix, _)| compact.starts_with(prefix))
        .map(|&(_, score)| score)
        .unwrap_or(OTHER_REPORTER)
}

pub fn authority_score(citation: &Citation, current_year: i32) -> f64 {
    let mut score = base_score(citation);
    if citation.kind != CitationKind::Statute
        && citation
            .year
            .is_some_and(|year| current_year - year > AGE_PENALTY_YEARS)
    {
        score -= AGE_PENALTY;
    }
    score.max(FLOOR)
}

pub fn authority_flag(score: f64) -> Option<Flag> {
    (score < WEAK_AUTHORITY)
        .then(|| Flag::new(FlagKind::WeakAuthority, format!("authority score {:.2}", score)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cite(reporter: &str, year: i32) -> Citation {
        Citation {
            reporter: Some(reporter.into()),
            year: Some(year),
            ..Default::default()
        }
    }

    #[test]
    fn reporter_table() {
        assert_eq!(authority_score(&cite("U.S.", 2010), 2026), 1.0);
        assert_eq!(authority_score(&cite("Cal.4th", 2010), 2026), 0.95);
        assert_eq!(authority_score(&cite("Cal. App. 5th", 2020), 2026), 0.8);
        assert_eq!(authority_score(&cite("F.3d", 2005), 2026), 0.85);
        assert_eq!(authority_score(&cite("F. Supp. 2d", 2005), 2026), 0.65);
        assert_eq!(authority_score(&cite("So. 2d", 2005), 2026), 0.5);
    }

    #[test]
    fn old_authority_loses_weight_but_not_below_floor() {
        let old = authority_score(&cite("F.3d", 1990), 2026);
        assert!((old - 0.75).abs() < 1e-9);
        assert!(authority_score(&Citation::default(), 2026) >= FLOOR);
    }

    #[test]
    fn weak_authority_is_a_note() {
        assert!(authority_flag(0.65).is_none());
        let flag = authority_flag(0.5).unwrap();
        assert_eq!(flag.kind, FlagKind::WeakAuthority);
    }
}
