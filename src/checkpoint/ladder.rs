//! Timeout ladder for unanswered checkpoints.
//!
//! Stages are a pure function of the time elapsed since the checkpoint was
//! raised; nothing about the ladder is stored beyond which notices went out.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use docket_common::CheckpointType;

use crate::config::HoldLadderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LadderStage {
    Initial,
    Reminder,
    Escalation,
    FinalNotice,
    /// Auto-refund and close. Only HOLD and CP3 have one.
    Terminal,
}

impl LadderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Reminder => "reminder",
            Self::Escalation => "escalation",
            Self::FinalNotice => "final_notice",
            Self::Terminal => "terminal",
        }
    }
}

impl fmt::Display for LadderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ladder {
    /// Offsets from the trigger, ascending. Always starts with `Initial`
    /// at zero.
    steps: Vec<(LadderStage, Duration)>,
}

impl Ladder {
    pub fn for_checkpoint(kind: CheckpointType, config: &HoldLadderConfig) -> Self {
        let mut steps = vec![
            (LadderStage::Initial, Duration::zero()),
            (LadderStage::Reminder, Duration::hours(config.reminder_hours)),
            (LadderStage::Escalation, Duration::hours(config.escalation_hours)),
            (LadderStage::FinalNotice, Duration::hours(config.final_notice_hours)),
        ];
        let terminal = match kind {
            CheckpointType::Hold => Some(config.hold_terminal_hours),
            CheckpointType::Cp3 => Some(config.cp3_terminal_hours),
            CheckpointType::Cp1 | CheckpointType::Cp2 => None,
        };
        if let Some(hours) = terminal {
            steps.push((LadderStage::Terminal, Duration::hours(hours)));
        }
        Self { steps }
    }

    pub fn has_terminal(&self) -> bool {
        self.steps.iter().any(|(stage, _)| *stage == LadderStage::Terminal)
    }

    /// Absolute times of every step after the initial notice.
    pub fn schedule(&self, triggered_at: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.steps
            .iter()
            .skip(1)
            .map(|(_, offset)| triggered_at + *offset)
            .collect()
    }

    /// The latest stage already reached at `now`.
    pub fn stage_at(&self, triggered_at: DateTime<Utc>, now: DateTime<Utc>) -> LadderStage {
        let elapsed = now - triggered_at;
        self.steps
            .iter()
            .take_while(|(_, offset)| *offset <= elapsed)
            .last()
            .map(|(stage, _)| *stage)
            .unwrap_or(LadderStage::Initial)
    }

    /// The upcoming stage and when it is due, or `None` once the ladder
    /// is exhausted.
    pub fn next_action(
        &self,
        triggered_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<(LadderStage, DateTime<Utc>)> {
        let elapsed = now - triggered_at;
        self.steps
            .iter()
            .find(|(_, offset)| *offset > elapsed)
            .map(|(stage, offset)| (*stage, triggered_at + *offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn ladder(kind: CheckpointType) -> Ladder {
        Ladder::for_checkpoint(kind, &HoldLadderConfig::default())
    }

    #[test]
    fn twenty_five_hours_in_next_is_escalation_at_72h() {
        let ladder = ladder(CheckpointType::Hold);
        let now = t0() + Duration::hours(25);
        assert_eq!(ladder.stage_at(t0(), now), LadderStage::Reminder);
        assert_eq!(
            ladder.next_action(t0(), now),
            Some((LadderStage::Escalation, t0() + Duration::hours(72)))
        );
    }

    #[test]
    fn hold_terminates_at_14_days_and_cp3_at_21() {
        let hold = ladder(CheckpointType::Hold);
        assert_eq!(hold.stage_at(t0(), t0() + Duration::days(14)), LadderStage::Terminal);
        assert_eq!(
            hold.stage_at(t0(), t0() + Duration::days(14) - Duration::seconds(1)),
            LadderStage::FinalNotice
        );

        let cp3 = ladder(CheckpointType::Cp3);
        assert_eq!(cp3.stage_at(t0(), t0() + Duration::days(20)), LadderStage::FinalNotice);
        assert_eq!(cp3.stage_at(t0(), t0() + Duration::days(21)), LadderStage::Terminal);
        assert_eq!(cp3.schedule(t0()).len(), 4);
    }

    #[test]
    fn cp1_and_cp2_never_terminate() {
        for kind in [CheckpointType::Cp1, CheckpointType::Cp2] {
            let ladder = ladder(kind);
            assert!(!ladder.has_terminal());
            assert_eq!(
                ladder.stage_at(t0(), t0() + Duration::days(365)),
                LadderStage::FinalNotice
            );
            assert_eq!(ladder.next_action(t0(), t0() + Duration::days(8)), None);
        }
    }

    #[test]
    fn fresh_checkpoint_is_initial() {
        let ladder = ladder(CheckpointType::Cp2);
        assert_eq!(ladder.stage_at(t0(), t0()), LadderStage::Initial);
        assert_eq!(
            ladder.next_action(t0(), t0()),
            Some((LadderStage::Reminder, t0() + Duration::hours(24)))
        );
    }
}
