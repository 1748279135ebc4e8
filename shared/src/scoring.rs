//! Reproducible A/B scoring from user answers and the blend with the
//! backend's axis alignment.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::dto::{Side, UserAnswer};

/// Tier weights by question position and the answer share of the blend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringPolicy {
    /// General (1–3), specific (4–7) and values (8–10) question weights.
    pub tier_weights: [u32; 3],
    /// Share of the deterministic score in the blend, 0..=1.
    pub answer_share: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            tier_weights: [1, 2, 3],
            answer_share: 0.7,
        }
    }
}

impl ScoringPolicy {
    pub fn new(tier_weights: [u32; 3], answer_share: f64) -> Self {
        let answer_share = if answer_share.is_finite() {
            answer_share.clamp(0.0, 1.0)
        } else {
            Self::default().answer_share
        };
        Self {
            tier_weights,
            answer_share,
        }
    }

    pub fn weight_for(&self, question_id: u8) -> u32 {
        match question_id {
            0..=3 => self.tier_weights[0],
            4..=7 => self.tier_weights[1],
            _ => self.tier_weights[2],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeterministicScore {
    pub side_a_percent: u8,
    pub side_b_percent: u8,
}

impl DeterministicScore {
    pub fn recommended(&self) -> Side {
        if self.side_a_percent >= self.side_b_percent {
            Side::A
        } else {
            Side::B
        }
    }
}

/// Backend-reported alignment, renormalized to sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisAlignmentScore {
    pub side_a_percent: u8,
    pub side_b_percent: u8,
}

impl AxisAlignmentScore {
    /// Builds a score from raw backend numbers. Negative parts count as zero;
    /// pairs not summing to 100 are rescaled and a warning is returned.
    /// Returns `None` when nothing remains to scale.
    pub fn from_raw(a: f64, b: f64) -> Option<(Self, Option<String>)> {
        let a = if a.is_finite() { a.max(0.0) } else { 0.0 };
        let b = if b.is_finite() { b.max(0.0) } else { 0.0 };
        let sum = a + b;
        if sum <= 0.0 {
            return None;
        }
        let side_a = (100.0 * a / sum).round().clamp(0.0, 100.0) as u8;
        let warning = ((sum - 100.0).abs() > f64::EPSILON)
            .then(|| format!("axis alignment {a}/{b} rescaled to {side_a}/{}", 100 - side_a));
        Some((
            Self {
                side_a_percent: side_a,
                side_b_percent: 100 - side_a,
            },
            warning,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlendedDecision {
    pub recommended_side: Side,
    pub confidence_percent: u8,
    pub side_a_percent: u8,
    pub side_b_percent: u8,
}

impl From<DeterministicScore> for BlendedDecision {
    fn from(score: DeterministicScore) -> Self {
        decision(score.side_a_percent)
    }
}

fn decision(side_a: u8) -> BlendedDecision {
    let side_b = 100 - side_a;
    BlendedDecision {
        recommended_side: if side_a >= side_b { Side::A } else { Side::B },
        confidence_percent: side_a.max(side_b),
        side_a_percent: side_a,
        side_b_percent: side_b,
    }
}

/// Weighted share of A answers. A later answer to the same question replaces
/// an earlier one; ids outside 1..=10 are ignored. No answers score 50/50.
pub fn score(answers: &[UserAnswer], policy: &ScoringPolicy) -> DeterministicScore {
    let latest: BTreeMap<u8, Side> = answers
        .iter()
        .filter_map(|a| {
            u8::try_from(a.question_id)
                .ok()
                .filter(|id| (1..=10).contains(id))
                .map(|id| (id, a.side))
        })
        .collect();

    let (mut weight_a, mut total) = (0u64, 0u64);
    for (id, side) in latest {
        let w = u64::from(policy.weight_for(id));
        total += w;
        if side == Side::A {
            weight_a += w;
        }
    }
    if total == 0 {
        return DeterministicScore {
            side_a_percent: 50,
            side_b_percent: 50,
        };
    }
    let side_a = (100.0 * weight_a as f64 / total as f64).round() as u8;
    DeterministicScore {
        side_a_percent: side_a,
        side_b_percent: 100 - side_a,
    }
}

pub fn blend(
    deterministic: DeterministicScore,
    axis: Option<AxisAlignmentScore>,
    policy: &ScoringPolicy,
) -> BlendedDecision {
    let Some(axis) = axis else {
        return deterministic.into();
    };
    // per-mille integer weights keep exact halves rounding up
    let share = (policy.answer_share * 1000.0).round() as u32;
    let mixed = share * u32::from(deterministic.side_a_percent)
        + (1000 - share) * u32::from(axis.side_a_percent);
    decision(((mixed + 500) / 1000).min(100) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(sides: &str) -> Vec<UserAnswer> {
        sides
            .chars()
            .enumerate()
            .map(|(i, c)| UserAnswer::new(i as i64 + 1, if c == 'A' { Side::A } else { Side::B }))
            .collect()
    }

    #[test]
    fn all_a_answers_score_full_a() {
        let s = score(&answers("AAAAAAAAAA"), &ScoringPolicy::default());
        assert_eq!(s, DeterministicScore { side_a_percent: 100, side_b_percent: 0 });
        assert_eq!(s.recommended(), Side::A);
    }

    #[test]
    fn later_questions_weigh_more() {
        // A on 1..=5 (3 + 4), B on 6..=10 (4 + 9): total 20, A 7
        let s = score(&answers("AAAAABBBBB"), &ScoringPolicy::default());
        assert_eq!(s.side_a_percent, 35);
        assert_eq!(s.side_b_percent, 65);
        assert_eq!(s.recommended(), Side::B);
    }

    #[test]
    fn scores_always_sum_to_100() {
        let policy = ScoringPolicy::default();
        for mask in 0u16..1024 {
            let sides: String = (0..10)
                .map(|i| if mask & (1 << i) != 0 { 'A' } else { 'B' })
                .collect();
            let s = score(&answers(&sides), &policy);
            assert_eq!(u16::from(s.side_a_percent) + u16::from(s.side_b_percent), 100);
        }
    }

    #[test]
    fn empty_and_out_of_range_answers_tie() {
        let policy = ScoringPolicy::default();
        assert_eq!(score(&[], &policy).side_a_percent, 50);
        let stray = [
            UserAnswer::new(0, Side::B),
            UserAnswer::new(11, Side::B),
            UserAnswer::new(-3, Side::B),
            UserAnswer::new(300, Side::B),
        ];
        assert_eq!(score(&stray, &policy).side_a_percent, 50);
        assert_eq!(score(&[], &policy).recommended(), Side::A);
    }

    #[test]
    fn duplicate_question_keeps_latest_answer() {
        let dup = [UserAnswer::new(2, Side::A), UserAnswer::new(2, Side::B)];
        assert_eq!(score(&dup, &ScoringPolicy::default()).side_b_percent, 100);
    }

    #[test]
    fn blend_without_axis_is_identity() {
        let det = DeterministicScore { side_a_percent: 62, side_b_percent: 38 };
        let blended = blend(det, None, &ScoringPolicy::default());
        assert_eq!(blended.side_a_percent, 62);
        assert_eq!(blended.side_b_percent, 38);
        assert_eq!(blended.recommended_side, Side::A);
        assert_eq!(blended.confidence_percent, 62);
    }

    #[test]
    fn blend_mixes_seventy_thirty() {
        let det = DeterministicScore { side_a_percent: 40, side_b_percent: 60 };
        let axis = AxisAlignmentScore { side_a_percent: 90, side_b_percent: 10 };
        // 0.7 * 40 + 0.3 * 90 = 55
        let blended = blend(det, Some(axis), &ScoringPolicy::default());
        assert_eq!(blended.side_a_percent, 55);
        assert_eq!(blended.side_b_percent, 45);
        assert_eq!(blended.recommended_side, Side::A);
        assert_eq!(blended.confidence_percent, 55);
    }

    #[test]
    fn blend_rounds_exact_halves_up() {
        let policy = ScoringPolicy::default();
        let cases = [((85, 0), 60), ((45, 0), 32), ((85, 10), 63), ((15, 50), 26)];
        for ((det_a, axis_a), expected) in cases {
            let det = DeterministicScore { side_a_percent: det_a, side_b_percent: 100 - det_a };
            let axis = AxisAlignmentScore { side_a_percent: axis_a, side_b_percent: 100 - axis_a };
            let blended = blend(det, Some(axis), &policy);
            assert_eq!(blended.side_a_percent, expected, "blend({det_a}, {axis_a})");
            assert_eq!(blended.side_b_percent, 100 - expected);
        }
    }

    #[test]
    fn axis_scores_are_rescaled() {
        let (axis, warning) = AxisAlignmentScore::from_raw(30.0, 30.0).unwrap();
        assert_eq!(axis.side_a_percent, 50);
        assert!(warning.is_some());

        let (axis, warning) = AxisAlignmentScore::from_raw(72.0, 28.0).unwrap();
        assert_eq!(axis.side_a_percent, 72);
        assert!(warning.is_none());

        assert!(AxisAlignmentScore::from_raw(0.0, -4.0).is_none());
    }

    #[test]
    fn policy_share_is_clamped() {
        let policy = ScoringPolicy::new([1, 1, 1], 3.0);
        assert_eq!(policy.answer_share, 1.0);
        assert_eq!(policy.weight_for(10), 1);
    }
}
