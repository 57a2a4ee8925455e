//! Skill assessment and Smart Start planning.
//!
//! Three self-ratings become a skill level; the level plus a target
//! frequency becomes a lower starting frequency and a ramp toward the target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Resolved;

/// The three 1-5 self-assessment answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentResponses {
    pub q1: i32,
    pub q2: i32,
    pub q3: i32,
}

impl AssessmentResponses {
    pub fn new(q1: i32, q2: i32, q3: i32) -> Self {
        Self { q1, q2, q3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillAssessment {
    pub responses: AssessmentResponses,
    pub calculated_level: i32,
    pub level_label: String,
    pub assessed_at: DateTime<Utc>,
}

impl SkillAssessment {
    pub fn from_responses(responses: AssessmentResponses, assessed_at: DateTime<Utc>) -> Self {
        let level = calculate_skill_level(&responses);
        Self {
            responses,
            calculated_level: level,
            level_label: skill_level_label(level).value.to_string(),
            assessed_at,
        }
    }
}

/// Rounded (half-up) mean of the three answers. Inputs are not clamped.
pub fn calculate_skill_level(r: &AssessmentResponses) -> i32 {
    let sum = (r.q1 + r.q2 + r.q3) as f64;
    (sum / 3.0 + 0.5).floor() as i32
}

/// Label for a skill level; anything outside 1-5 reads as "Beginner".
pub fn skill_level_label(level: i32) -> Resolved<&'static str> {
    match level {
        1 => Resolved::exact("Beginner"),
        2 => Resolved::exact("Early Learner"),
        3 => Resolved::exact("Developing"),
        4 => Resolved::exact("Proficient"),
        5 => Resolved::exact("Independent"),
        _ => Resolved::fallback("Beginner"),
    }
}

/// One stretch of the Smart Start ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RampPhase {
    pub start_week: u32,
    pub end_week: u32,
    pub frequency_per_week: u32,
}

/// Recommendation produced by [`suggest_start_frequency`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSuggestion {
    pub suggested_initial: u32,
    pub target_frequency: u32,
    pub rationale: String,
    pub phase_guidance: String,
    /// True when the level was outside 1-5 and the 50% rule applied.
    pub used_default: bool,
}

/// Smart Start plan stored in goal metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartStartPlan {
    pub suggested_initial: u32,
    pub target_frequency: u32,
    pub rationale: String,
    pub phase_guidance: String,
    #[serde(default)]
    pub ramp: Vec<RampPhase>,
    pub user_accepted_suggestion: bool,
    pub user_selected_initial: u32,
    pub created_at: DateTime<Utc>,
}

impl SmartStartPlan {
    pub fn from_suggestion(
        suggestion: StartSuggestion,
        accepted: bool,
        selected: u32,
        duration_weeks: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        let ramp = ramp(selected, suggestion.target_frequency, duration_weeks);
        Self {
            suggested_initial: suggestion.suggested_initial,
            target_frequency: suggestion.target_frequency,
            rationale: suggestion.rationale,
            phase_guidance: suggestion.phase_guidance,
            ramp,
            user_accepted_suggestion: accepted,
            user_selected_initial: selected,
            created_at,
        }
    }
}

// Integer percentage helpers; float products like 10 * 0.3 drift past .0.
// Products are taken in u64; with pct <= 100 the quotient fits back in u32.
fn pct_round(target: u32, pct: u32) -> u32 {
    let v = (u64::from(target) * u64::from(pct) + 50) / 100;
    u32::try_from(v).unwrap_or(target)
}

fn pct_ceil(target: u32, pct: u32) -> u32 {
    let v = (u64::from(target) * u64::from(pct)).div_ceil(100);
    u32::try_from(v).unwrap_or(target)
}

/// Recommend a starting frequency below `target` based on skill level.
///
/// | level | share | floor |
/// |-------|-------|-------|
/// | 1 | 30% (rounded up) | 1 |
/// | 2 | 40% | 2 |
/// | 3 | 60% | - |
/// | 4 | 80% | 4 |
/// | 5 | 100% | - |
///
/// Other levels get 50% with floor 1. The result never exceeds the target.
pub fn suggest_start_frequency(skill_level: i32, target: u32) -> StartSuggestion {
    let (raw, used_default) = match skill_level {
        1 => (pct_ceil(target, 30).max(1), false),
        2 => (pct_round(target, 40).max(2), false),
        3 => (pct_round(target, 60), false),
        4 => (pct_round(target, 80).max(4), false),
        5 => (target, false),
        _ => (pct_round(target, 50).max(1), true),
    };
    let suggested = raw.min(target);

    if used_default {
        tracing::debug!(skill_level, target, suggested, "skill level out of range, using 50% start");
    }

    StartSuggestion {
        suggested_initial: suggested,
        target_frequency: target,
        rationale: rationale(skill_level, suggested, target),
        phase_guidance: phase_guidance(skill_level).to_string(),
        used_default,
    }
}

fn rationale(level: i32, suggested: u32, target: u32) -> String {
    let label = skill_level_label(level).value;
    if suggested >= target {
        format!(
            "At the {label} level you can start at your full target of {target}x per week."
        )
    } else {
        format!(
            "At the {label} level, starting at {suggested}x per week builds confidence before working up to {target}x per week."
        )
    }
}

fn phase_guidance(level: i32) -> &'static str {
    match level {
        1 => "Focus on showing up. Practice with support and celebrate every attempt.",
        2 => "Repeat the same routine each session. Add one small challenge once it feels familiar.",
        3 => "Keep a steady rhythm and fade prompts as sessions get easier.",
        4 => "Practice mostly on your own and ask for help only on the tricky parts.",
        5 => "Maintain the habit at full frequency and look for chances to teach it.",
        _ => "Start small and increase as sessions feel comfortable.",
    }
}

/// Weekly ramp from `initial` up to `target`, one step every two weeks.
///
/// With a zero duration the ramp is open ended: it stops once the target is
/// reached. Otherwise phases never extend past `duration_weeks`.
pub fn ramp(initial: u32, target: u32, duration_weeks: u32) -> Vec<RampPhase> {
    const WEEKS_PER_STEP: u32 = 2;

    if target == 0 {
        return Vec::new();
    }

    let mut phases = Vec::new();
    let mut freq = initial.clamp(1, target);
    let mut week = 1;
    loop {
        if duration_weeks > 0 && week > duration_weeks {
            break;
        }
        if freq >= target {
            let end_week = if duration_weeks > 0 { duration_weeks } else { week };
            phases.push(RampPhase {
                start_week: week,
                end_week,
                frequency_per_week: target,
            });
            break;
        }
        let mut end_week = week + WEEKS_PER_STEP - 1;
        if duration_weeks > 0 {
            end_week = end_week.min(duration_weeks);
        }
        phases.push(RampPhase {
            start_week: week,
            end_week,
            frequency_per_week: freq,
        });
        week = end_week + 1;
        freq += 1;
    }
    phases
}
