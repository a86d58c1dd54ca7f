use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Default institutional cutoff table: grade tiers 2..7.
pub const DEFAULT_GRADE_CUTOFFS: [GradeCutoff; 6] = [
    GradeCutoff { grade: 2, cutoff: 20.0 },
    GradeCutoff { grade: 3, cutoff: 45.0 },
    GradeCutoff { grade: 4, cutoff: 50.0 },
    GradeCutoff { grade: 5, cutoff: 65.0 },
    GradeCutoff { grade: 6, cutoff: 75.0 },
    GradeCutoff { grade: 7, cutoff: 85.0 },
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentItem {
    #[serde(default)]
    pub idx: i64,
    #[serde(default)]
    pub label: String,
    pub weight: String,
    #[serde(default)]
    pub score: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AssessmentItem {
    pub fn valid_weight(&self) -> bool {
        parse_weight(self.weight.trim()).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeCutoff {
    pub grade: i64,
    pub cutoff: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreTotals {
    pub score: f64,
    pub total_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeDetailsRow {
    pub grade: i64,
    pub cutoff: f64,
    pub required_percent: f64,
    pub required_score: String,
    pub achieved: bool,
    pub obtainable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSummary {
    pub required_percent: f64,
    pub required_score: String,
    pub remaining_weight: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub score: f64,
    pub max_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Unsigned decimal literal: digits with an optional single fractional part.
/// Rejects signs, exponents, leading/trailing dots and non-digit text, so
/// free-form user entry never reaches `f64::from_str`'s looser grammar.
fn parse_plain_number(raw: &str) -> Option<f64> {
    let (int_part, frac_part) = match raw.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (raw, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Some(frac) = frac_part {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    raw.parse::<f64>().ok()
}

/// Free-form score entry, tried in order: `"<n>%"`, `"<n>/<d>"`, `"<n>"`.
/// `None` means "undecided" (not yet scored), a normal state rather than an
/// error. A fraction with a zero denominator falls through to undecided.
pub fn parse_score(raw: &str) -> Option<f64> {
    if let Some(body) = raw.strip_suffix('%') {
        if let Some(v) = parse_plain_number(body) {
            return Some(v);
        }
    }
    if let Some((num, denom)) = raw.split_once('/') {
        if let (Some(n), Some(d)) = (parse_plain_number(num), parse_plain_number(denom)) {
            if d != 0.0 {
                return Some(n / d * 100.0);
            }
        }
    }
    parse_plain_number(raw)
}

/// Weights accept only the strict `"<n>%"` form.
pub fn parse_weight(raw: &str) -> Option<f64> {
    parse_plain_number(raw.strip_suffix('%')?)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn clamp_percent(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    round2(value).clamp(0.0, 100.0)
}

pub fn enabled_weight(items: &[AssessmentItem]) -> f64 {
    items
        .iter()
        .filter(|item| item.enabled)
        .filter_map(|item| parse_weight(item.weight.trim()))
        .sum()
}

/// Advisory check that enabled weights sum to 100. Rounding to the nearest
/// integer absorbs drift from literals like `33.33% x 3`. Never blocks
/// calculation; unparsable weights contribute zero here and are surfaced
/// per-item via `valid_weight`.
pub fn is_weight_valid(items: &[AssessmentItem]) -> bool {
    enabled_weight(items).round() as i64 == 100
}

/// Current weighted total over enabled items. Items whose score does not
/// parse are undecided: excluded from both the numerator and `total_weight`.
/// Items whose weight does not parse contribute nothing. Parsed scores clamp
/// into [0, 100] before weighting; `total_weight` is left unclamped so bonus
/// configurations past 100% keep their real denominator.
pub fn calculate_total_score(items: &[AssessmentItem]) -> ScoreTotals {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for item in items.iter().filter(|item| item.enabled) {
        let Some(weight) = parse_weight(item.weight.trim()) else {
            continue;
        };
        let Some(score) = parse_score(item.score.trim()) else {
            continue;
        };
        let clamped = score.clamp(0.0, 100.0);
        weighted_sum += clamped * (weight / 100.0);
        total_weight += weight / 100.0;
    }
    ScoreTotals {
        score: round2(weighted_sum),
        total_weight,
    }
}

/// Fraction of the course not yet decided. A non-finite total is treated as
/// "nothing decided yet" (1.0).
pub fn remaining_weight(total_weight: f64) -> f64 {
    if !total_weight.is_finite() {
        return 1.0;
    }
    (1.0 - total_weight).max(0.0)
}

// "Points needed" rendering: 2dp with trailing zeros trimmed, exact zero as
// the bare digit.
fn format_points(value: f64) -> String {
    let rounded = round2(value);
    if rounded == 0.0 {
        return "0".to_string();
    }
    let text = format!("{:.2}", rounded);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn project_tier(score: f64, remaining: f64, cutoff: f64) -> (f64, String, bool) {
    let required_increase = cutoff - score;
    let capped = required_increase.max(0.0);
    let required_percent = if remaining > 0.0 {
        round2(capped / remaining).max(0.0)
    } else {
        0.0
    };
    let required_score = format!(
        "{}/{}",
        format_points(capped),
        (remaining * 100.0).round() as i64
    );
    let obtainable = remaining > 0.0 && required_increase <= remaining * 100.0;
    (required_percent, required_score, obtainable)
}

/// One row per cutoff tier, in the caller's table order (no re-sort; callers
/// supply the table in the order they want displayed).
pub fn get_grade_details_rows(
    items: &[AssessmentItem],
    cutoffs: &[GradeCutoff],
) -> Vec<GradeDetailsRow> {
    let totals = calculate_total_score(items);
    let remaining = remaining_weight(totals.total_weight);
    cutoffs
        .iter()
        .map(|info| {
            let (required_percent, required_score, obtainable) =
                project_tier(totals.score, remaining, info.cutoff);
            GradeDetailsRow {
                grade: info.grade,
                cutoff: info.cutoff,
                required_percent,
                required_score,
                achieved: totals.score >= info.cutoff,
                obtainable,
            }
        })
        .collect()
}

/// Projection for one selected tier. Falls back to the first cutoff when
/// `target_grade` has no exact match; an empty table has no sane default and
/// is the engine's one loud failure.
pub fn get_target_summary(
    items: &[AssessmentItem],
    target_grade: i64,
    cutoffs: &[GradeCutoff],
) -> Result<TargetSummary, CalcError> {
    let Some(first) = cutoffs.first() else {
        return Err(CalcError::new(
            "empty_cutoffs",
            "cutoff table must not be empty",
        ));
    };
    let info = cutoffs
        .iter()
        .find(|c| c.grade == target_grade)
        .unwrap_or(first);
    let totals = calculate_total_score(items);
    let remaining = remaining_weight(totals.total_weight);
    let (required_percent, required_score, _) = project_tier(totals.score, remaining, info.cutoff);
    Ok(TargetSummary {
        required_percent,
        required_score,
        remaining_weight: (remaining * 100.0).round() as i64,
    })
}

/// Best final score still reachable: current total plus a perfect run over
/// all remaining weight.
pub fn calculate_best_possible(items: &[AssessmentItem]) -> f64 {
    let totals = calculate_total_score(items);
    let remaining = remaining_weight(totals.total_weight);
    clamp_percent(totals.score + remaining * 100.0)
}

/// Normalized fraction for one quiz attempt. The raw score clamps into
/// [0, max_score] before dividing; a non-positive or non-finite max means the
/// attempt is not scorable.
pub fn quiz_attempt_fraction(attempt: &QuizAttempt) -> Option<f64> {
    if !attempt.max_score.is_finite() || attempt.max_score <= 0.0 || !attempt.score.is_finite() {
        return None;
    }
    Some(attempt.score.clamp(0.0, attempt.max_score) / attempt.max_score)
}

/// Best-N-of-M quiz average as a percent, 2dp. Keeps the highest
/// `min(keep_count, total_slots)` normalized attempts; the sort is stable on
/// the fraction alone, so exact ties keep the earliest attempt. Slots not yet
/// attempted count as zero (the divisor is always `keep`). Returns `None`
/// when `keep` is zero or nothing is scorable ("not available", never NaN).
pub fn quiz_best_of(
    attempts: &[QuizAttempt],
    total_slots: usize,
    keep_count: usize,
) -> Option<f64> {
    let keep = keep_count.min(total_slots);
    if keep == 0 {
        return None;
    }
    let mut fractions: Vec<f64> = attempts.iter().filter_map(quiz_attempt_fraction).collect();
    if fractions.is_empty() {
        return None;
    }
    fractions.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    fractions.truncate(keep);
    let sum: f64 = fractions.iter().sum();
    Some(round2(sum / keep as f64 * 100.0))
}

/// Aggregate of per-course final percentages (WAM). Courses are computed
/// independently by the caller; only their summary numbers are combined here.
/// Non-finite entries are dropped from both sum and count.
pub fn overall_average(course_finals: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0_usize;
    for value in course_finals.iter().filter(|v| v.is_finite()) {
        sum += value;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    round2(sum / count as f64)
}
