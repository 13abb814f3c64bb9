// src/scoring.rs
//
// Pure scoring math for the quiz engine. Everything here is synchronous
// and side-effect free; the handlers own the surrounding transaction.

/// Rounds to two decimal places, the precision scores are stored at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Percentage score for an attempt.
///
/// The denominator is the point total of ALL questions in the quiz, not
/// just the answered ones, so skipped questions and ungraded short answers
/// both count as zero. A quiz without questions scores zero.
pub fn percentage(earned_points: f64, total_points: i64) -> f64 {
    if total_points <= 0 {
        return 0.0;
    }
    round2(earned_points / total_points as f64 * 100.0)
}

/// Sum of earned points over an attempt's answers. `None` means the answer
/// is still ungraded and contributes nothing yet.
pub fn earned_points<I: IntoIterator<Item = Option<f64>>>(points: I) -> f64 {
    points.into_iter().flatten().sum()
}

/// Whether a score clears the quiz's passing bar.
pub fn passed(score: f64, passing_score: i32) -> bool {
    score >= passing_score as f64
}

/// Whole minutes elapsed between two instants, truncated.
pub fn elapsed_minutes(
    started_at: chrono::DateTime<chrono::Utc>,
    ended_at: chrono::DateTime<chrono::Utc>,
) -> i64 {
    (ended_at - started_at).num_minutes()
}

/// True when the quiz defines a time limit and the elapsed time exceeds it.
pub fn time_limit_breached(
    started_at: chrono::DateTime<chrono::Utc>,
    now: chrono::DateTime<chrono::Utc>,
    time_limit_minutes: Option<i32>,
) -> bool {
    match time_limit_minutes {
        Some(limit) => elapsed_minutes(started_at, now) > limit as i64,
        None => false,
    }
}
