// src/achievements.rs
//
// Achievement Evaluator: a small rule engine over the achievements table.
// Evaluation is triggered explicitly after the event that could satisfy a
// criteria type (quiz submitted -> quiz_score, course completed ->
// course_completion, lesson viewed -> participation and streak); there is
// no polling. Awards are idempotent per (student, achievement) pair: the
// insert goes through ON CONFLICT DO NOTHING against the unique
// constraint, so repeated evaluation can never double-award.

use chrono::NaiveDate;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::achievement::Achievement;

/// Longest run of consecutive calendar days in a set of view dates.
///
/// Duplicates are ignored; only day-deltas of exactly 1 extend a run.
pub fn longest_streak(dates: &[NaiveDate]) -> i64 {
    let mut days: Vec<NaiveDate> = dates.to_vec();
    days.sort_unstable_by(|a, b| b.cmp(a));
    days.dedup();

    let mut best: i64 = 0;
    let mut current: i64 = 0;
    let mut prev: Option<NaiveDate> = None;

    for day in days {
        match prev {
            Some(p) if (p - day).num_days() == 1 => current += 1,
            _ => current = 1,
        }
        best = best.max(current);
        prev = Some(day);
    }
    best
}

/// Evaluates every achievement of one criteria type for a student and
/// awards the ones whose threshold is now met. Returns the newly earned
/// definitions (already-earned badges are skipped silently).
pub async fn evaluate(
    pool: &PgPool,
    student_id: i64,
    criteria_type: &str,
) -> Result<Vec<Achievement>, AppError> {
    // Snapshot of the rule table for this evaluation call.
    let rules: Vec<Achievement> = sqlx::query_as(
        "SELECT id, name, description, badge_icon, points_value, criteria_type, criteria_value
         FROM achievements WHERE criteria_type = $1",
    )
    .bind(criteria_type)
    .fetch_all(pool)
    .await?;

    if rules.is_empty() {
        return Ok(Vec::new());
    }

    let metric = metric_for(pool, student_id, criteria_type).await?;

    let mut earned = Vec::new();
    for rule in rules {
        if metric < rule.criteria_value as i64 {
            continue;
        }

        let inserted = sqlx::query(
            "INSERT INTO student_achievements (student_id, achievement_id)
             VALUES ($1, $2)
             ON CONFLICT (student_id, achievement_id) DO NOTHING",
        )
        .bind(student_id)
        .bind(rule.id)
        .execute(pool)
        .await?;

        if inserted.rows_affected() > 0 {
            tracing::info!(
                student_id,
                achievement = %rule.name,
                "achievement awarded"
            );
            earned.push(rule);
        }
    }

    Ok(earned)
}

/// The student's current value for one criteria type, compared against
/// each rule's threshold.
async fn metric_for(pool: &PgPool, student_id: i64, criteria_type: &str) -> Result<i64, AppError> {
    match criteria_type {
        "course_completion" => {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM enrollments WHERE student_id = $1 AND status = 'completed'",
            )
            .bind(student_id)
            .fetch_one(pool)
            .await?;
            Ok(count)
        }
        "quiz_score" => {
            // Best score ever; one attempt at or above the threshold earns
            // the badge.
            let best: Option<f64> = sqlx::query_scalar(
                "SELECT MAX(score) FROM quiz_attempts WHERE student_id = $1 AND score IS NOT NULL",
            )
            .bind(student_id)
            .fetch_one(pool)
            .await?;
            Ok(best.map(|s| s.floor() as i64).unwrap_or(-1))
        }
        "participation" => {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM lesson_progress WHERE student_id = $1")
                    .bind(student_id)
                    .fetch_one(pool)
                    .await?;
            Ok(count)
        }
        "streak" => {
            let dates: Vec<NaiveDate> = sqlx::query_scalar(
                "SELECT DISTINCT viewed_at::date FROM lesson_progress WHERE student_id = $1",
            )
            .bind(student_id)
            .fetch_all(pool)
            .await?;
            Ok(longest_streak(&dates))
        }
        other => Err(AppError::Validation(format!(
            "Unknown criteria type: {}",
            other
        ))),
    }
}
