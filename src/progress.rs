// src/progress.rs
//
// Progress Aggregator: derives a single completion percentage for one
// (student, course) pair from lesson, quiz and assignment records, and owns
// the one-way active -> completed enrollment transition.
//
// Every mutating operation that can change a component's completion state
// (lesson completed, quiz submitted or regraded, assignment submitted or
// graded) calls `recompute_and_transition` inside its own transaction, so
// the cached `progress_percentage` and the status flip always land
// atomically with the change that caused them.

use chrono::Utc;
use sqlx::PgConnection;

use crate::error::AppError;
use crate::scoring::round2;

/// Raw component counts for one (student, course) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total_components: i64,
    pub completed_components: i64,
}

/// Result of a recomputation.
#[derive(Debug, Clone, Copy)]
pub struct ProgressOutcome {
    pub progress: f64,
    /// True only on the call that flipped the enrollment to completed.
    pub newly_completed: bool,
}

/// Completion percentage for a snapshot.
///
/// A course with no gradable content is vacuously complete (100). The
/// result is clamped so stale component rows can never push it past 100.
pub fn percentage(snapshot: ProgressSnapshot) -> f64 {
    if snapshot.total_components == 0 {
        return 100.0;
    }
    let pct = snapshot.completed_components as f64 / snapshot.total_components as f64 * 100.0;
    round2(pct).min(100.0)
}

/// Counts a course's components and how many of them the student has
/// completed: a lesson counts once a completion timestamp exists, a quiz
/// once the best completed attempt clears its passing score, an assignment
/// once a submission exists in 'submitted' or 'graded' state.
pub async fn snapshot(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<ProgressSnapshot, AppError> {
    let total_lessons: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM lessons WHERE course_id = $1")
            .bind(course_id)
            .fetch_one(&mut *conn)
            .await?;

    let completed_lessons: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM lesson_progress lp
        JOIN lessons l ON lp.lesson_id = l.id
        WHERE lp.student_id = $1
          AND l.course_id = $2
          AND lp.completed_at IS NOT NULL
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;

    let total_quizzes: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM quizzes WHERE course_id = $1")
            .bind(course_id)
            .fetch_one(&mut *conn)
            .await?;

    let passed_quizzes: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM quizzes q
        WHERE q.course_id = $2
          AND EXISTS (
              SELECT 1 FROM quiz_attempts a
              WHERE a.quiz_id = q.id
                AND a.student_id = $1
                AND a.status = 'completed'
                AND a.score >= q.passing_score
          )
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;

    let total_assignments: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM assignments WHERE course_id = $1")
            .bind(course_id)
            .fetch_one(&mut *conn)
            .await?;

    let submitted_assignments: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM assignments asg
        WHERE asg.course_id = $2
          AND EXISTS (
              SELECT 1 FROM assignment_submissions s
              WHERE s.assignment_id = asg.id
                AND s.student_id = $1
                AND s.status IN ('submitted', 'graded')
          )
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(ProgressSnapshot {
        total_components: total_lessons + total_quizzes + total_assignments,
        completed_components: completed_lessons + passed_quizzes + submitted_assignments,
    })
}

/// Recomputes the cached percentage and applies the completion transition.
///
/// The status flip is guarded by `status = 'active'` in the UPDATE itself,
/// so it fires exactly once even under concurrent recomputations, and a
/// completed enrollment never reverts on its own.
pub async fn recompute_and_transition(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<ProgressOutcome, AppError> {
    let snap = snapshot(&mut *conn, student_id, course_id).await?;
    let progress = percentage(snap);

    sqlx::query(
        "UPDATE enrollments SET progress_percentage = $1 WHERE student_id = $2 AND course_id = $3",
    )
    .bind(progress)
    .bind(student_id)
    .bind(course_id)
    .execute(&mut *conn)
    .await?;

    let mut newly_completed = false;
    if progress >= 100.0 {
        let flipped = sqlx::query(
            r#"
            UPDATE enrollments
            SET status = 'completed', completed_at = $1
            WHERE student_id = $2 AND course_id = $3 AND status = 'active'
            "#,
        )
        .bind(Utc::now())
        .bind(student_id)
        .bind(course_id)
        .execute(&mut *conn)
        .await?;
        newly_completed = flipped.rows_affected() > 0;
    }

    Ok(ProgressOutcome {
        progress,
        newly_completed,
    })
}
