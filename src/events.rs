// src/events.rs
//
// Typed progress events and their dispatcher. Mutating operations commit
// their transaction first, then hand the resulting events here; the
// dispatcher fans them out to the Achievement Evaluator and the Notifier.
// This keeps the quiz engine free of any knowledge of achievement or
// certificate internals, and keeps downstream failures from aborting the
// operation that already committed.

use sqlx::PgPool;

use crate::{achievements, notify};

/// Something progress-relevant that just happened.
#[derive(Debug, Clone)]
pub enum CourseEvent {
    /// First view of a lesson was recorded.
    LessonViewed {
        student_id: i64,
    },
    LessonCompleted {
        student_id: i64,
        course_id: i64,
    },
    QuizSubmitted {
        student_id: i64,
        quiz_id: i64,
        instructor_id: i64,
        score: f64,
    },
    /// The last short answer of an attempt was graded.
    GradingCompleted {
        student_id: i64,
        quiz_id: i64,
        attempt_id: i64,
        score: f64,
        score_changed_materially: bool,
    },
    AssignmentSubmitted {
        student_id: i64,
        assignment_id: i64,
        instructor_id: i64,
    },
    AssignmentGraded {
        student_id: i64,
        assignment_id: i64,
        grade: f64,
    },
    CourseCompleted {
        student_id: i64,
        course_id: i64,
        instructor_id: i64,
    },
    AchievementEarned {
        student_id: i64,
        achievement_id: i64,
        name: String,
    },
    CertificateIssued {
        student_id: i64,
        certificate_id: i64,
    },
}

/// Routes events to the evaluators and notifications they concern.
///
/// Achievement checks can themselves produce `AchievementEarned` events, so
/// the dispatcher drains a queue rather than recursing. Never fails: every
/// downstream error is logged and dropped, since the originating unit of
/// work has already committed.
pub async fn dispatch(pool: &PgPool, event: CourseEvent) {
    let mut queue = vec![event];

    while let Some(event) = queue.pop() {
        match event {
            // Views feed the same metrics as completions; both trigger the
            // participation and streak rules.
            CourseEvent::LessonViewed { student_id } => {
                check_achievements(pool, student_id, "participation", &mut queue).await;
                check_achievements(pool, student_id, "streak", &mut queue).await;
            }
            CourseEvent::LessonCompleted { student_id, .. } => {
                check_achievements(pool, student_id, "participation", &mut queue).await;
                check_achievements(pool, student_id, "streak", &mut queue).await;
            }
            CourseEvent::QuizSubmitted {
                student_id,
                quiz_id,
                instructor_id,
                score,
            } => {
                check_achievements(pool, student_id, "quiz_score", &mut queue).await;
                notify::deliver(
                    pool,
                    instructor_id,
                    Some(student_id),
                    "quiz_submission",
                    "Quiz submitted",
                    &format!("A student submitted quiz #{} with score {:.2}", quiz_id, score),
                    Some(quiz_id),
                )
                .await;
            }
            CourseEvent::GradingCompleted {
                student_id,
                quiz_id,
                attempt_id,
                score,
                score_changed_materially,
            } => {
                check_achievements(pool, student_id, "quiz_score", &mut queue).await;
                if score_changed_materially {
                    notify::deliver(
                        pool,
                        student_id,
                        None,
                        "quiz_graded",
                        "Quiz graded",
                        &format!("Quiz #{} has been graded: {:.2}%", quiz_id, score),
                        Some(attempt_id),
                    )
                    .await;
                }
            }
            CourseEvent::AssignmentSubmitted {
                student_id,
                assignment_id,
                instructor_id,
            } => {
                notify::deliver(
                    pool,
                    instructor_id,
                    Some(student_id),
                    "assignment_submission",
                    "Assignment submitted",
                    &format!("A student submitted assignment #{}", assignment_id),
                    Some(assignment_id),
                )
                .await;
            }
            CourseEvent::AssignmentGraded {
                student_id,
                assignment_id,
                grade,
            } => {
                notify::deliver(
                    pool,
                    student_id,
                    None,
                    "assignment_graded",
                    "Assignment graded",
                    &format!("Your assignment was graded: {:.2}", grade),
                    Some(assignment_id),
                )
                .await;
            }
            CourseEvent::CourseCompleted {
                student_id,
                course_id,
                instructor_id,
            } => {
                check_achievements(pool, student_id, "course_completion", &mut queue).await;
                notify::deliver(
                    pool,
                    student_id,
                    None,
                    "course_completion",
                    "Course completed",
                    "Congratulations, you completed the course! You can now request a certificate.",
                    Some(course_id),
                )
                .await;
                notify::deliver(
                    pool,
                    instructor_id,
                    Some(student_id),
                    "course_completion",
                    "Student completed your course",
                    &format!("A student completed course #{}", course_id),
                    Some(course_id),
                )
                .await;
            }
            CourseEvent::AchievementEarned {
                student_id,
                achievement_id,
                name,
            } => {
                notify::deliver(
                    pool,
                    student_id,
                    None,
                    "achievement_earned",
                    "Achievement earned",
                    &format!("You earned the '{}' badge!", name),
                    Some(achievement_id),
                )
                .await;
            }
            CourseEvent::CertificateIssued {
                student_id,
                certificate_id,
            } => {
                notify::deliver(
                    pool,
                    student_id,
                    None,
                    "certificate_issued",
                    "Certificate issued",
                    "Your course certificate has been issued.",
                    Some(certificate_id),
                )
                .await;
            }
        }
    }
}

async fn check_achievements(
    pool: &PgPool,
    student_id: i64,
    criteria_type: &str,
    queue: &mut Vec<CourseEvent>,
) {
    match achievements::evaluate(pool, student_id, criteria_type).await {
        Ok(earned) => {
            for achievement in earned {
                queue.push(CourseEvent::AchievementEarned {
                    student_id,
                    achievement_id: achievement.id,
                    name: achievement.name,
                });
            }
        }
        Err(e) => {
            tracing::warn!(
                student_id,
                criteria_type,
                "achievement evaluation failed: {}",
                e
            );
        }
    }
}
