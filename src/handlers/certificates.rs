// src/handlers/certificates.rs
//
// Certificate eligibility workflow: request, admin review, issuance, public
// verification. Eligibility is always decided on a fresh progress
// recomputation, never the cached enrollment column.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use validator::Validate;

use crate::{
    error::AppError,
    events::{self, CourseEvent},
    handlers::courses::{fetch_course, require_enrollment},
    models::certificate::{
        Certificate, CertificateRequest, CertificateVerification, IssueCertificateRequest,
        RejectRequest,
    },
    progress,
    utils::{
        codes::{generate_certificate_code, is_certificate_code},
        jwt::Claims,
    },
};

async fn fetch_certificate(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<Option<Certificate>, AppError> {
    let existing: Option<Certificate> = sqlx::query_as(
        "SELECT id, student_id, course_id, certificate_code, issued_at
         FROM certificates WHERE student_id = $1 AND course_id = $2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(conn)
    .await?;
    Ok(existing)
}

/// Inserts the certificate row. The unique (student, course) constraint
/// turns a double issuance race into a clean 409.
async fn insert_certificate(
    tx: &mut Transaction<'_, Postgres>,
    student_id: i64,
    course_id: i64,
) -> Result<Certificate, AppError> {
    let certificate: Certificate = sqlx::query_as(
        r#"
        INSERT INTO certificates (student_id, course_id, certificate_code)
        VALUES ($1, $2, $3)
        RETURNING id, student_id, course_id, certificate_code, issued_at
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .bind(generate_certificate_code())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| {
        if matches!(&e, sqlx::Error::Database(db_err) if db_err.is_unique_violation()) {
            AppError::Conflict("Certificate already issued for this course".to_string())
        } else {
            AppError::from(e)
        }
    })?;
    Ok(certificate)
}

/// A student requests a certificate for a course.
///
/// Requires 100% progress, freshly recomputed. The operation is
/// idempotent: an already-issued certificate is returned as-is, and so is
/// a pending or approved request. Only a rejected request mutates (it is
/// reset to pending so the student can try again).
pub async fn request_certificate(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
) -> Result<Response, AppError> {
    let student_id = claims.user_id();

    let mut tx = pool.begin().await?;
    require_enrollment(&mut tx, student_id, course_id).await?;

    if let Some(certificate) = fetch_certificate(&mut tx, student_id, course_id).await? {
        return Ok((StatusCode::OK, Json(certificate)).into_response());
    }

    let outcome = progress::recompute_and_transition(&mut tx, student_id, course_id).await?;
    if outcome.progress < 100.0 {
        return Err(AppError::InvalidState(format!(
            "Course is only {:.2}% complete; certificates require 100%",
            outcome.progress
        )));
    }

    let existing: Option<CertificateRequest> = sqlx::query_as(
        "SELECT id, student_id, course_id, status, requested_at, reviewed_by, reviewed_at,
                rejection_reason
         FROM certificate_requests
         WHERE student_id = $1 AND course_id = $2
         FOR UPDATE",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (status, request): (StatusCode, CertificateRequest) = match existing {
        // Pending and approved requests are returned untouched.
        Some(req) if req.status == "pending" || req.status == "approved" => {
            (StatusCode::OK, req)
        }
        Some(req) => {
            // Rejected: reset to pending for another review round.
            let reset = sqlx::query_as(
                r#"
                UPDATE certificate_requests
                SET status = 'pending', requested_at = $1,
                    reviewed_by = NULL, reviewed_at = NULL, rejection_reason = NULL
                WHERE id = $2
                RETURNING id, student_id, course_id, status, requested_at, reviewed_by,
                          reviewed_at, rejection_reason
                "#,
            )
            .bind(Utc::now())
            .bind(req.id)
            .fetch_one(&mut *tx)
            .await?;
            (StatusCode::CREATED, reset)
        }
        None => {
            let created = sqlx::query_as(
                r#"
                INSERT INTO certificate_requests (student_id, course_id)
                VALUES ($1, $2)
                RETURNING id, student_id, course_id, status, requested_at, reviewed_by,
                          reviewed_at, rejection_reason
                "#,
            )
            .bind(student_id)
            .bind(course_id)
            .fetch_one(&mut *tx)
            .await?;
            (StatusCode::CREATED, created)
        }
    };

    tx.commit().await?;
    Ok((status, Json(request)).into_response())
}

/// Lists pending certificate requests, oldest first (admin).
pub async fn list_requests(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let requests: Vec<CertificateRequest> = sqlx::query_as(
        "SELECT id, student_id, course_id, status, requested_at, reviewed_by, reviewed_at,
                rejection_reason
         FROM certificate_requests WHERE status = 'pending' ORDER BY requested_at",
    )
    .fetch_all(&pool)
    .await?;

    Ok(Json(requests))
}

/// Approves a pending request and issues the certificate atomically (admin).
pub async fn approve_request(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;

    let request: Option<CertificateRequest> = sqlx::query_as(
        "SELECT id, student_id, course_id, status, requested_at, reviewed_by, reviewed_at,
                rejection_reason
         FROM certificate_requests WHERE id = $1 FOR UPDATE",
    )
    .bind(request_id)
    .fetch_optional(&mut *tx)
    .await?;
    let request = request.ok_or(AppError::NotFound("Request not found".to_string()))?;

    if request.status != "pending" {
        return Err(AppError::InvalidState(format!(
            "Request is {}, not pending",
            request.status
        )));
    }

    sqlx::query(
        "UPDATE certificate_requests
         SET status = 'approved', reviewed_by = $1, reviewed_at = $2
         WHERE id = $3",
    )
    .bind(claims.user_id())
    .bind(Utc::now())
    .bind(request_id)
    .execute(&mut *tx)
    .await?;

    let certificate = insert_certificate(&mut tx, request.student_id, request.course_id).await?;
    tx.commit().await?;

    tracing::info!(
        certificate_code = %certificate.certificate_code,
        student_id = request.student_id,
        "certificate issued"
    );
    events::dispatch(
        &pool,
        CourseEvent::CertificateIssued {
            student_id: request.student_id,
            certificate_id: certificate.id,
        },
    )
    .await;

    Ok((StatusCode::CREATED, Json(certificate)))
}

/// Rejects a pending request with a reason (admin).
pub async fn reject_request(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<i64>,
    Json(payload): Json<RejectRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::Validation(validation_errors.to_string()));
    }

    let result = sqlx::query(
        "UPDATE certificate_requests
         SET status = 'rejected', reviewed_by = $1, reviewed_at = $2, rejection_reason = $3
         WHERE id = $4 AND status = 'pending'",
    )
    .bind(claims.user_id())
    .bind(Utc::now())
    .bind(&payload.reason)
    .bind(request_id)
    .execute(&pool)
    .await?;

    if result.rows_affected() == 0 {
        // Either the id is unknown or the request already left pending.
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM certificate_requests WHERE id = $1")
                .bind(request_id)
                .fetch_optional(&pool)
                .await?;
        return Err(match exists {
            Some(_) => AppError::InvalidState("Request is not pending".to_string()),
            None => AppError::NotFound("Request not found".to_string()),
        });
    }

    Ok(Json(json!({ "id": request_id, "status": "rejected" })))
}

/// Issues a certificate directly, bypassing the request queue (admin).
/// Still requires a fully completed course.
pub async fn issue_certificate(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<IssueCertificateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;
    require_enrollment(&mut tx, payload.student_id, payload.course_id).await?;

    let outcome =
        progress::recompute_and_transition(&mut tx, payload.student_id, payload.course_id).await?;
    if outcome.progress < 100.0 {
        return Err(AppError::InvalidState(format!(
            "Course is only {:.2}% complete; certificates require 100%",
            outcome.progress
        )));
    }

    let certificate = insert_certificate(&mut tx, payload.student_id, payload.course_id).await?;

    // Settle any open request for the same pair, stamped with the issuer.
    sqlx::query(
        "UPDATE certificate_requests
         SET status = 'approved', reviewed_by = $1, reviewed_at = $2
         WHERE student_id = $3 AND course_id = $4 AND status = 'pending'",
    )
    .bind(claims.user_id())
    .bind(Utc::now())
    .bind(payload.student_id)
    .bind(payload.course_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    events::dispatch(
        &pool,
        CourseEvent::CertificateIssued {
            student_id: payload.student_id,
            certificate_id: certificate.id,
        },
    )
    .await;

    Ok((StatusCode::CREATED, Json(certificate)))
}

/// Revokes (deletes) an issued certificate (admin). The code stops
/// verifying immediately.
pub async fn revoke_certificate(
    State(pool): State<PgPool>,
    Path(certificate_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM certificates WHERE id = $1")
        .bind(certificate_id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Certificate not found".to_string()));
    }

    Ok(Json(json!({ "id": certificate_id, "revoked": true })))
}

/// Lists the caller's certificates with course titles.
pub async fn my_certificates(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let certificates: Vec<Certificate> = sqlx::query_as(
        "SELECT id, student_id, course_id, certificate_code, issued_at
         FROM certificates WHERE student_id = $1 ORDER BY issued_at DESC",
    )
    .bind(claims.user_id())
    .fetch_all(&pool)
    .await?;

    Ok(Json(certificates))
}

/// Public verification by code, no authentication.
///
/// Malformed codes are rejected by shape without touching the database;
/// both malformed and unknown codes answer 404 so the two cases cannot be
/// told apart.
pub async fn verify_certificate(
    State(pool): State<PgPool>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !is_certificate_code(&code) {
        return Err(AppError::NotFound("Certificate not found".to_string()));
    }

    let verification: Option<CertificateVerification> = sqlx::query_as(
        r#"
        SELECT c.certificate_code, u.full_name AS student_name, co.title AS course_title,
               c.issued_at
        FROM certificates c
        JOIN users u ON c.student_id = u.id
        JOIN courses co ON c.course_id = co.id
        WHERE c.certificate_code = $1
        "#,
    )
    .bind(&code)
    .fetch_optional(&pool)
    .await?;

    let verification =
        verification.ok_or(AppError::NotFound("Certificate not found".to_string()))?;
    Ok(Json(verification))
}

/// Course context for the certificate page: whether the caller can request
/// one and the state of any existing request.
pub async fn certificate_status(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id();

    let mut conn = pool.acquire().await?;
    fetch_course(&mut conn, course_id).await?;
    let enrollment = require_enrollment(&mut conn, student_id, course_id).await?;

    let certificate: Option<Certificate> = sqlx::query_as(
        "SELECT id, student_id, course_id, certificate_code, issued_at
         FROM certificates WHERE student_id = $1 AND course_id = $2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await?;

    let request: Option<CertificateRequest> = sqlx::query_as(
        "SELECT id, student_id, course_id, status, requested_at, reviewed_by, reviewed_at,
                rejection_reason
         FROM certificate_requests WHERE student_id = $1 AND course_id = $2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await?;

    let snap = progress::snapshot(&mut conn, student_id, course_id).await?;
    let pct = progress::percentage(snap);

    Ok(Json(json!({
        "course_id": course_id,
        "progress_percentage": pct,
        "enrollment_status": enrollment.status,
        "eligible": pct >= 100.0 && certificate.is_none(),
        "certificate": certificate,
        "request": request,
    })))
}
