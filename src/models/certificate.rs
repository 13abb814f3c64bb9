// src/models/certificate.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'certificates' table. Immutable once issued; revocation
/// deletes the row rather than mutating it. At most one certificate per
/// (student, course) pair ever, backed by a unique constraint.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Certificate {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub certificate_code: String,
    pub issued_at: chrono::DateTime<chrono::Utc>,
}

/// Represents the 'certificate_requests' table.
///
/// State machine per (student, course): none -> pending -> approved or
/// rejected; a rejected request can be resubmitted (reset to pending);
/// approved is terminal and implies a certificate exists.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub status: String,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub rejection_reason: Option<String>,
}

/// Public verification payload: only the certificate's own fields plus the
/// display names it references, nothing else about the learner.
#[derive(Debug, Serialize, FromRow)]
pub struct CertificateVerification {
    pub certificate_code: String,
    pub student_name: String,
    pub course_title: String,
    pub issued_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for explicit issuance by an admin.
#[derive(Debug, Deserialize)]
pub struct IssueCertificateRequest {
    pub student_id: i64,
    pub course_id: i64,
}

/// DTO for rejecting a certificate request.
#[derive(Debug, Deserialize, Validate)]
pub struct RejectRequest {
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
}
