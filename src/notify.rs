// src/notify.rs
//
// Fire-and-forget Notifier. Events are written to the notifications outbox
// table; an out-of-scope delivery worker turns them into email/push. A
// failed insert is logged and swallowed — notification delivery must never
// abort the operation that produced the event.

use sqlx::PgPool;

pub async fn deliver(
    pool: &PgPool,
    recipient_id: i64,
    sender_id: Option<i64>,
    kind: &str,
    title: &str,
    body: &str,
    related_id: Option<i64>,
) {
    let result = sqlx::query(
        "INSERT INTO notifications (recipient_id, sender_id, kind, title, body, related_id)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(recipient_id)
    .bind(sender_id)
    .bind(kind)
    .bind(title)
    .bind(body)
    .bind(related_id)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(recipient_id, kind, "failed to deliver notification: {}", e);
    }
}
