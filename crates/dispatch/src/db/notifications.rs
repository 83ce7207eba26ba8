//! Notification delivery log.

use sqlx::PgConnection;

use crate::models::NotificationRecord;
use crate::store::StoreError;

pub(super) async fn insert(
    conn: &mut PgConnection,
    record: &NotificationRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO notifications \
             (ride_id, recipient_role, recipient_id, event, attempts, delivered, last_error, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(record.ride_id)
    .bind(record.recipient.role.as_str())
    .bind(record.recipient.id)
    .bind(&record.event)
    .bind(i32::try_from(record.attempts).unwrap_or(i32::MAX))
    .bind(record.delivered)
    .bind(record.last_error.as_deref())
    .bind(record.created_at)
    .execute(conn)
    .await?;
    Ok(())
}
