// Payment hold state machine and persistence
// Every write is a compare-and-swap from the single source status of its event.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::domain::{HoldStatus, PaymentHold};
use crate::error::EscrowError;

/// Documented hold edges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldEvent {
    /// Job approved
    Approve,
    /// Release claimed before the provider call
    ClaimRelease,
    /// Provider confirmed the release
    Settle,
    /// Provider failed while the job is still releasable
    RevertToReleasable,
    /// Provider failed after the job left releasable
    RevertToHeld,
    /// Dispute re-holds funds
    Rehold,
}

impl HoldEvent {
    pub fn from_status(&self) -> HoldStatus {
        match self {
            HoldEvent::Approve => HoldStatus::Held,
            HoldEvent::ClaimRelease | HoldEvent::Rehold => HoldStatus::Releasable,
            HoldEvent::Settle | HoldEvent::RevertToReleasable | HoldEvent::RevertToHeld => {
                HoldStatus::Releasing
            }
        }
    }

    pub fn to_status(&self) -> HoldStatus {
        match self {
            HoldEvent::Approve | HoldEvent::RevertToReleasable => HoldStatus::Releasable,
            HoldEvent::ClaimRelease => HoldStatus::Releasing,
            HoldEvent::Settle => HoldStatus::Released,
            HoldEvent::RevertToHeld | HoldEvent::Rehold => HoldStatus::Held,
        }
    }
}

/// Next status if `event` is valid from `current`
pub fn next_status(current: HoldStatus, event: HoldEvent) -> Option<HoldStatus> {
    (current == event.from_status()).then(|| event.to_status())
}

fn hold_from_row(row: &SqliteRow) -> Result<PaymentHold, EscrowError> {
    Ok(PaymentHold {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        amount_cents: row.try_get("amount_cents")?,
        rail: row.try_get::<String, _>("rail")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        provider: row.try_get("provider")?,
        provider_ref: row.try_get("provider_ref")?,
        idempotency_key: row.try_get("idempotency_key")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) async fn insert(conn: &mut SqliteConnection, hold: &PaymentHold) -> Result<(), EscrowError> {
    sqlx::query(
        r#"
        INSERT INTO payment_holds (id, job_id, amount_cents, rail, status, provider, provider_ref,
                                   idempotency_key, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&hold.id)
    .bind(&hold.job_id)
    .bind(hold.amount_cents)
    .bind(hold.rail.as_str())
    .bind(hold.status.as_str())
    .bind(&hold.provider)
    .bind(&hold.provider_ref)
    .bind(&hold.idempotency_key)
    .bind(hold.created_at)
    .bind(hold.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn require_for_job(
    conn: &mut SqliteConnection,
    job_id: &str,
) -> Result<PaymentHold, EscrowError> {
    let row = sqlx::query("SELECT * FROM payment_holds WHERE job_id = ?1")
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| EscrowError::not_found("payment hold", job_id))?;

    hold_from_row(&row)
}

/// Apply an event that carries no extra fields
pub(crate) async fn apply(
    conn: &mut SqliteConnection,
    hold_id: &str,
    event: HoldEvent,
    now: DateTime<Utc>,
) -> Result<bool, EscrowError> {
    let result = sqlx::query(
        "UPDATE payment_holds SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
    )
    .bind(event.to_status().as_str())
    .bind(now)
    .bind(hold_id)
    .bind(event.from_status().as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// releasable -> releasing, recording the key the provider will see
pub(crate) async fn claim_release(
    conn: &mut SqliteConnection,
    hold_id: &str,
    idempotency_key: &str,
    provider: &str,
    now: DateTime<Utc>,
) -> Result<bool, EscrowError> {
    let event = HoldEvent::ClaimRelease;
    let result = sqlx::query(
        r#"
        UPDATE payment_holds
        SET status = ?1, idempotency_key = ?2, provider = ?3, updated_at = ?4
        WHERE id = ?5 AND status = ?6
        "#,
    )
    .bind(event.to_status().as_str())
    .bind(idempotency_key)
    .bind(provider)
    .bind(now)
    .bind(hold_id)
    .bind(event.from_status().as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// releasing -> released with the provider's reference
pub(crate) async fn settle(
    conn: &mut SqliteConnection,
    hold_id: &str,
    provider: &str,
    provider_ref: &str,
    idempotency_key: &str,
    now: DateTime<Utc>,
) -> Result<bool, EscrowError> {
    let event = HoldEvent::Settle;
    let result = sqlx::query(
        r#"
        UPDATE payment_holds
        SET status = ?1, provider = ?2, provider_ref = ?3, idempotency_key = ?4, updated_at = ?5
        WHERE id = ?6 AND status = ?7
        "#,
    )
    .bind(event.to_status().as_str())
    .bind(provider)
    .bind(provider_ref)
    .bind(idempotency_key)
    .bind(now)
    .bind(hold_id)
    .bind(event.from_status().as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Holds awaiting a provider outcome, oldest first
pub(crate) async fn list_releasing(
    conn: &mut SqliteConnection,
    limit: i64,
) -> Result<Vec<PaymentHold>, EscrowError> {
    let rows = sqlx::query(
        "SELECT * FROM payment_holds WHERE status = ?1 ORDER BY updated_at, id LIMIT ?2",
    )
    .bind(HoldStatus::Releasing.as_str())
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(hold_from_row).collect()
}
