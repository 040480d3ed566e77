// Notification Outbox
// Enqueue happens inside the unit of work that decided to notify. A collaborator
// drains queued rows and reports delivery failures back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::OutboxConfig;
use crate::database::Store;
use crate::domain::{
    Actor, DecisionAction, DecisionSnapshot, NewDecision, NotificationSnapshot, OutboxKind,
    OutboxMessage, OutboxPayload, OutboxStatus, Recipient,
};
use crate::error::EscrowError;
use crate::ledger::decision_log;
use crate::observability::EngineMetrics;
use crate::workflow::authorization::{authorize, Operation};

#[derive(Debug, Clone)]
pub struct OutboxSettings {
    pub default_drain_limit: u32,
    pub max_drain_limit: u32,
}

impl OutboxSettings {
    pub fn from_config(config: &OutboxConfig) -> Self {
        Self {
            default_drain_limit: config.default_drain_limit,
            max_drain_limit: config.max_drain_limit.max(1),
        }
    }

    /// Requested limit, defaulted and clamped to 1..=max
    pub fn effective_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_drain_limit)
            .clamp(1, self.max_drain_limit)
    }
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self::from_config(&OutboxConfig::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DrainReport {
    pub limit: u32,
    pub drained: Vec<OutboxMessage>,
}

/// What happened to a message whose delivery failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDisposition {
    /// Back in the queue for the next drain
    Requeued,
    /// A newer queued message for the same job and type replaces it
    Superseded,
    /// Was still queued; error recorded
    StillQueued,
}

pub struct Outbox {
    store: Store,
    clock: Arc<dyn Clock>,
    settings: OutboxSettings,
    metrics: Arc<EngineMetrics>,
}

impl Outbox {
    pub fn new(
        store: Store,
        clock: Arc<dyn Clock>,
        settings: OutboxSettings,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
            metrics,
        }
    }

    /// Enqueue outside any other unit of work
    pub async fn enqueue(
        &self,
        recipient: &Recipient,
        payload: &OutboxPayload,
    ) -> Result<String, EscrowError> {
        let mut unit = self.store.begin().await?;
        let id = enqueue_in(&mut unit, recipient, payload, self.clock.now()).await?;
        unit.commit().await?;
        Ok(id)
    }

    /// Claim up to `limit` queued messages, oldest first, and mark them sent
    pub async fn drain(&self, limit: Option<u32>, actor: &Actor) -> Result<DrainReport, EscrowError> {
        authorize(actor, Operation::DrainOutbox, None)?;

        let limit = self.settings.effective_limit(limit);
        let now = self.clock.now();
        let actor_id = actor.log_string();
        let mut unit = self.store.begin().await?;

        let rows = sqlx::query("SELECT * FROM outbox_messages WHERE status = ?1 ORDER BY seq LIMIT ?2")
            .bind(OutboxStatus::Queued.as_str())
            .bind(limit as i64)
            .fetch_all(&mut *unit)
            .await?;
        let candidates = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let mut drained = Vec::with_capacity(candidates.len());
        for mut message in candidates {
            let claimed = sqlx::query(
                r#"
                UPDATE outbox_messages
                SET status = ?1, sent_at = ?2, attempts = attempts + 1, last_error = NULL, updated_at = ?2
                WHERE id = ?3 AND status = ?4
                "#,
            )
            .bind(OutboxStatus::Sent.as_str())
            .bind(now)
            .bind(&message.id)
            .bind(OutboxStatus::Queued.as_str())
            .execute(&mut *unit)
            .await?
            .rows_affected()
                == 1;

            if !claimed {
                continue;
            }

            message.status = OutboxStatus::Sent;
            message.sent_at = Some(now);
            message.attempts += 1;
            message.last_error = None;
            message.updated_at = now;

            decision_log::append(
                &mut unit,
                NewDecision::new(&message.job_id, DecisionAction::NotificationSent, actor_id.clone())
                    .reason(message.kind.as_str())
                    .snapshot(DecisionSnapshot::Notification(NotificationSnapshot {
                        outbox_id: message.id.clone(),
                        message_type: message.kind,
                        invite_id: message.recipient.invite_id.clone(),
                        to_email: message.recipient.email.clone(),
                        to_phone: message.recipient.phone.clone(),
                        payload: message.payload.clone(),
                    })),
                now,
            )
            .await?;

            drained.push(message);
        }

        unit.commit().await?;

        self.metrics.record_drained(drained.len() as u64);
        info!(limit, drained = drained.len(), "Outbox drained");

        Ok(DrainReport { limit, drained })
    }

    /// Record a delivery failure reported by the sender
    pub async fn record_failure(
        &self,
        message_id: &str,
        error: &str,
    ) -> Result<FailureDisposition, EscrowError> {
        let now = self.clock.now();
        let mut unit = self.store.begin().await?;

        let message = fetch(&mut unit, message_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("outbox message", message_id))?;

        let disposition = if message.status == OutboxStatus::Queued {
            FailureDisposition::StillQueued
        } else if queued_exists(&mut unit, &message.job_id, message.kind).await? {
            FailureDisposition::Superseded
        } else {
            FailureDisposition::Requeued
        };

        let status = match disposition {
            FailureDisposition::Requeued | FailureDisposition::StillQueued => OutboxStatus::Queued,
            FailureDisposition::Superseded => message.status,
        };

        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET last_error = ?1, status = ?2,
                sent_at = CASE WHEN ?2 = 'queued' THEN NULL ELSE sent_at END,
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(error)
        .bind(status.as_str())
        .bind(now)
        .bind(message_id)
        .execute(&mut *unit)
        .await?;

        unit.commit().await?;

        warn!(message_id, job_id = %message.job_id, ?disposition, error, "Notification delivery failed");
        Ok(disposition)
    }

    pub async fn queued(&self) -> Result<Vec<OutboxMessage>, EscrowError> {
        let rows = sqlx::query("SELECT * FROM outbox_messages WHERE status = ?1 ORDER BY seq")
            .bind(OutboxStatus::Queued.as_str())
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    pub async fn messages_for_job(&self, job_id: &str) -> Result<Vec<OutboxMessage>, EscrowError> {
        let rows = sqlx::query("SELECT * FROM outbox_messages WHERE job_id = ?1 ORDER BY seq")
            .bind(job_id)
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(message_from_row).collect()
    }
}

/// Insert a queued message, or overwrite the queued one for the same job and type
pub(crate) async fn enqueue_in(
    conn: &mut SqliteConnection,
    recipient: &Recipient,
    payload: &OutboxPayload,
    now: DateTime<Utc>,
) -> Result<String, EscrowError> {
    let kind = payload.kind();
    let job_id = payload.job_id();
    let body = serde_json::to_string(payload)?;

    let coalesced: Option<String> = sqlx::query_scalar(
        r#"
        UPDATE outbox_messages
        SET payload = ?1, invite_id = ?2, to_email = ?3, to_phone = ?4,
            attempts = 0, last_error = NULL, sent_at = NULL, updated_at = ?5
        WHERE job_id = ?6 AND message_type = ?7 AND status = ?8
        RETURNING id
        "#,
    )
    .bind(&body)
    .bind(&recipient.invite_id)
    .bind(&recipient.email)
    .bind(&recipient.phone)
    .bind(now)
    .bind(job_id)
    .bind(kind.as_str())
    .bind(OutboxStatus::Queued.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(id) = coalesced {
        info!(job_id, message_type = %kind, outbox_id = %id, "Queued notification replaced");
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO outbox_messages (id, job_id, message_type, status, invite_id, to_email, to_phone,
                                     payload, attempts, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)
        "#,
    )
    .bind(&id)
    .bind(job_id)
    .bind(kind.as_str())
    .bind(OutboxStatus::Queued.as_str())
    .bind(&recipient.invite_id)
    .bind(&recipient.email)
    .bind(&recipient.phone)
    .bind(&body)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    info!(job_id, message_type = %kind, outbox_id = %id, "Notification queued");
    Ok(id)
}

async fn fetch(conn: &mut SqliteConnection, message_id: &str) -> Result<Option<OutboxMessage>, EscrowError> {
    let row = sqlx::query("SELECT * FROM outbox_messages WHERE id = ?1")
        .bind(message_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(message_from_row).transpose()
}

async fn queued_exists(
    conn: &mut SqliteConnection,
    job_id: &str,
    kind: OutboxKind,
) -> Result<bool, EscrowError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM outbox_messages WHERE job_id = ?1 AND message_type = ?2 AND status = ?3",
    )
    .bind(job_id)
    .bind(kind.as_str())
    .bind(OutboxStatus::Queued.as_str())
    .fetch_one(&mut *conn)
    .await?;

    Ok(count > 0)
}

fn message_from_row(row: &SqliteRow) -> Result<OutboxMessage, EscrowError> {
    let payload: String = row.try_get("payload")?;
    Ok(OutboxMessage {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        kind: row.try_get::<String, _>("message_type")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        recipient: Recipient {
            invite_id: row.try_get("invite_id")?,
            email: row.try_get("to_email")?,
            phone: row.try_get("to_phone")?,
        },
        payload: serde_json::from_str(&payload)?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        sent_at: row.try_get("sent_at")?,
    })
}
