// Decision Log - append-only audit sink
// Rows are never updated or deleted; the schema rejects both with triggers.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;
use uuid::Uuid;

use crate::database::Store;
use crate::domain::{DecisionAction, DecisionLogEntry, DecisionSnapshot, NewDecision};
use crate::error::EscrowError;
use crate::gate::GateEvaluation;

/// Read access to the log for callers outside a unit of work
#[derive(Debug, Clone)]
pub struct DecisionLog {
    store: Store,
}

impl DecisionLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Entries for a job, oldest first
    pub async fn entries(&self, job_id: &str) -> Result<Vec<DecisionLogEntry>, EscrowError> {
        let mut conn = self.store.pool().acquire().await?;
        let mut entries = list_for_job(&mut conn, job_id, None).await?;
        entries.reverse();
        Ok(entries)
    }

    pub async fn last(
        &self,
        job_id: &str,
        action: DecisionAction,
    ) -> Result<Option<DecisionLogEntry>, EscrowError> {
        let mut conn = self.store.pool().acquire().await?;
        last_for_action(&mut conn, job_id, action).await
    }

    pub async fn count(&self, job_id: &str, action: DecisionAction) -> Result<i64, EscrowError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM decision_log WHERE job_id = ?1 AND action = ?2")
                .bind(job_id)
                .bind(action.as_str())
                .fetch_one(self.store.pool())
                .await?;
        Ok(count)
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<DecisionLogEntry, EscrowError> {
    let snapshot: String = row.try_get("snapshot")?;
    Ok(DecisionLogEntry {
        seq: row.try_get("seq")?,
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        action: row.try_get::<String, _>("action")?.parse()?,
        actor: row.try_get("actor")?,
        reason: row.try_get("reason")?,
        snapshot: serde_json::from_str(&snapshot)?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) async fn append(
    conn: &mut SqliteConnection,
    decision: NewDecision,
    now: DateTime<Utc>,
) -> Result<DecisionLogEntry, EscrowError> {
    let id = Uuid::new_v4().to_string();
    let snapshot = serde_json::to_string(&decision.snapshot)?;

    let seq: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO decision_log (id, job_id, action, actor, reason, snapshot, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        RETURNING seq
        "#,
    )
    .bind(&id)
    .bind(&decision.job_id)
    .bind(decision.action.as_str())
    .bind(&decision.actor)
    .bind(&decision.reason)
    .bind(&snapshot)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    debug!(job_id = %decision.job_id, action = %decision.action, seq, "Decision logged");

    Ok(DecisionLogEntry {
        seq,
        id,
        job_id: decision.job_id,
        action: decision.action,
        actor: decision.actor,
        reason: decision.reason,
        snapshot: decision.snapshot,
        created_at: now,
    })
}

pub(crate) async fn last_for_action(
    conn: &mut SqliteConnection,
    job_id: &str,
    action: DecisionAction,
) -> Result<Option<DecisionLogEntry>, EscrowError> {
    let row = sqlx::query(
        "SELECT * FROM decision_log WHERE job_id = ?1 AND action = ?2 ORDER BY seq DESC LIMIT 1",
    )
    .bind(job_id)
    .bind(action.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(entry_from_row).transpose()
}

/// Gate result recorded by the most recent entry of `action`
pub(crate) async fn last_gate_snapshot(
    conn: &mut SqliteConnection,
    job_id: &str,
    action: DecisionAction,
) -> Result<Option<GateEvaluation>, EscrowError> {
    Ok(last_for_action(conn, job_id, action)
        .await?
        .and_then(|entry| match entry.snapshot {
            DecisionSnapshot::Gate(evaluation) => Some(evaluation),
            _ => None,
        }))
}

/// Entries for a job, newest first
pub(crate) async fn list_for_job(
    conn: &mut SqliteConnection,
    job_id: &str,
    limit: Option<i64>,
) -> Result<Vec<DecisionLogEntry>, EscrowError> {
    let rows = sqlx::query("SELECT * FROM decision_log WHERE job_id = ?1 ORDER BY seq DESC LIMIT ?2")
        .bind(job_id)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(entry_from_row).collect()
}
