// Evidence Ledger - proof items per job, tombstone redaction

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{info, warn};
use uuid::Uuid;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use super::decision_log;
use crate::clock::Clock;
use crate::database::Store;
use crate::domain::{
    Actor, DecisionAction, DecisionSnapshot, EvidenceItem, EvidenceSubmission, EvidenceType,
    EvidenceUploadSnapshot, GeoPoint, Job, NewDecision, RedactionSnapshot,
};
use crate::error::EscrowError;
use crate::gate::EvidenceCounts;
use crate::jobs;
use crate::workflow::authorization::{authorize, Operation};

const ISSUE_MIN_CHARS: usize = 5;
const ISSUE_MAX_CHARS: usize = 1000;
const ISSUE_PREVIEW_CHARS: usize = 140;

/// Object storage holding evidence photos. Only deletion is needed here.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn delete_object(&self, storage_key: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub job_id: String,
    pub inserted: Vec<String>,
    pub skipped: usize,
    /// Counts over non-redacted evidence after the submission
    pub counts: EvidenceCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedactionReceipt {
    pub evidence_id: String,
    pub redacted_at: DateTime<Utc>,
    pub object_deleted: bool,
}

pub struct EvidenceLedger {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl EvidenceLedger {
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record a batch of evidence. Re-submitted items are skipped, not duplicated.
    pub async fn submit(
        &self,
        job_id: &str,
        actor: &Actor,
        items: Vec<EvidenceSubmission>,
    ) -> Result<SubmissionReceipt, EscrowError> {
        authorize(actor, Operation::SubmitEvidence, Some(job_id))?;
        if items.is_empty() {
            return Err(EscrowError::Validation(
                "at least one evidence item is required".to_string(),
            ));
        }
        for item in &items {
            item.validate()?;
        }

        let now = self.clock.now();
        let actor_id = actor.log_string();
        let mut unit = self.store.begin().await?;

        let job = jobs::require_job(&mut unit, job_id).await?;
        ensure_carrier_window(&job, actor)?;

        let mut known = list_for_job(&mut unit, job_id, true).await?;
        let mut inserted = Vec::new();
        let mut skipped = 0;

        for submission in items {
            if known.iter().any(|existing| submission.duplicates(existing)) {
                skipped += 1;
                continue;
            }
            let item = new_item(job_id, &actor_id, submission, now);
            insert(&mut unit, &item).await?;
            inserted.push(item.id.clone());
            known.push(item);
        }

        decision_log::append(
            &mut unit,
            NewDecision::new(job_id, DecisionAction::EvidenceUpload, actor_id)
                .reason(format!("inserted={} skipped={}", inserted.len(), skipped))
                .snapshot(DecisionSnapshot::EvidenceUpload(EvidenceUploadSnapshot {
                    inserted: inserted.clone(),
                    skipped,
                    issue: None,
                })),
            now,
        )
        .await?;

        unit.commit().await?;

        let active: Vec<EvidenceItem> = known.into_iter().filter(|i| !i.is_redacted()).collect();
        info!(job_id, inserted = inserted.len(), skipped, "Evidence recorded");

        Ok(SubmissionReceipt {
            job_id: job_id.to_string(),
            inserted,
            skipped,
            counts: EvidenceCounts::tally(&active),
        })
    }

    /// Carrier-reported problem, kept as a note
    pub async fn report_issue(
        &self,
        job_id: &str,
        actor: &Actor,
        message: &str,
    ) -> Result<SubmissionReceipt, EscrowError> {
        authorize(actor, Operation::ReportIssue, Some(job_id))?;

        let message = message.trim();
        let length = message.chars().count();
        if !(ISSUE_MIN_CHARS..=ISSUE_MAX_CHARS).contains(&length) {
            return Err(EscrowError::Validation(format!(
                "issue message must be {}-{} characters",
                ISSUE_MIN_CHARS, ISSUE_MAX_CHARS
            )));
        }

        let now = self.clock.now();
        let actor_id = actor.log_string();
        let mut unit = self.store.begin().await?;

        let job = jobs::require_job(&mut unit, job_id).await?;
        ensure_carrier_window(&job, actor)?;

        let item = new_item(
            job_id,
            &actor_id,
            EvidenceSubmission::text(EvidenceType::Note, message),
            now,
        );
        insert(&mut unit, &item).await?;

        let preview: String = message.chars().take(ISSUE_PREVIEW_CHARS).collect();
        decision_log::append(
            &mut unit,
            NewDecision::new(job_id, DecisionAction::EvidenceUpload, actor_id)
                .reason(format!("issue_reported: {}", preview))
                .snapshot(DecisionSnapshot::EvidenceUpload(EvidenceUploadSnapshot {
                    inserted: vec![item.id.clone()],
                    skipped: 0,
                    issue: Some(message.to_string()),
                })),
            now,
        )
        .await?;

        let active = active_for_job(&mut unit, job_id).await?;
        unit.commit().await?;

        warn!(job_id, evidence_id = %item.id, "Carrier reported an issue");

        Ok(SubmissionReceipt {
            job_id: job_id.to_string(),
            inserted: vec![item.id],
            skipped: 0,
            counts: EvidenceCounts::tally(&active),
        })
    }

    /// Tombstone an item. The row stays; the stored object may be deleted afterwards.
    pub async fn redact(
        &self,
        job_id: &str,
        evidence_id: &str,
        actor: &Actor,
        reason: &str,
        objects: Option<&dyn ObjectStore>,
    ) -> Result<RedactionReceipt, EscrowError> {
        authorize(actor, Operation::RedactEvidence, Some(job_id))?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EscrowError::Validation(
                "a redaction reason is required".to_string(),
            ));
        }

        let now = self.clock.now();
        let actor_id = actor.log_string();
        let mut unit = self.store.begin().await?;

        let item = fetch_item(&mut unit, job_id, evidence_id)
            .await?
            .ok_or_else(|| EscrowError::not_found("evidence", evidence_id))?;

        let tombstoned = sqlx::query(
            r#"
            UPDATE evidence_items
            SET redacted_at = ?1, redacted_by = ?2, redact_reason = ?3
            WHERE id = ?4 AND job_id = ?5 AND redacted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(&actor_id)
        .bind(reason)
        .bind(evidence_id)
        .bind(job_id)
        .execute(&mut *unit)
        .await?
        .rows_affected()
            == 1;

        if !tombstoned {
            return Err(EscrowError::Conflict(format!(
                "evidence {} is already redacted",
                evidence_id
            )));
        }

        let delete_requested = objects.is_some() && item.storage_key.is_some();
        decision_log::append(
            &mut unit,
            NewDecision::new(job_id, DecisionAction::RedactEvidence, actor_id)
                .reason(reason)
                .snapshot(DecisionSnapshot::Redaction(RedactionSnapshot {
                    evidence_id: evidence_id.to_string(),
                    evidence_type: item.evidence_type,
                    storage_key: item.storage_key.clone(),
                    delete_requested,
                })),
            now,
        )
        .await?;

        unit.commit().await?;
        info!(job_id, evidence_id, "Evidence redacted");

        let mut object_deleted = false;
        if let (Some(objects), Some(key)) = (objects, item.storage_key.as_deref()) {
            match objects.delete_object(key).await {
                Ok(()) => object_deleted = true,
                Err(e) => warn!(job_id, evidence_id, storage_key = key, error = %e, "Object delete failed; tombstone kept"),
            }
        }

        Ok(RedactionReceipt {
            evidence_id: evidence_id.to_string(),
            redacted_at: now,
            object_deleted,
        })
    }

    pub async fn list(
        &self,
        job_id: &str,
        include_redacted: bool,
    ) -> Result<Vec<EvidenceItem>, EscrowError> {
        let mut conn = self.store.pool().acquire().await?;
        list_for_job(&mut conn, job_id, include_redacted).await
    }
}

/// Carriers may add evidence only while the job is in their hands
fn ensure_carrier_window(job: &Job, actor: &Actor) -> Result<(), EscrowError> {
    if actor.is_carrier() && !job.status.is_carrier_active() {
        return Err(EscrowError::Conflict(format!(
            "job is {}; carrier evidence is accepted from ASSIGNED through DELIVERY_SUBMITTED",
            job.status
        )));
    }
    Ok(())
}

fn new_item(
    job_id: &str,
    actor_id: &str,
    submission: EvidenceSubmission,
    now: DateTime<Utc>,
) -> EvidenceItem {
    EvidenceItem {
        id: Uuid::new_v4().to_string(),
        job_id: job_id.to_string(),
        evidence_type: submission.evidence_type,
        storage_key: submission.storage_key.map(|k| k.trim().to_string()),
        value: submission.value,
        submitted_by: actor_id.to_string(),
        gps: submission.gps,
        created_at: now,
        redacted_at: None,
        redacted_by: None,
        redact_reason: None,
    }
}

fn item_from_row(row: &SqliteRow) -> Result<EvidenceItem, EscrowError> {
    let lat: Option<f64> = row.try_get("gps_lat")?;
    let lng: Option<f64> = row.try_get("gps_lng")?;
    Ok(EvidenceItem {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        evidence_type: row.try_get::<String, _>("evidence_type")?.parse()?,
        storage_key: row.try_get("storage_key")?,
        value: row.try_get("value")?,
        submitted_by: row.try_get("submitted_by")?,
        gps: lat.zip(lng).map(|(lat, lng)| GeoPoint { lat, lng }),
        created_at: row.try_get("created_at")?,
        redacted_at: row.try_get("redacted_at")?,
        redacted_by: row.try_get("redacted_by")?,
        redact_reason: row.try_get("redact_reason")?,
    })
}

async fn insert(conn: &mut SqliteConnection, item: &EvidenceItem) -> Result<(), EscrowError> {
    sqlx::query(
        r#"
        INSERT INTO evidence_items (id, job_id, evidence_type, storage_key, value, submitted_by,
                                    gps_lat, gps_lng, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&item.id)
    .bind(&item.job_id)
    .bind(item.evidence_type.as_str())
    .bind(&item.storage_key)
    .bind(&item.value)
    .bind(&item.submitted_by)
    .bind(item.gps.map(|g| g.lat))
    .bind(item.gps.map(|g| g.lng))
    .bind(item.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn fetch_item(
    conn: &mut SqliteConnection,
    job_id: &str,
    evidence_id: &str,
) -> Result<Option<EvidenceItem>, EscrowError> {
    let row = sqlx::query("SELECT * FROM evidence_items WHERE id = ?1 AND job_id = ?2")
        .bind(evidence_id)
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(item_from_row).transpose()
}

/// Evidence for a job in submission order
pub(crate) async fn list_for_job(
    conn: &mut SqliteConnection,
    job_id: &str,
    include_redacted: bool,
) -> Result<Vec<EvidenceItem>, EscrowError> {
    let sql = if include_redacted {
        "SELECT * FROM evidence_items WHERE job_id = ?1 ORDER BY seq"
    } else {
        "SELECT * FROM evidence_items WHERE job_id = ?1 AND redacted_at IS NULL ORDER BY seq"
    };

    let rows = sqlx::query(sql).bind(job_id).fetch_all(&mut *conn).await?;
    rows.iter().map(item_from_row).collect()
}

/// Evidence that counts toward the gate
pub(crate) async fn active_for_job(
    conn: &mut SqliteConnection,
    job_id: &str,
) -> Result<Vec<EvidenceItem>, EscrowError> {
    list_for_job(conn, job_id, false).await
}
