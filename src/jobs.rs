// Job intake, lookup and review summaries

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::database::Store;
use crate::domain::{
    string_enum, Actor, CarrierAssignment, DecisionLogEntry, EvidenceItem, GateConfig, HoldStatus,
    Job, JobIntake, JobStatus, PaymentHold,
};
use crate::error::EscrowError;
use crate::gate::{GateEvaluation, Phase};
use crate::ledger::{decision_log, evidence};
use crate::payments::hold;
use crate::workflow::authorization::{authorize, Operation};

const REVIEW_LOG_LIMIT: i64 = 50;
const MAX_VIN_LEN: usize = 32;

/// Where a job stands from the approver's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Open,
    ReadyForReview,
    Approved,
    Released,
}

string_enum!(ReviewState, "review state", {
    Open => "OPEN",
    ReadyForReview => "READY_FOR_REVIEW",
    Approved => "APPROVED",
    Released => "RELEASED",
});

pub fn review_state(status: JobStatus, hold: HoldStatus, gate_passes: bool) -> ReviewState {
    if hold == HoldStatus::Released {
        ReviewState::Released
    } else if status == JobStatus::Releasable {
        ReviewState::Approved
    } else if status == JobStatus::DeliverySubmitted && gate_passes {
        ReviewState::ReadyForReview
    } else {
        ReviewState::Open
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReview {
    pub job: Job,
    pub gate: GateConfig,
    pub hold: PaymentHold,
    pub evaluation: GateEvaluation,
    pub review_state: ReviewState,
    pub evidence: Vec<EvidenceItem>,
    pub recent_decisions: Vec<DecisionLogEntry>,
}

pub struct Jobs {
    store: Store,
    clock: Arc<dyn Clock>,
    gate_defaults: GateConfig,
    provider_name: String,
}

impl Jobs {
    pub fn new(
        store: Store,
        clock: Arc<dyn Clock>,
        gate_defaults: GateConfig,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            gate_defaults,
            provider_name: provider_name.into(),
        }
    }

    /// Create a draft job with its gate and a held payment in one unit
    pub async fn intake(&self, actor: &Actor, intake: JobIntake) -> Result<Job, EscrowError> {
        authorize(actor, Operation::Intake, None)?;
        validate_intake(&intake)?;

        let now = self.clock.now();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            vin: intake.vin.trim().to_string(),
            pickup_address: intake.pickup_address.trim().to_string(),
            dropoff_address: intake.dropoff_address.trim().to_string(),
            price_cents: intake.price_cents,
            delivery_deadline: intake.delivery_deadline,
            carrier_name: None,
            carrier_email: None,
            carrier_phone: None,
            status: JobStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        let gate = intake.gate.apply(&self.gate_defaults);
        let payment = PaymentHold {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            amount_cents: job.price_cents,
            rail: intake.rail,
            status: HoldStatus::Held,
            provider: self.provider_name.clone(),
            provider_ref: None,
            idempotency_key: None,
            created_at: now,
            updated_at: now,
        };

        let mut unit = self.store.begin().await?;
        insert_job(&mut unit, &job).await?;
        insert_gate(&mut unit, &job.id, &gate).await?;
        hold::insert(&mut unit, &payment).await?;
        unit.commit().await?;

        info!(job_id = %job.id, actor = %actor.log_string(), price_cents = job.price_cents, "Job created");
        Ok(job)
    }

    pub async fn get(&self, job_id: &str) -> Result<Job, EscrowError> {
        let mut conn = self.store.pool().acquire().await?;
        require_job(&mut conn, job_id).await
    }

    pub async fn gate(&self, job_id: &str) -> Result<GateConfig, EscrowError> {
        let mut conn = self.store.pool().acquire().await?;
        fetch_gate(&mut conn, job_id).await
    }

    pub async fn hold(&self, job_id: &str) -> Result<PaymentHold, EscrowError> {
        let mut conn = self.store.pool().acquire().await?;
        hold::require_for_job(&mut conn, job_id).await
    }

    /// Everything an approver needs on one screen
    pub async fn review(&self, job_id: &str, actor: &Actor) -> Result<JobReview, EscrowError> {
        authorize(actor, Operation::Review, Some(job_id))?;

        let mut conn = self.store.pool().acquire().await?;
        let job = require_job(&mut conn, job_id).await?;
        let gate = fetch_gate(&mut conn, job_id).await?;
        let payment = hold::require_for_job(&mut conn, job_id).await?;
        let all_evidence = evidence::list_for_job(&mut conn, job_id, true).await?;
        let active: Vec<EvidenceItem> = all_evidence
            .iter()
            .filter(|item| !item.is_redacted())
            .cloned()
            .collect();
        let evaluation = Phase::Full.evaluate(&job, &gate, &active, self.clock.now());
        let recent_decisions =
            decision_log::list_for_job(&mut conn, job_id, Some(REVIEW_LOG_LIMIT)).await?;

        Ok(JobReview {
            review_state: review_state(job.status, payment.status, evaluation.pass),
            job,
            gate,
            hold: payment,
            evaluation,
            evidence: all_evidence,
            recent_decisions,
        })
    }
}

fn validate_intake(intake: &JobIntake) -> Result<(), EscrowError> {
    let vin = intake.vin.trim();
    if vin.is_empty() || vin.len() > MAX_VIN_LEN {
        return Err(EscrowError::Validation(format!(
            "vin must be 1-{} characters",
            MAX_VIN_LEN
        )));
    }
    if intake.pickup_address.trim().is_empty() || intake.dropoff_address.trim().is_empty() {
        return Err(EscrowError::Validation(
            "pickup and dropoff addresses are required".to_string(),
        ));
    }
    if intake.price_cents <= 0 {
        return Err(EscrowError::Validation(
            "price must be a positive amount of minor units".to_string(),
        ));
    }
    Ok(())
}

fn job_from_row(row: &SqliteRow) -> Result<Job, EscrowError> {
    Ok(Job {
        id: row.try_get("id")?,
        vin: row.try_get("vin")?,
        pickup_address: row.try_get("pickup_address")?,
        dropoff_address: row.try_get("dropoff_address")?,
        price_cents: row.try_get("price_cents")?,
        delivery_deadline: row.try_get("delivery_deadline")?,
        carrier_name: row.try_get("carrier_name")?,
        carrier_email: row.try_get("carrier_email")?,
        carrier_phone: row.try_get("carrier_phone")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) async fn fetch_job(
    conn: &mut SqliteConnection,
    job_id: &str,
) -> Result<Option<Job>, EscrowError> {
    let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

pub(crate) async fn require_job(conn: &mut SqliteConnection, job_id: &str) -> Result<Job, EscrowError> {
    fetch_job(conn, job_id)
        .await?
        .ok_or_else(|| EscrowError::not_found("job", job_id))
}

pub(crate) async fn fetch_gate(
    conn: &mut SqliteConnection,
    job_id: &str,
) -> Result<GateConfig, EscrowError> {
    let row = sqlx::query("SELECT * FROM gate_configs WHERE job_id = ?1")
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| EscrowError::not_found("gate config", job_id))?;

    Ok(GateConfig {
        require_pickup_photos: row.try_get("require_pickup_photos")?,
        require_delivery_photos: row.try_get("require_delivery_photos")?,
        require_vin: row.try_get("require_vin")?,
        require_pod: row.try_get("require_pod")?,
        min_pickup_photos: row.try_get::<i64, _>("min_pickup_photos")?.max(0) as u32,
        min_delivery_photos: row.try_get::<i64, _>("min_delivery_photos")?.max(0) as u32,
        approval_mode: row.try_get::<String, _>("approval_mode")?.parse()?,
    })
}

async fn insert_job(conn: &mut SqliteConnection, job: &Job) -> Result<(), EscrowError> {
    sqlx::query(
        r#"
        INSERT INTO jobs (id, vin, pickup_address, dropoff_address, price_cents, delivery_deadline,
                          carrier_name, carrier_email, carrier_phone, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&job.id)
    .bind(&job.vin)
    .bind(&job.pickup_address)
    .bind(&job.dropoff_address)
    .bind(job.price_cents)
    .bind(job.delivery_deadline)
    .bind(&job.carrier_name)
    .bind(&job.carrier_email)
    .bind(&job.carrier_phone)
    .bind(job.status.as_str())
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_gate(
    conn: &mut SqliteConnection,
    job_id: &str,
    gate: &GateConfig,
) -> Result<(), EscrowError> {
    sqlx::query(
        r#"
        INSERT INTO gate_configs (job_id, require_pickup_photos, require_delivery_photos, require_vin,
                                  require_pod, min_pickup_photos, min_delivery_photos, approval_mode)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(job_id)
    .bind(gate.require_pickup_photos)
    .bind(gate.require_delivery_photos)
    .bind(gate.require_vin)
    .bind(gate.require_pod)
    .bind(gate.min_pickup_photos as i64)
    .bind(gate.min_delivery_photos as i64)
    .bind(gate.approval_mode.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Compare-and-swap on the status column.
/// Applies only while the stored status is still one of `allowed_from`.
pub(crate) async fn compare_and_set_status(
    conn: &mut SqliteConnection,
    job_id: &str,
    allowed_from: &[JobStatus],
    target: JobStatus,
    now: DateTime<Utc>,
) -> Result<bool, EscrowError> {
    if allowed_from.is_empty() {
        return Ok(false);
    }

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE jobs SET status = ");
    query
        .push_bind(target.as_str())
        .push(", updated_at = ")
        .push_bind(now)
        .push(" WHERE id = ")
        .push_bind(job_id)
        .push(" AND status IN (");
    let mut statuses = query.separated(", ");
    for status in allowed_from {
        statuses.push_bind(status.as_str());
    }
    statuses.push_unseparated(")");

    let result = query.build().execute(&mut *conn).await?;
    Ok(result.rows_affected() == 1)
}

pub(crate) async fn set_carrier(
    conn: &mut SqliteConnection,
    job_id: &str,
    carrier: &CarrierAssignment,
    now: DateTime<Utc>,
) -> Result<(), EscrowError> {
    sqlx::query(
        "UPDATE jobs SET carrier_name = ?1, carrier_email = ?2, carrier_phone = ?3, updated_at = ?4 WHERE id = ?5",
    )
    .bind(carrier.name.trim())
    .bind(&carrier.email)
    .bind(&carrier.phone)
    .bind(now)
    .bind(job_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
