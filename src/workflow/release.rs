// Two-phase release
// Claim the hold (releasable -> releasing) and commit, call the provider with no
// unit open, then settle or revert in a second unit. Holds left in releasing by a
// crash are re-driven by reconciliation with the same idempotency key.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{error, info, warn, Instrument};

use super::authorization::{authorize, Operation};
use super::executor::{invalid_transition, EscrowEngine};
use super::types::{HoldReceipt, ReconcileEntry, TransitionOutcome};
use crate::domain::{
    Actor, DecisionAction, DecisionSnapshot, HoldStatus, JobStatus, NewDecision, PaymentHold,
    ReleaseSnapshot,
};
use crate::error::EscrowError;
use crate::gate::{GateEvaluation, Phase};
use crate::jobs;
use crate::ledger::decision_log;
use crate::observability::OperationTimer;
use crate::payments::hold::{self, HoldEvent};
use crate::payments::{release_idempotency_key, ReleaseReceipt, ReleaseRequest};
use crate::telemetry::{create_operation_span, generate_correlation_id};

const DEFAULT_RECONCILE_LIMIT: i64 = 50;

/// What the claim unit decided
enum Claim {
    /// Job already released; nothing to send
    Done(TransitionOutcome),
    /// Hold is in releasing with this key; the provider must be called
    Send(PaymentHold),
}

impl EscrowEngine {
    /// Release escrowed funds for a releasable job.
    ///
    /// Replays on a released job return `already` with the stored receipt. A hold
    /// found in releasing is re-driven with the key it was claimed under.
    pub async fn release(
        &self,
        job_id: &str,
        actor: &Actor,
        idempotency_key: Option<String>,
    ) -> Result<TransitionOutcome, EscrowError> {
        authorize(actor, Operation::Release, Some(job_id))?;
        if let Some(key) = &idempotency_key {
            if key.trim().is_empty() {
                return Err(EscrowError::Validation(
                    "idempotency key must not be blank".to_string(),
                ));
            }
        }

        let correlation_id = generate_correlation_id();
        let actor_id = actor.log_string();
        let span = create_operation_span(
            DecisionAction::Release.as_str(),
            Some(job_id),
            &actor_id,
            &correlation_id,
        );

        async {
            let claim = self
                .retry_on_write_conflict(|| {
                    self.claim_release(job_id, idempotency_key.as_deref())
                })
                .await?;

            match claim {
                Claim::Done(outcome) => {
                    self.metrics.record_replay();
                    Ok(outcome)
                }
                Claim::Send(payment) => {
                    let outcome = self.settle_with_provider(&payment, &actor_id).await?;
                    if outcome.already {
                        self.metrics.record_replay();
                    } else {
                        self.metrics.record_applied();
                    }
                    Ok(outcome)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Holds stuck in releasing, oldest first
    pub async fn pending_releases(&self, limit: Option<i64>) -> Result<Vec<PaymentHold>, EscrowError> {
        let mut conn = self.store.pool().acquire().await?;
        hold::list_releasing(&mut conn, limit.unwrap_or(DEFAULT_RECONCILE_LIMIT)).await
    }

    /// Re-drive holds left in releasing. One failing hold does not stop the rest.
    pub async fn reconcile_releases(
        &self,
        actor: &Actor,
        limit: Option<i64>,
    ) -> Result<Vec<ReconcileEntry>, EscrowError> {
        authorize(actor, Operation::Reconcile, None)?;

        let actor_id = actor.log_string();
        let pending = self.pending_releases(limit).await?;
        let mut entries = Vec::with_capacity(pending.len());

        for payment in pending {
            let entry = match self.settle_with_provider(&payment, &actor_id).await {
                Ok(outcome) => ReconcileEntry {
                    job_id: payment.job_id.clone(),
                    hold_id: payment.id.clone(),
                    settled: true,
                    status: Some(outcome.status),
                    error: None,
                },
                Err(err) => {
                    if err.is_fault() {
                        error!(job_id = %payment.job_id, hold_id = %payment.id, error = %err, "Reconciliation fault");
                    }
                    ReconcileEntry {
                        job_id: payment.job_id.clone(),
                        hold_id: payment.id.clone(),
                        settled: false,
                        status: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            entries.push(entry);
        }

        info!(
            visited = entries.len(),
            settled = entries.iter().filter(|e| e.settled).count(),
            "Release reconciliation finished"
        );
        Ok(entries)
    }

    async fn claim_release(
        &self,
        job_id: &str,
        supplied_key: Option<&str>,
    ) -> Result<Claim, EscrowError> {
        let now = self.clock.now();
        let mut unit = self.store.begin().await?;

        let job = jobs::require_job(&mut unit, job_id).await?;
        let mut payment = hold::require_for_job(&mut unit, job_id).await?;

        if job.status == JobStatus::Released {
            let mut outcome = TransitionOutcome::already(job_id, job.status);
            outcome.hold_status = Some(payment.status);
            outcome.receipt = Some(receipt_for(&payment));
            return Ok(Claim::Done(outcome));
        }

        let allowed = self.settings.transitions.allowed_from(JobStatus::Released);
        if !allowed.contains(&job.status) {
            return Err(invalid_transition(job.status, JobStatus::Released, allowed));
        }

        match payment.status {
            HoldStatus::Releasable => {}
            HoldStatus::Releasing => {
                warn!(job_id, hold_id = %payment.id, "Release already claimed; re-driving with stored key");
                return Ok(Claim::Send(payment));
            }
            status => {
                return Err(EscrowError::Conflict(format!(
                    "payment hold {} is {}, expected releasable",
                    payment.id, status
                )))
            }
        }

        let key = supplied_key
            .map(|k| k.trim().to_string())
            .unwrap_or_else(|| release_idempotency_key(job_id, &payment.id));

        if !hold::claim_release(&mut unit, &payment.id, &key, self.provider.name(), now).await? {
            return Err(EscrowError::Conflict(format!(
                "payment hold {} changed while claiming release",
                payment.id
            )));
        }
        unit.commit().await?;

        payment.status = HoldStatus::Releasing;
        payment.idempotency_key = Some(key);
        payment.provider = self.provider.name().to_string();
        payment.updated_at = now;

        info!(job_id, hold_id = %payment.id, "Release claimed");
        Ok(Claim::Send(payment))
    }

    /// Call the provider for a claimed hold, then settle or revert it
    pub(crate) async fn settle_with_provider(
        &self,
        payment: &PaymentHold,
        actor_id: &str,
    ) -> Result<TransitionOutcome, EscrowError> {
        let request = ReleaseRequest {
            job_id: payment.job_id.clone(),
            hold_id: payment.id.clone(),
            amount_cents: payment.amount_cents,
            rail: payment.rail,
            idempotency_key: payment
                .idempotency_key
                .clone()
                .unwrap_or_else(|| release_idempotency_key(&payment.job_id, &payment.id)),
        };

        let timer = OperationTimer::new("payment_release");
        let result = self.provider.release(&request).await;
        timer.finish();

        match result {
            Ok(receipt) => {
                self.retry_on_write_conflict(|| self.settle_success(payment, &receipt, actor_id))
                    .await
            }
            Err(provider_error) => {
                self.metrics.record_provider_failure();
                warn!(
                    job_id = %payment.job_id,
                    hold_id = %payment.id,
                    provider = self.provider.name(),
                    error = %provider_error,
                    "Payment release failed"
                );
                self.retry_on_write_conflict(|| self.settle_failure(payment))
                    .await?;
                Err(EscrowError::Provider {
                    provider: self.provider.name().to_string(),
                    message: provider_error.to_string(),
                })
            }
        }
    }

    async fn settle_success(
        &self,
        payment: &PaymentHold,
        receipt: &ReleaseReceipt,
        actor_id: &str,
    ) -> Result<TransitionOutcome, EscrowError> {
        let now = self.clock.now();
        let provider = self.provider.name();
        let job_id = payment.job_id.as_str();
        let mut unit = self.store.begin().await?;

        let settled = hold::settle(
            &mut unit,
            &payment.id,
            provider,
            &receipt.provider_ref,
            &receipt.idempotency_key,
            now,
        )
        .await?;

        if !settled {
            // A concurrent release or reconciliation got there first
            let current = hold::require_for_job(&mut unit, job_id).await?;
            let job = jobs::require_job(&mut unit, job_id).await?;
            if current.status == HoldStatus::Released {
                let mut outcome = TransitionOutcome::already(job_id, job.status);
                outcome.hold_status = Some(current.status);
                outcome.receipt = Some(receipt_for(&current));
                return Ok(outcome);
            }
            return Err(EscrowError::Conflict(format!(
                "payment hold {} is {}, expected releasing",
                current.id, current.status
            )));
        }

        let allowed = self.settings.transitions.allowed_from(JobStatus::Released);
        let moved = jobs::compare_and_set_status(&mut unit, job_id, allowed, JobStatus::Released, now)
            .await?;
        let job = jobs::require_job(&mut unit, job_id).await?;

        let warning = (!moved).then(|| {
            format!(
                "Payment released while job was {}; manual recovery may be required",
                job.status
            )
        });
        if let Some(warning) = &warning {
            warn!(job_id, hold_id = %payment.id, status = %job.status, "{}", warning);
        }

        let approval = self.approval_for_release(&mut unit, job_id, now).await?;
        decision_log::append(
            &mut unit,
            NewDecision::new(job_id, DecisionAction::Release, actor_id.to_string())
                .reason(format!("provider={}", provider))
                .snapshot(DecisionSnapshot::Release(ReleaseSnapshot {
                    approval,
                    hold_id: payment.id.clone(),
                    amount_cents: payment.amount_cents,
                    rail: payment.rail,
                    provider: provider.to_string(),
                    provider_ref: receipt.provider_ref.clone(),
                    idempotency_key: receipt.idempotency_key.clone(),
                    warning: warning.clone(),
                })),
            now,
        )
        .await?;

        unit.commit().await?;
        info!(job_id, hold_id = %payment.id, provider_ref = %receipt.provider_ref, "Payment released");

        let previous = if moved { JobStatus::Releasable } else { job.status };
        let mut outcome = TransitionOutcome::applied(job_id, previous, job.status);
        outcome.hold_status = Some(HoldStatus::Released);
        outcome.warning = warning;
        outcome.receipt = Some(HoldReceipt {
            hold_id: payment.id.clone(),
            provider: provider.to_string(),
            provider_ref: Some(receipt.provider_ref.clone()),
            idempotency_key: Some(receipt.idempotency_key.clone()),
        });
        Ok(outcome)
    }

    /// Put the hold back where the job's status says it belongs. No log entry.
    async fn settle_failure(&self, payment: &PaymentHold) -> Result<(), EscrowError> {
        let now = self.clock.now();
        let mut unit = self.store.begin().await?;

        let job = jobs::require_job(&mut unit, &payment.job_id).await?;
        let event = if job.status == JobStatus::Releasable {
            HoldEvent::RevertToReleasable
        } else {
            HoldEvent::RevertToHeld
        };

        if hold::apply(&mut unit, &payment.id, event, now).await? {
            unit.commit().await?;
            info!(job_id = %payment.job_id, hold_id = %payment.id, to = %event.to_status(), "Release claim reverted");
        }
        Ok(())
    }

    /// Gate result the release rests on: the approval's, else a fresh full evaluation
    async fn approval_for_release(
        &self,
        conn: &mut SqliteConnection,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<GateEvaluation>, EscrowError> {
        if let Some(evaluation) =
            decision_log::last_gate_snapshot(conn, job_id, DecisionAction::Approve).await?
        {
            return Ok(Some(evaluation));
        }
        let job = jobs::require_job(conn, job_id).await?;
        Ok(Some(self.evaluate_in(conn, &job, Phase::Full, now).await?))
    }
}

fn receipt_for(payment: &PaymentHold) -> HoldReceipt {
    HoldReceipt {
        hold_id: payment.id.clone(),
        provider: payment.provider.clone(),
        provider_ref: payment.provider_ref.clone(),
        idempotency_key: payment.idempotency_key.clone(),
    }
}
