// Guarded transition executor
// Each transition is one unit of work: re-read, gate, compare-and-swap, log,
// side effects. Either all of it commits or none of it does.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{info, warn, Instrument};

use super::authorization::{authorize, Operation};
use super::state_machine::{resolve_after_conflict, ConflictResolution};
use super::types::{EngineSettings, JobCommand, TransitionOutcome};
use crate::clock::Clock;
use crate::database::{is_write_conflict, Store};
use crate::domain::{
    Actor, ApprovalMode, CarrierAssignment, DecisionAction, DecisionSnapshot, DisputeSnapshot,
    HoldStatus, Job, JobStatus, NewDecision, OutboxPayload, Recipient,
};
use crate::error::EscrowError;
use crate::gate::{GateEvaluation, Phase};
use crate::invites::CarrierInvites;
use crate::jobs::{self, Jobs};
use crate::ledger::{decision_log, evidence, DecisionLog, EvidenceLedger};
use crate::observability::EngineMetrics;
use crate::outbox::{self, Outbox};
use crate::payments::hold::{self, HoldEvent};
use crate::payments::PaymentProvider;
use crate::telemetry::{create_operation_span, generate_correlation_id};

const AUTO_APPROVAL_REASON: &str = "auto_approval";
const RELEASED_DISPUTE_WARNING: &str = "Payment already released; manual recovery may be required";
const IN_FLIGHT_DISPUTE_WARNING: &str =
    "Payment release in flight; reconciliation will settle the hold and flag it for recovery";

/// Result of the guarded status write
pub(crate) enum Step {
    Already {
        job: Job,
    },
    Applied {
        job: Job,
        previous: JobStatus,
        evaluation: Option<GateEvaluation>,
    },
}

/// Workflow and escrow engine: the entry point for every state change on a job
pub struct EscrowEngine {
    pub(crate) store: Store,
    pub(crate) settings: EngineSettings,
    pub(crate) provider: Arc<dyn PaymentProvider>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: Arc<EngineMetrics>,
    jobs: Jobs,
    invites: CarrierInvites,
    outbox: Outbox,
    evidence: EvidenceLedger,
    decisions: DecisionLog,
}

impl EscrowEngine {
    pub fn new(
        store: Store,
        settings: EngineSettings,
        provider: Arc<dyn PaymentProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Arc::new(EngineMetrics::new());

        Self {
            jobs: Jobs::new(
                store.clone(),
                clock.clone(),
                settings.gate_defaults.clone(),
                provider.name(),
            ),
            invites: CarrierInvites::new(store.clone(), clock.clone(), settings.invites.clone()),
            outbox: Outbox::new(
                store.clone(),
                clock.clone(),
                settings.outbox.clone(),
                metrics.clone(),
            ),
            evidence: EvidenceLedger::new(store.clone(), clock.clone()),
            decisions: DecisionLog::new(store.clone()),
            store,
            settings,
            provider,
            clock,
            metrics,
        }
    }

    pub fn jobs(&self) -> &Jobs {
        &self.jobs
    }

    pub fn invites(&self) -> &CarrierInvites {
        &self.invites
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn evidence(&self) -> &EvidenceLedger {
        &self.evidence
    }

    pub fn decisions(&self) -> &DecisionLog {
        &self.decisions
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn assign(
        &self,
        job_id: &str,
        actor: &Actor,
        carrier: CarrierAssignment,
    ) -> Result<TransitionOutcome, EscrowError> {
        self.execute(job_id, actor, JobCommand::Assign(carrier)).await
    }

    pub async fn accept(
        &self,
        job_id: &str,
        actor: &Actor,
        note: Option<String>,
    ) -> Result<TransitionOutcome, EscrowError> {
        self.execute(job_id, actor, JobCommand::Accept { note }).await
    }

    pub async fn confirm_pickup(
        &self,
        job_id: &str,
        actor: &Actor,
        note: Option<String>,
    ) -> Result<TransitionOutcome, EscrowError> {
        self.execute(job_id, actor, JobCommand::ConfirmPickup { note })
            .await
    }

    pub async fn submit_delivery(
        &self,
        job_id: &str,
        actor: &Actor,
        note: Option<String>,
    ) -> Result<TransitionOutcome, EscrowError> {
        self.execute(job_id, actor, JobCommand::SubmitDelivery { note })
            .await
    }

    pub async fn approve(
        &self,
        job_id: &str,
        actor: &Actor,
        note: Option<String>,
    ) -> Result<TransitionOutcome, EscrowError> {
        self.execute(job_id, actor, JobCommand::Approve { note }).await
    }

    pub async fn dispute(
        &self,
        job_id: &str,
        actor: &Actor,
        reason: impl Into<String>,
    ) -> Result<TransitionOutcome, EscrowError> {
        self.execute(
            job_id,
            actor,
            JobCommand::Dispute {
                reason: reason.into(),
            },
        )
        .await
    }

    pub async fn cancel(
        &self,
        job_id: &str,
        actor: &Actor,
        reason: impl Into<String>,
    ) -> Result<TransitionOutcome, EscrowError> {
        self.execute(
            job_id,
            actor,
            JobCommand::Cancel {
                reason: reason.into(),
            },
        )
        .await
    }

    /// Run a transition command as one unit of work
    pub async fn execute(
        &self,
        job_id: &str,
        actor: &Actor,
        command: JobCommand,
    ) -> Result<TransitionOutcome, EscrowError> {
        authorize(actor, command.operation(), Some(job_id))?;
        command.validate()?;

        let correlation_id = generate_correlation_id();
        let actor_id = actor.log_string();
        let span = create_operation_span(
            command.action().as_str(),
            Some(job_id),
            &actor_id,
            &correlation_id,
        );

        async {
            let result = self
                .retry_on_write_conflict(|| self.execute_unit(job_id, &actor_id, &command))
                .await;
            self.record_result(&result);
            result
        }
        .instrument(span)
        .await
    }

    /// Gate the current evidence and log the result without changing status
    pub async fn evaluate(&self, job_id: &str, actor: &Actor) -> Result<GateEvaluation, EscrowError> {
        authorize(actor, Operation::Evaluate, Some(job_id))?;

        let now = self.clock.now();
        let mut unit = self.store.begin().await?;
        let job = jobs::require_job(&mut unit, job_id).await?;
        let evaluation = self.evaluate_in(&mut unit, &job, Phase::Full, now).await?;

        decision_log::append(
            &mut unit,
            NewDecision::new(job_id, DecisionAction::Evaluate, actor.log_string())
                .reason(evaluation.code.as_str())
                .snapshot(DecisionSnapshot::Gate(evaluation.clone())),
            now,
        )
        .await?;
        unit.commit().await?;

        info!(job_id, code = %evaluation.code, pass = evaluation.pass, "Gate evaluated");
        Ok(evaluation)
    }

    /// SQLITE_BUSY means another writer held the lock; rerun the unit once
    pub(crate) async fn retry_on_write_conflict<T, F, Fut>(&self, mut unit: F) -> Result<T, EscrowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EscrowError>>,
    {
        match unit().await {
            Err(err) if is_write_conflict(&err) => {
                self.metrics.record_conflict_retry();
                warn!(error = %err, "Write conflict, retrying unit once");
                unit().await
            }
            other => other,
        }
    }

    fn record_result(&self, result: &Result<TransitionOutcome, EscrowError>) {
        match result {
            Ok(outcome) if outcome.already => self.metrics.record_replay(),
            Ok(_) => self.metrics.record_applied(),
            Err(EscrowError::Blocked { .. }) => self.metrics.record_blocked(),
            Err(EscrowError::InvalidTransition { .. }) => self.metrics.record_invalid(),
            Err(_) => {}
        }
    }

    async fn execute_unit(
        &self,
        job_id: &str,
        actor_id: &str,
        command: &JobCommand,
    ) -> Result<TransitionOutcome, EscrowError> {
        let now = self.clock.now();
        let target = command.target();
        let mut unit = self.store.begin().await?;

        let step = self
            .guarded_transition(&mut unit, job_id, target, command.phase(), now)
            .await?;

        let outcome = match step {
            Step::Already { job } => {
                let healed = self
                    .heal_replay(&mut unit, job_id, command, actor_id, now)
                    .await?;
                info!(job_id, status = %job.status, healed, "Transition already applied");
                TransitionOutcome::already(job_id, job.status)
            }
            Step::Applied {
                job,
                previous,
                evaluation,
            } => {
                let outcome = self
                    .apply_effects(&mut unit, &job, previous, command, actor_id, evaluation, now)
                    .await?;
                info!(job_id, from = %previous, to = %outcome.status, "Transition applied");
                outcome
            }
        };

        unit.commit().await?;
        Ok(outcome)
    }

    /// Steps 2-5 of a transition: replay check, table check, gate, compare-and-swap
    pub(crate) async fn guarded_transition(
        &self,
        conn: &mut SqliteConnection,
        job_id: &str,
        target: JobStatus,
        phase: Option<Phase>,
        now: DateTime<Utc>,
    ) -> Result<Step, EscrowError> {
        let mut job = jobs::require_job(conn, job_id).await?;
        if job.status == target {
            return Ok(Step::Already { job });
        }

        let allowed = self.settings.transitions.allowed_from(target);
        if !allowed.contains(&job.status) {
            return Err(invalid_transition(job.status, target, allowed));
        }

        let evaluation = match phase {
            Some(phase) => {
                let evaluation = self.evaluate_in(conn, &job, phase, now).await?;
                if !evaluation.pass {
                    info!(job_id, code = %evaluation.code, "Transition blocked by gate");
                    return Err(EscrowError::Blocked {
                        code: evaluation.code,
                        missing: evaluation.missing,
                        counts: evaluation.counts,
                    });
                }
                Some(evaluation)
            }
            None => None,
        };

        let mut retried = false;
        loop {
            let previous = job.status;
            if jobs::compare_and_set_status(conn, job_id, allowed, target, now).await? {
                job.status = target;
                job.updated_at = now;
                return Ok(Step::Applied {
                    job,
                    previous,
                    evaluation,
                });
            }

            job = jobs::require_job(conn, job_id).await?;
            match resolve_after_conflict(job.status, target, allowed, retried) {
                ConflictResolution::Already => return Ok(Step::Already { job }),
                ConflictResolution::Retry => {
                    self.metrics.record_conflict_retry();
                    warn!(job_id, observed = %job.status, "Status changed underneath; retrying once");
                    retried = true;
                }
                ConflictResolution::Invalid => {
                    return Err(invalid_transition(job.status, target, allowed))
                }
            }
        }
    }

    pub(crate) async fn evaluate_in(
        &self,
        conn: &mut SqliteConnection,
        job: &Job,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> Result<GateEvaluation, EscrowError> {
        let gate = jobs::fetch_gate(conn, &job.id).await?;
        let active = evidence::active_for_job(conn, &job.id).await?;
        Ok(phase.evaluate(job, &gate, &active, now))
    }

    /// Log a replay only when the caller's reason differs from the last entry of that action
    async fn heal_replay(
        &self,
        conn: &mut SqliteConnection,
        job_id: &str,
        command: &JobCommand,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, EscrowError> {
        let Some(reason) = command.supplied_reason() else {
            return Ok(false);
        };

        let last = decision_log::last_for_action(conn, job_id, command.action()).await?;
        if last.as_ref().and_then(|entry| entry.reason.as_deref()) == Some(reason) {
            return Ok(false);
        }

        decision_log::append(
            conn,
            NewDecision::new(job_id, command.action(), actor_id.to_string()).reason(reason),
            now,
        )
        .await?;
        Ok(true)
    }

    /// Steps 6-7: the log entry and per-target side effects
    #[allow(clippy::too_many_arguments)]
    async fn apply_effects(
        &self,
        conn: &mut SqliteConnection,
        job: &Job,
        previous: JobStatus,
        command: &JobCommand,
        actor_id: &str,
        evaluation: Option<GateEvaluation>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, EscrowError> {
        let mut outcome = TransitionOutcome::applied(&job.id, previous, job.status);
        outcome.evaluation = evaluation.clone();

        let mut decision = NewDecision::new(&job.id, command.action(), actor_id.to_string());
        if let Some(reason) = command.log_reason() {
            decision = decision.reason(reason);
        }
        if let Some(evaluation) = evaluation {
            decision = decision.snapshot(DecisionSnapshot::Gate(evaluation));
        }

        match command {
            JobCommand::Assign(carrier) => {
                jobs::set_carrier(conn, &job.id, carrier, now).await?;
                decision_log::append(conn, decision, now).await?;

                let issued = self.invites.issue_in(conn, &job.id, actor_id, now).await?;
                let outbox_id = self
                    .invites
                    .enqueue_link_in(conn, &issued, carrier, now)
                    .await?;
                outcome.invite = Some(issued);
                outcome.outbox_id = Some(outbox_id);
            }
            JobCommand::Approve { .. } => {
                let payment = self.advance_hold(conn, &job.id, HoldEvent::Approve, now).await?;
                decision_log::append(conn, decision, now).await?;
                outcome.hold_status = Some(payment);
            }
            JobCommand::SubmitDelivery { .. } => {
                decision_log::append(conn, decision, now).await?;

                let payload = OutboxPayload::DeliverySubmitted {
                    job_id: job.id.clone(),
                    vin: job.vin.clone(),
                    carrier_name: job.carrier_name.clone(),
                };
                outcome.outbox_id =
                    Some(outbox::enqueue_in(conn, &Recipient::default(), &payload, now).await?);

                self.auto_approve(conn, job, actor_id, now, &mut outcome).await?;
            }
            JobCommand::Dispute { .. } => {
                let payment = hold::require_for_job(conn, &job.id).await?;
                let hold_before = payment.status;
                let (hold_after, warning) = match payment.status {
                    HoldStatus::Releasable => {
                        if !hold::apply(conn, &payment.id, HoldEvent::Rehold, now).await? {
                            return Err(EscrowError::Conflict(format!(
                                "payment hold {} changed while disputing",
                                payment.id
                            )));
                        }
                        (HoldStatus::Held, None)
                    }
                    HoldStatus::Released => {
                        (HoldStatus::Released, Some(RELEASED_DISPUTE_WARNING.to_string()))
                    }
                    HoldStatus::Releasing => {
                        (HoldStatus::Releasing, Some(IN_FLIGHT_DISPUTE_WARNING.to_string()))
                    }
                    HoldStatus::Held => (HoldStatus::Held, None),
                };

                if let Some(warning) = &warning {
                    warn!(job_id = %job.id, hold_status = %hold_before, "{}", warning);
                }

                decision = decision.snapshot(DecisionSnapshot::Dispute(DisputeSnapshot {
                    previous_status: previous,
                    hold_before,
                    hold_after,
                    warning: warning.clone(),
                }));
                decision_log::append(conn, decision, now).await?;

                outcome.hold_status = Some(hold_after);
                outcome.warning = warning;
            }
            JobCommand::Cancel { .. } => {
                // Funds may already be moving; the unit rolls back the status change
                let payment = hold::require_for_job(conn, &job.id).await?;
                if payment.status == HoldStatus::Releasing {
                    warn!(job_id = %job.id, hold_id = %payment.id, "Cancel refused during payment release");
                    return Err(EscrowError::Conflict(format!(
                        "payment hold {} is being released; reconcile before cancelling",
                        payment.id
                    )));
                }
                decision_log::append(conn, decision, now).await?;
                outcome.hold_status = Some(payment.status);
            }
            JobCommand::Accept { .. } | JobCommand::ConfirmPickup { .. } => {
                decision_log::append(conn, decision, now).await?;
            }
        }

        Ok(outcome)
    }

    /// With approval mode auto, a delivery that passes the full gate becomes releasable
    async fn auto_approve(
        &self,
        conn: &mut SqliteConnection,
        job: &Job,
        actor_id: &str,
        now: DateTime<Utc>,
        outcome: &mut TransitionOutcome,
    ) -> Result<(), EscrowError> {
        let gate = jobs::fetch_gate(conn, &job.id).await?;
        if gate.approval_mode != ApprovalMode::Auto {
            return Ok(());
        }

        let evaluation = self.evaluate_in(conn, job, Phase::Full, now).await?;
        if !evaluation.pass {
            info!(job_id = %job.id, code = %evaluation.code, "Auto approval deferred");
            return Ok(());
        }

        let allowed = self.settings.transitions.allowed_from(JobStatus::Releasable);
        if !jobs::compare_and_set_status(conn, &job.id, allowed, JobStatus::Releasable, now).await? {
            return Ok(());
        }

        let payment = self.advance_hold(conn, &job.id, HoldEvent::Approve, now).await?;
        decision_log::append(
            conn,
            NewDecision::new(&job.id, DecisionAction::Approve, actor_id.to_string())
                .reason(AUTO_APPROVAL_REASON)
                .snapshot(DecisionSnapshot::Gate(evaluation.clone())),
            now,
        )
        .await?;

        info!(job_id = %job.id, "Delivery auto-approved");
        outcome.status = JobStatus::Releasable;
        outcome.auto_approved = true;
        outcome.hold_status = Some(payment);
        outcome.evaluation = Some(evaluation);
        Ok(())
    }

    /// Compare-and-swap the hold; a mismatch aborts the whole unit
    async fn advance_hold(
        &self,
        conn: &mut SqliteConnection,
        job_id: &str,
        event: HoldEvent,
        now: DateTime<Utc>,
    ) -> Result<HoldStatus, EscrowError> {
        let payment = hold::require_for_job(conn, job_id).await?;
        if !hold::apply(conn, &payment.id, event, now).await? {
            return Err(EscrowError::Conflict(format!(
                "payment hold {} is {}, expected {}",
                payment.id,
                payment.status,
                event.from_status()
            )));
        }
        Ok(event.to_status())
    }
}

pub(crate) fn invalid_transition(
    from: JobStatus,
    to: JobStatus,
    allowed_from: &[JobStatus],
) -> EscrowError {
    EscrowError::InvalidTransition {
        from,
        to,
        allowed_from: allowed_from.to_vec(),
    }
}
