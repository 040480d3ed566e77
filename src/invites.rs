// Capability Token Service
// Carrier links are opaque bearer tokens scoped to one job. Only the SHA-256
// of a token is stored; the raw value exists once, in the issued link.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::InviteConfig;
use crate::database::Store;
use crate::domain::{
    Actor, CarrierAssignment, DecisionAction, DecisionSnapshot, InviteSnapshot, NewDecision,
    OutboxPayload, Recipient,
};
use crate::error::{EscrowError, TokenRejection};
use crate::jobs;
use crate::ledger::decision_log;
use crate::outbox;
use crate::workflow::authorization::{authorize, Operation};

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct InviteSettings {
    pub base_url: String,
    pub ttl: Option<Duration>,
}

impl InviteSettings {
    pub fn from_config(config: &InviteConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ttl: config.ttl_hours.map(Duration::hours),
        }
    }

    pub fn link_for(&self, raw_token: &str) -> String {
        format!("{}/c/{}", self.base_url, raw_token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarrierInvite {
    pub id: String,
    pub job_id: String,
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub use_count: i64,
}

/// Returned once at issue time; the raw token is not recoverable afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedInvite {
    pub invite_id: String,
    pub job_id: String,
    pub raw_token: String,
    pub link: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedInvite {
    pub job_id: String,
    pub invite_id: String,
    pub use_count: i64,
}

impl VerifiedInvite {
    pub fn actor(&self) -> Actor {
        Actor::CarrierLink {
            job_id: self.job_id.clone(),
            invite_id: self.invite_id.clone(),
        }
    }
}

/// 256 random bits, hex encoded
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(raw_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Classify a stored invite at `now`
pub fn check_invite(invite: &CarrierInvite, now: DateTime<Utc>) -> Result<(), TokenRejection> {
    if invite.revoked_at.is_some() {
        return Err(TokenRejection::Revoked);
    }
    match invite.expires_at {
        Some(expires_at) if expires_at <= now => Err(TokenRejection::Expired),
        _ => Ok(()),
    }
}

pub struct CarrierInvites {
    store: Store,
    clock: Arc<dyn Clock>,
    settings: InviteSettings,
}

impl CarrierInvites {
    pub fn new(store: Store, clock: Arc<dyn Clock>, settings: InviteSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &InviteSettings {
        &self.settings
    }

    /// Issue a fresh token for a job, replacing any previous one
    pub async fn issue(&self, job_id: &str, actor: &Actor) -> Result<IssuedInvite, EscrowError> {
        authorize(actor, Operation::IssueLink, Some(job_id))?;

        let now = self.clock.now();
        let mut unit = self.store.begin().await?;
        jobs::require_job(&mut unit, job_id).await?;
        let issued = self.issue_in(&mut unit, job_id, &actor.log_string(), now).await?;
        unit.commit().await?;

        Ok(issued)
    }

    /// Issue a fresh token and queue it for delivery to the job's carrier
    pub async fn reissue_link(&self, job_id: &str, actor: &Actor) -> Result<IssuedInvite, EscrowError> {
        authorize(actor, Operation::IssueLink, Some(job_id))?;

        let now = self.clock.now();
        let mut unit = self.store.begin().await?;
        let job = jobs::require_job(&mut unit, job_id).await?;
        let carrier = match &job.carrier_name {
            Some(name) => CarrierAssignment {
                name: name.clone(),
                email: job.carrier_email.clone(),
                phone: job.carrier_phone.clone(),
            },
            None => {
                return Err(EscrowError::Conflict(format!(
                    "job {} has no assigned carrier",
                    job_id
                )))
            }
        };

        let issued = self.issue_in(&mut unit, job_id, &actor.log_string(), now).await?;
        self.enqueue_link_in(&mut unit, &issued, &carrier, now).await?;
        unit.commit().await?;

        Ok(issued)
    }

    pub(crate) async fn issue_in(
        &self,
        conn: &mut SqliteConnection,
        job_id: &str,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedInvite, EscrowError> {
        let raw_token = generate_token();
        let expires_at = self.settings.ttl.map(|ttl| now + ttl);

        let invite_id: String = sqlx::query_scalar(
            r#"
            INSERT INTO carrier_invites (id, job_id, token_hash, issued_at, expires_at, revoked_at,
                                         last_used_at, use_count)
            VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, 0)
            ON CONFLICT(job_id) DO UPDATE SET
                token_hash = excluded.token_hash,
                issued_at = excluded.issued_at,
                expires_at = excluded.expires_at,
                revoked_at = NULL,
                last_used_at = NULL,
                use_count = 0
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(job_id)
        .bind(hash_token(&raw_token))
        .bind(now)
        .bind(expires_at)
        .fetch_one(&mut *conn)
        .await?;

        decision_log::append(
            conn,
            NewDecision::new(job_id, DecisionAction::InviteIssued, actor_id.to_string()).snapshot(
                DecisionSnapshot::Invite(InviteSnapshot {
                    invite_id: invite_id.clone(),
                    expires_at,
                }),
            ),
            now,
        )
        .await?;

        info!(job_id, invite_id = %invite_id, "Carrier link issued");

        Ok(IssuedInvite {
            link: self.settings.link_for(&raw_token),
            invite_id,
            job_id: job_id.to_string(),
            raw_token,
            expires_at,
        })
    }

    /// Queue the carrier link message, replacing any queued one for the job
    pub(crate) async fn enqueue_link_in(
        &self,
        conn: &mut SqliteConnection,
        issued: &IssuedInvite,
        carrier: &CarrierAssignment,
        now: DateTime<Utc>,
    ) -> Result<String, EscrowError> {
        let recipient = Recipient {
            invite_id: Some(issued.invite_id.clone()),
            email: carrier.email.clone(),
            phone: carrier.phone.clone(),
        };
        let payload = OutboxPayload::SendCarrierLink {
            job_id: issued.job_id.clone(),
            carrier_name: carrier.name.trim().to_string(),
            link: issued.link.clone(),
            expires_at: issued.expires_at,
        };
        outbox::enqueue_in(conn, &recipient, &payload, now).await
    }

    /// Check a presented token. Success counts as a use.
    pub async fn verify(&self, raw_token: &str) -> Result<VerifiedInvite, EscrowError> {
        let now = self.clock.now();
        let token_hash = hash_token(raw_token.trim());
        let mut unit = self.store.begin().await?;

        let invite = match fetch_by_hash(&mut unit, &token_hash).await? {
            Some(invite) => invite,
            None => return Err(EscrowError::Unauthorized(TokenRejection::Invalid)),
        };

        if let Err(rejection) = check_invite(&invite, now) {
            warn!(job_id = %invite.job_id, invite_id = %invite.id, %rejection, "Carrier token refused");
            return Err(EscrowError::Unauthorized(rejection));
        }

        let use_count: i64 = sqlx::query_scalar(
            r#"
            UPDATE carrier_invites
            SET use_count = use_count + 1, last_used_at = ?1
            WHERE id = ?2 AND token_hash = ?3 AND revoked_at IS NULL
            RETURNING use_count
            "#,
        )
        .bind(now)
        .bind(&invite.id)
        .bind(&token_hash)
        .fetch_optional(&mut *unit)
        .await?
        .ok_or(EscrowError::Unauthorized(TokenRejection::Invalid))?;

        unit.commit().await?;

        Ok(VerifiedInvite {
            job_id: invite.job_id,
            invite_id: invite.id,
            use_count,
        })
    }

    /// Verify a token and check it is scoped to `job_id`
    pub async fn authorize_for_job(&self, raw_token: &str, job_id: &str) -> Result<Actor, EscrowError> {
        let verified = self.verify(raw_token).await?;
        if verified.job_id != job_id {
            warn!(
                token_job = %verified.job_id,
                requested_job = job_id,
                "Carrier token presented for another job"
            );
            return Err(EscrowError::Forbidden(
                "carrier invite job-scope mismatch".to_string(),
            ));
        }
        Ok(verified.actor())
    }

    /// Permanently disable the current token for a job
    pub async fn revoke(&self, job_id: &str, actor: &Actor) -> Result<bool, EscrowError> {
        authorize(actor, Operation::RevokeLink, Some(job_id))?;

        let now = self.clock.now();
        let mut unit = self.store.begin().await?;

        let invite_id: Option<String> = sqlx::query_scalar(
            "UPDATE carrier_invites SET revoked_at = ?1 WHERE job_id = ?2 AND revoked_at IS NULL RETURNING id",
        )
        .bind(now)
        .bind(job_id)
        .fetch_optional(&mut *unit)
        .await?;

        let Some(invite_id) = invite_id else {
            return Ok(false);
        };

        decision_log::append(
            &mut unit,
            NewDecision::new(job_id, DecisionAction::InviteRevoked, actor.log_string()).snapshot(
                DecisionSnapshot::Invite(InviteSnapshot {
                    invite_id: invite_id.clone(),
                    expires_at: None,
                }),
            ),
            now,
        )
        .await?;
        unit.commit().await?;

        info!(job_id, invite_id = %invite_id, "Carrier link revoked");
        Ok(true)
    }

    pub async fn find_for_job(&self, job_id: &str) -> Result<Option<CarrierInvite>, EscrowError> {
        let row = sqlx::query("SELECT * FROM carrier_invites WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(self.store.pool())
            .await?;

        row.as_ref().map(invite_from_row).transpose()
    }
}

fn invite_from_row(row: &SqliteRow) -> Result<CarrierInvite, EscrowError> {
    Ok(CarrierInvite {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        token_hash: row.try_get("token_hash")?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        last_used_at: row.try_get("last_used_at")?,
        use_count: row.try_get("use_count")?,
    })
}

async fn fetch_by_hash(
    conn: &mut SqliteConnection,
    token_hash: &str,
) -> Result<Option<CarrierInvite>, EscrowError> {
    let row = sqlx::query("SELECT * FROM carrier_invites WHERE token_hash = ?1")
        .bind(token_hash)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(invite_from_row).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn invite(now: DateTime<Utc>) -> CarrierInvite {
        CarrierInvite {
            id: "inv-1".to_string(),
            job_id: "job-1".to_string(),
            token_hash: hash_token("t"),
            issued_at: now,
            expires_at: None,
            revoked_at: None,
            last_used_at: None,
            use_count: 0,
        }
    }

    #[test]
    fn test_tokens_are_64_hex_chars_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_revocation_checked_before_expiry() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let mut inv = invite(now);
        inv.expires_at = Some(now - Duration::hours(1));
        inv.revoked_at = Some(now - Duration::hours(2));

        assert_eq!(check_invite(&inv, now), Err(TokenRejection::Revoked));

        inv.revoked_at = None;
        assert_eq!(check_invite(&inv, now), Err(TokenRejection::Expired));

        inv.expires_at = Some(now + Duration::hours(1));
        assert_eq!(check_invite(&inv, now), Ok(()));
    }

    #[test]
    fn test_link_uses_trimmed_base_url() {
        let settings = InviteSettings::from_config(&InviteConfig {
            base_url: "https://haul.example/".to_string(),
            ttl_hours: None,
        });
        assert_eq!(settings.link_for("abc"), "https://haul.example/c/abc");
        assert!(settings.ttl.is_none());
    }
}
