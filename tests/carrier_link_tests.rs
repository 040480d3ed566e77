//! Integration tests for carrier capability links

mod common;

use chrono::Duration;
use common::*;

use haulgate::{Actor, DecisionAction, EscrowError, EvidenceType, JobStatus, TokenRejection};

async fn assigned_job(h: &Harness) -> (String, String) {
    let job_id = h.draft_job().await;
    let outcome = h.engine.assign(&job_id, &shipper(), acme()).await.unwrap();
    (job_id, outcome.invite.unwrap().raw_token)
}

#[tokio::test]
async fn test_issued_token_verifies_for_its_job() {
    let h = Harness::new().await;
    let (job_id, token) = assigned_job(&h).await;

    let verified = h.engine.invites().verify(&token).await.unwrap();
    assert_eq!(verified.job_id, job_id);
    assert_eq!(verified.use_count, 1);

    let again = h.engine.invites().verify(&token).await.unwrap();
    assert_eq!(again.use_count, 2);

    let invite = h.engine.invites().find_for_job(&job_id).await.unwrap().unwrap();
    assert_eq!(invite.last_used_at, Some(start_time()));
    assert_ne!(invite.token_hash, token);
}

#[tokio::test]
async fn test_altered_token_is_invalid() {
    let h = Harness::new().await;
    let (_, token) = assigned_job(&h).await;

    let mut altered: Vec<char> = token.chars().collect();
    altered[10] = if altered[10] == 'a' { 'b' } else { 'a' };
    let altered: String = altered.into_iter().collect();

    let err = h.engine.invites().verify(&altered).await.unwrap_err();
    assert!(matches!(err, EscrowError::Unauthorized(TokenRejection::Invalid)));
}

#[tokio::test]
async fn test_revoked_token_is_refused() {
    let h = Harness::new().await;
    let (job_id, token) = assigned_job(&h).await;

    assert!(h.engine.invites().revoke(&job_id, &admin()).await.unwrap());
    assert!(!h.engine.invites().revoke(&job_id, &admin()).await.unwrap());

    let err = h.engine.invites().verify(&token).await.unwrap_err();
    assert!(matches!(err, EscrowError::Unauthorized(TokenRejection::Revoked)));
    assert_eq!(
        h.engine
            .decisions()
            .count(&job_id, DecisionAction::InviteRevoked)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_token_expires_after_ttl() {
    let h = Harness::new().await;
    let (_, token) = assigned_job(&h).await;

    h.advance(Duration::hours(71));
    assert!(h.engine.invites().verify(&token).await.is_ok());

    h.advance(Duration::hours(1));
    let err = h.engine.invites().verify(&token).await.unwrap_err();
    assert!(matches!(err, EscrowError::Unauthorized(TokenRejection::Expired)));
}

#[tokio::test]
async fn test_reissue_replaces_previous_token() {
    let h = Harness::new().await;
    let (job_id, old_token) = assigned_job(&h).await;
    h.engine.invites().revoke(&job_id, &admin()).await.unwrap();

    let issued = h.engine.invites().reissue_link(&job_id, &admin()).await.unwrap();
    assert!(h.engine.invites().verify(&issued.raw_token).await.is_ok());
    assert!(matches!(
        h.engine.invites().verify(&old_token).await,
        Err(EscrowError::Unauthorized(TokenRejection::Invalid))
    ));

    // Still one queued link message for the job, now carrying the new link
    let links: Vec<_> = h
        .engine
        .outbox()
        .queued()
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.job_id == job_id && m.kind == haulgate::domain::OutboxKind::SendCarrierLink)
        .collect();
    assert_eq!(links.len(), 1);
    match &links[0].payload {
        haulgate::domain::OutboxPayload::SendCarrierLink { link, .. } => {
            assert_eq!(link, &issued.link)
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn test_reissue_without_carrier_conflicts() {
    let h = Harness::new().await;
    let job_id = h.draft_job().await;

    let err = h.engine.invites().reissue_link(&job_id, &admin()).await.unwrap_err();
    assert!(matches!(err, EscrowError::Conflict(_)));
}

#[tokio::test]
async fn test_link_is_scoped_to_its_job() {
    let h = Harness::new().await;
    let (job_a, token_a) = assigned_job(&h).await;
    let (job_b, _) = assigned_job(&h).await;

    let err = h.engine.invites().authorize_for_job(&token_a, &job_b).await.unwrap_err();
    assert!(matches!(err, EscrowError::Forbidden(ref msg) if msg.contains("job-scope")));

    // A link actor built for job A cannot act on job B either
    let link = h.engine.invites().authorize_for_job(&token_a, &job_a).await.unwrap();
    let err = h.engine.accept(&job_b, &link, None).await.unwrap_err();
    assert!(matches!(err, EscrowError::Forbidden(_)));
}

#[tokio::test]
async fn test_carrier_link_drives_its_job() {
    let h = Harness::new().await;
    let (job_id, token) = assigned_job(&h).await;
    let link = h.engine.invites().authorize_for_job(&token, &job_id).await.unwrap();
    let invite_id = match &link {
        Actor::CarrierLink { invite_id, .. } => invite_id.clone(),
        other => panic!("expected carrier link actor, got {:?}", other),
    };

    h.engine.accept(&job_id, &link, Some("on my way".to_string())).await.unwrap();
    h.engine
        .evidence()
        .submit(&job_id, &link, photos(&job_id, EvidenceType::PickupPhoto, 4))
        .await
        .unwrap();
    h.engine
        .evidence()
        .submit(
            &job_id,
            &link,
            vec![haulgate::EvidenceSubmission::text(EvidenceType::VinScan, VIN)],
        )
        .await
        .unwrap();
    let outcome = h.engine.confirm_pickup(&job_id, &link, None).await.unwrap();
    assert_eq!(outcome.status, JobStatus::PickupConfirmed);

    let entry = h
        .engine
        .decisions()
        .last(&job_id, DecisionAction::Accept)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.actor, format!("carrier_link:{}", invite_id));
    assert_eq!(entry.reason.as_deref(), Some("on my way"));
}
