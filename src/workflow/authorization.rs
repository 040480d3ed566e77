// Who may invoke which operation

use crate::domain::{Actor, Role};
use crate::error::EscrowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Intake,
    Review,
    Assign,
    Accept,
    ConfirmPickup,
    SubmitDelivery,
    Approve,
    Release,
    Reconcile,
    Dispute,
    Cancel,
    Evaluate,
    SubmitEvidence,
    ReportIssue,
    RedactEvidence,
    DrainOutbox,
    IssueLink,
    RevokeLink,
}

const ADMIN: &[Role] = &[Role::Admin];
const ADMIN_SHIPPER: &[Role] = &[Role::Admin, Role::Shipper];
const ADMIN_CARRIER: &[Role] = &[Role::Admin, Role::Carrier];

impl Operation {
    pub fn allowed_roles(&self) -> &'static [Role] {
        match self {
            Operation::Intake
            | Operation::Review
            | Operation::Assign
            | Operation::Approve
            | Operation::Dispute
            | Operation::Cancel
            | Operation::Evaluate => ADMIN_SHIPPER,
            Operation::Accept
            | Operation::ConfirmPickup
            | Operation::SubmitDelivery
            | Operation::SubmitEvidence
            | Operation::ReportIssue => ADMIN_CARRIER,
            Operation::Release
            | Operation::Reconcile
            | Operation::RedactEvidence
            | Operation::DrainOutbox
            | Operation::IssueLink
            | Operation::RevokeLink => ADMIN,
        }
    }

    /// Operations a carrier link may perform on its own job
    pub fn carrier_link_allowed(&self) -> bool {
        self.allowed_roles().contains(&Role::Carrier)
    }
}

/// Check `actor` against the permission matrix and, for carrier links, the job scope
pub fn authorize(actor: &Actor, operation: Operation, job_id: Option<&str>) -> Result<(), EscrowError> {
    match actor {
        Actor::System { .. } => Ok(()),
        Actor::User { role, .. } => {
            if operation.allowed_roles().contains(role) {
                Ok(())
            } else {
                Err(EscrowError::Forbidden(format!(
                    "role {} may not perform {:?}",
                    role, operation
                )))
            }
        }
        Actor::CarrierLink {
            job_id: scoped_job, ..
        } => {
            if !operation.carrier_link_allowed() {
                return Err(EscrowError::Forbidden(format!(
                    "carrier link may not perform {:?}",
                    operation
                )));
            }
            match job_id {
                Some(job_id) if job_id == scoped_job => Ok(()),
                _ => Err(EscrowError::Forbidden(
                    "carrier invite job-scope mismatch".to_string(),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(job_id: &str) -> Actor {
        Actor::CarrierLink {
            job_id: job_id.to_string(),
            invite_id: "inv-1".to_string(),
        }
    }

    #[test]
    fn test_carrier_link_is_scoped_to_one_job() {
        assert!(authorize(&link("job-1"), Operation::ConfirmPickup, Some("job-1")).is_ok());

        let err = authorize(&link("job-1"), Operation::ConfirmPickup, Some("job-2")).unwrap_err();
        assert!(matches!(err, EscrowError::Forbidden(msg) if msg.contains("job-scope")));
    }

    #[test]
    fn test_carrier_link_cannot_approve_or_release() {
        assert!(authorize(&link("job-1"), Operation::Approve, Some("job-1")).is_err());
        assert!(authorize(&link("job-1"), Operation::Release, Some("job-1")).is_err());
    }

    #[test]
    fn test_role_matrix() {
        let shipper = Actor::user("s1", Role::Shipper);
        assert!(authorize(&shipper, Operation::Approve, Some("j")).is_ok());
        assert!(authorize(&shipper, Operation::Release, Some("j")).is_err());
        assert!(authorize(&shipper, Operation::ConfirmPickup, Some("j")).is_err());

        let admin = Actor::admin("a1");
        assert!(authorize(&admin, Operation::Release, Some("j")).is_ok());
        assert!(authorize(&Actor::system("cli"), Operation::DrainOutbox, None).is_ok());
    }
}
