// Resolved identities that invoke engine operations

use serde::{Deserialize, Serialize};

use super::string_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Shipper,
    Carrier,
}

string_enum!(Role, "role", {
    Admin => "admin",
    Shipper => "shipper",
    Carrier => "carrier",
});

/// Who is acting. Identity resolution (sessions, API keys) happens upstream;
/// the engine only needs a stable log string and the scope to check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    User { id: String, role: Role },
    /// Carrier acting through a verified capability token
    CarrierLink { job_id: String, invite_id: String },
    System { name: String },
}

impl Actor {
    pub fn user(id: impl Into<String>, role: Role) -> Self {
        Actor::User {
            id: id.into(),
            role,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Actor::user(id, Role::Admin)
    }

    pub fn system(name: impl Into<String>) -> Self {
        Actor::System { name: name.into() }
    }

    /// Stable identity string recorded in the decision log
    pub fn log_string(&self) -> String {
        match self {
            Actor::User { id, role } => format!("user:{}:{}", id, role),
            Actor::CarrierLink { invite_id, .. } => format!("carrier_link:{}", invite_id),
            Actor::System { name } => format!("system:{}", name),
        }
    }

    /// Carrier users and carrier links both act as the carrier
    pub fn is_carrier(&self) -> bool {
        matches!(
            self,
            Actor::CarrierLink { .. }
                | Actor::User {
                    role: Role::Carrier,
                    ..
                }
        )
    }
}
