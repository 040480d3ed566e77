// Evidence gate configuration attached to each job

use serde::{Deserialize, Serialize};

use super::string_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Delivery submission that passes the full gate advances straight to releasable
    Auto,
    /// An admin or shipper approves explicitly
    Manual,
}

string_enum!(ApprovalMode, "approval mode", {
    Auto => "auto",
    Manual => "manual",
});

/// Requirements that evidence must satisfy before payment becomes releasable.
///
/// Fixed at intake; one per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub require_pickup_photos: bool,
    pub require_delivery_photos: bool,
    pub require_vin: bool,
    pub require_pod: bool,
    pub min_pickup_photos: u32,
    pub min_delivery_photos: u32,
    pub approval_mode: ApprovalMode,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            require_pickup_photos: true,
            require_delivery_photos: true,
            require_vin: true,
            require_pod: false,
            min_pickup_photos: 4,
            min_delivery_photos: 4,
            approval_mode: ApprovalMode::Manual,
        }
    }
}

/// Per-job adjustments applied on top of the configured defaults at intake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOverrides {
    pub require_pickup_photos: Option<bool>,
    pub require_delivery_photos: Option<bool>,
    pub require_vin: Option<bool>,
    pub require_pod: Option<bool>,
    pub min_pickup_photos: Option<u32>,
    pub min_delivery_photos: Option<u32>,
    pub approval_mode: Option<ApprovalMode>,
}

impl GateOverrides {
    pub fn apply(&self, defaults: &GateConfig) -> GateConfig {
        GateConfig {
            require_pickup_photos: self
                .require_pickup_photos
                .unwrap_or(defaults.require_pickup_photos),
            require_delivery_photos: self
                .require_delivery_photos
                .unwrap_or(defaults.require_delivery_photos),
            require_vin: self.require_vin.unwrap_or(defaults.require_vin),
            require_pod: self.require_pod.unwrap_or(defaults.require_pod),
            min_pickup_photos: self.min_pickup_photos.unwrap_or(defaults.min_pickup_photos),
            min_delivery_photos: self
                .min_delivery_photos
                .unwrap_or(defaults.min_delivery_photos),
            approval_mode: self.approval_mode.unwrap_or(defaults.approval_mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_merge_onto_defaults() {
        let overrides = GateOverrides {
            require_pod: Some(true),
            min_pickup_photos: Some(2),
            ..Default::default()
        };

        let gate = overrides.apply(&GateConfig::default());

        assert!(gate.require_pod);
        assert_eq!(gate.min_pickup_photos, 2);
        assert_eq!(gate.min_delivery_photos, 4);
        assert_eq!(gate.approval_mode, ApprovalMode::Manual);
    }
}
