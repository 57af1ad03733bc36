use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::Policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    Active,
    Expired,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVerification {
    pub verified: bool,
    pub policy: Option<Policy>,
    pub coverage_status: CoverageStatus,
    pub roadside_covered: bool,
}

/// Matches `customer_name` against the policy holder (trimmed, case-insensitive)
/// and checks that `today` falls inside the policy's inclusive date window.
pub fn verify_policy(customer_name: &str, policy: &Policy, today: NaiveDate) -> PolicyVerification {
    let verified = customer_name.trim().to_lowercase() == policy.policy_holder.to_lowercase();

    if !verified {
        info!(coverage_status = "not_found", "Policy holder not found");
        return PolicyVerification {
            verified: false,
            policy: None,
            coverage_status: CoverageStatus::NotFound,
            roadside_covered: false,
        };
    }

    let in_window = policy.start_date <= today && today <= policy.end_date;
    let (coverage_status, roadside_covered) = if in_window {
        (CoverageStatus::Active, policy.roadside_assistance.is_covered)
    } else {
        (CoverageStatus::Expired, false)
    };

    info!(
        policy_number = %policy.policy_number,
        coverage_status = ?coverage_status,
        roadside_covered,
        "Policy verified"
    );

    PolicyVerification {
        verified: true,
        policy: Some(policy.clone()),
        coverage_status,
        roadside_covered,
    }
}
