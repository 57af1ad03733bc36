use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agents::{
    Assignment, LocationFix, Notification, PolicyVerification, ReferenceData, agent_names,
    compose_notification, locate_customer, select_provider, verify_policy,
};
use crate::error::{Result, ServiceError};
use crate::models::{
    Claim, ClaimStatus, CollectedFields, ConversationState, ProviderCategory, problem_types,
};
use crate::store::CaseRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Success,
    Denied,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub claim_id: String,
    pub status: ClaimStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub provider_name: String,
    pub eta_minutes: u32,
    pub claim_id: String,
    pub service_type: ProviderCategory,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cab_requested: bool,
}

/// Audit record of one dispatch attempt. Denials and failures are results,
/// carried in `status` and `reason`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub status: DispatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub conversation_data: CollectedFields,
    pub agents_executed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<PolicyVerification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationFix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<Assignment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub communications: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<ClaimReceipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<DispatchSummary>,
}

impl DispatchResult {
    fn started(collected: &CollectedFields) -> Self {
        Self {
            status: DispatchStatus::Failed,
            reason: None,
            conversation_data: collected.clone(),
            agents_executed: Vec::new(),
            verification: None,
            location: None,
            dispatch: None,
            communications: Vec::new(),
            claim: None,
            summary: None,
        }
    }

    fn finish(mut self, status: DispatchStatus, reason: Option<String>) -> Self {
        self.status = status;
        self.reason = reason;
        self
    }

    /// One-line status shown to the customer while they wait.
    pub fn status_line(&self) -> Option<String> {
        let reason = self.reason.as_deref().unwrap_or("Unknown error");
        match self.status {
            DispatchStatus::Success => self.communications.first().cloned(),
            DispatchStatus::Denied => {
                Some(format!("Your request could not be processed: {reason}"))
            }
            DispatchStatus::Failed => Some(format!("Service request failed: {reason}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelResult {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    #[serde(default)]
    pub help_confirmed: bool,
    #[serde(default)]
    pub cab_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfirmationOutcome {
    Dispatched(Box<DispatchResult>),
    Cancelled(CancelResult),
}

impl ConfirmationOutcome {
    pub fn status_line(&self) -> Option<String> {
        match self {
            ConfirmationOutcome::Dispatched(result) => result.status_line(),
            ConfirmationOutcome::Cancelled(cancel) => Some(cancel.message.clone()),
        }
    }
}

const CANCELLED_MESSAGE: &str = "Your service request has been cancelled. No help will be dispatched.";

/// Runs the dispatch agents in order and records the claim.
pub struct DispatchOrchestrator {
    reference: Arc<ReferenceData>,
    repository: Arc<CaseRepository>,
}

impl DispatchOrchestrator {
    pub fn new(reference: Arc<ReferenceData>, repository: Arc<CaseRepository>) -> Self {
        Self {
            reference,
            repository,
        }
    }

    pub async fn dispatch(
        &self,
        state: &ConversationState,
        conversation_id: Option<&str>,
    ) -> Result<DispatchResult> {
        let collected = &state.collected;
        let mut result = DispatchResult::started(collected);

        if state.coverage_denied {
            let reason = collected
                .coverage_reason
                .clone()
                .unwrap_or_else(|| "This request is not covered under your policy.".to_string());
            info!(reason = %reason, "Dispatch skipped, coverage was denied");
            return Ok(result.finish(DispatchStatus::Denied, Some(reason)));
        }
        if !state.ready_for_dispatch {
            return Err(ServiceError::NotReady);
        }

        let customer_name = collected.customer_name.as_deref().unwrap_or_default();
        let verification = verify_policy(
            customer_name,
            &self.reference.policy,
            Utc::now().date_naive(),
        );
        result
            .agents_executed
            .push(agent_names::VERIFICATION_POLICY.to_string());
        let covered_policy = verification
            .policy
            .clone()
            .filter(|_| verification.roadside_covered);
        result.verification = Some(verification);
        let Some(policy) = covered_policy else {
            return Ok(result.finish(
                DispatchStatus::Denied,
                Some("Policy verification failed or no coverage".to_string()),
            ));
        };

        let location = locate_customer(&self.reference);
        result
            .agents_executed
            .push(agent_names::GEOLOCATION.to_string());

        let problem_type = collected
            .problem_type
            .as_deref()
            .unwrap_or(problem_types::GENERAL);
        let assignment = select_provider(
            problem_type,
            location.coordinates(),
            &self.reference.providers,
            &self.reference.garages,
        );
        result.location = Some(location);
        result
            .agents_executed
            .push(agent_names::DISPATCH_LOGISTICS.to_string());
        let Some(assignment) = assignment else {
            warn!(problem_type = %problem_type, "Dispatch failed, no provider available");
            return Ok(result.finish(
                DispatchStatus::Failed,
                Some("No available service providers".to_string()),
            ));
        };

        let holder = policy.policy_holder.as_str();
        result.communications = vec![
            compose_notification(
                holder,
                Notification::Dispatched {
                    provider_name: &assignment.provider.name,
                },
            ),
            compose_notification(
                holder,
                Notification::EtaUpdate {
                    eta_minutes: assignment.eta_minutes,
                },
            ),
        ];
        result
            .agents_executed
            .push(agent_names::CUSTOMER_COMMUNICATIONS.to_string());

        let now = Utc::now();
        let mut claim = Claim::open(
            holder,
            policy.policy_number.as_str(),
            problem_type,
            conversation_id.map(str::to_string),
            now,
        );
        claim.record(
            ClaimStatus::Dispatched,
            json!({
                "provider": assignment.provider.name,
                "eta_minutes": assignment.eta_minutes,
                "service_type": assignment.service_type,
            }),
            now,
        );
        // Arrival is simulated immediately.
        claim.record(
            ClaimStatus::Resolved,
            json!({
                "resolution": "Service provider arrived and assisted customer",
                "completion_time": now,
                "notification": compose_notification(holder, Notification::Arrival),
            }),
            Utc::now(),
        );
        let claim_id = claim.claim_id.clone();
        let claim_status = claim.status;
        self.repository.insert_claim(claim).await?;
        result
            .agents_executed
            .push(agent_names::CLAIMS_FOLLOWUP.to_string());

        info!(
            claim_id = %claim_id,
            provider = %assignment.provider.name,
            eta_minutes = assignment.eta_minutes,
            conversation_id = ?conversation_id,
            "Dispatch completed"
        );

        result.claim = Some(ClaimReceipt {
            claim_id: claim_id.clone(),
            status: claim_status,
        });
        result.summary = Some(DispatchSummary {
            provider_name: assignment.provider.name.clone(),
            eta_minutes: assignment.eta_minutes,
            claim_id,
            service_type: assignment.service_type,
            cab_requested: false,
        });
        result.dispatch = Some(assignment);
        Ok(result.finish(DispatchStatus::Success, None))
    }

    /// Dispatches only after the customer confirmed; optionally books a cab.
    pub async fn confirm_dispatch(
        &self,
        state: &ConversationState,
        confirmation: Confirmation,
        conversation_id: Option<&str>,
    ) -> Result<ConfirmationOutcome> {
        if !confirmation.help_confirmed {
            info!("Customer declined dispatch");
            return Ok(ConfirmationOutcome::Cancelled(CancelResult {
                status: "cancelled".to_string(),
                message: CANCELLED_MESSAGE.to_string(),
            }));
        }

        let mut result = self.dispatch(state, conversation_id).await?;
        if confirmation.cab_requested && result.status == DispatchStatus::Success {
            let holder = result
                .verification
                .as_ref()
                .and_then(|v| v.policy.as_ref())
                .map(|policy| policy.policy_holder.clone())
                .unwrap_or_default();
            result
                .communications
                .push(compose_notification(&holder, Notification::CabBooked));
            if let Some(summary) = result.summary.as_mut() {
                summary.cab_requested = true;
            }
            info!("Cab booked alongside dispatch");
        }
        Ok(ConfirmationOutcome::Dispatched(Box::new(result)))
    }
}
