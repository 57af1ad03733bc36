use chrono::{DateTime, NaiveDate, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Problem-type labels produced by the coverage analyzer.
pub mod problem_types {
    pub const FLAT_TIRE: &str = "flat tire";
    pub const BATTERY_ISSUE: &str = "battery issue";
    pub const LOCKOUT: &str = "lockout";
    pub const FUEL_DELIVERY: &str = "fuel delivery";
    pub const BREAKDOWN_TOW: &str = "breakdown requiring tow";
    pub const GENERAL: &str = "general roadside assistance";

    pub const ALL: [&str; 6] = [
        FLAT_TIRE,
        BATTERY_ISSUE,
        LOCKOUT,
        FUEL_DELIVERY,
        BREAKDOWN_TOW,
        GENERAL,
    ];
}

/// Policy exclusion categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionTag {
    OffRoadUse,
    CommercialUse,
    RacingEvents,
}

/// Individual services listed in the roadside coverage table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Towing,
    BatteryJumpstart,
    FlatTireService,
    FuelDelivery,
    LockoutService,
}

impl ServiceKind {
    /// Maps an analyzer problem type to the service that handles it. The
    /// general label has no dedicated service line.
    pub fn for_problem(problem_type: &str) -> Option<Self> {
        match problem_type {
            problem_types::FLAT_TIRE => Some(ServiceKind::FlatTireService),
            problem_types::BATTERY_ISSUE => Some(ServiceKind::BatteryJumpstart),
            problem_types::LOCKOUT => Some(ServiceKind::LockoutService),
            problem_types::FUEL_DELIVERY => Some(ServiceKind::FuelDelivery),
            problem_types::BREAKDOWN_TOW => Some(ServiceKind::Towing),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServiceKind::Towing => "towing",
            ServiceKind::BatteryJumpstart => "battery jump-start",
            ServiceKind::FlatTireService => "flat tire service",
            ServiceKind::FuelDelivery => "fuel delivery",
            ServiceKind::LockoutService => "lockout service",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            ServiceKind::Towing => "towing",
            ServiceKind::BatteryJumpstart => "battery_jumpstart",
            ServiceKind::FlatTireService => "flat_tire_service",
            ServiceKind::FuelDelivery => "fuel_delivery",
            ServiceKind::LockoutService => "lockout_service",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCoverage {
    pub is_covered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance_km: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadsideCoverage {
    pub is_covered: bool,
    pub service_limit_per_year: u32,
    pub services: BTreeMap<ServiceKind, ServiceCoverage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub policy_holder: String,
    pub policy_number: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub roadside_assistance: RoadsideCoverage,
    pub exclusions: Vec<ExclusionTag>,
}

impl Policy {
    /// Static coverage lookup for a problem type: `(is_covered, reason)`.
    pub fn coverage_for(&self, problem_type: &str) -> (bool, String) {
        if !self.roadside_assistance.is_covered {
            return (
                false,
                "Roadside assistance is not included in your policy.".to_string(),
            );
        }
        let Some(service) = ServiceKind::for_problem(problem_type) else {
            return (
                true,
                "Roadside assistance is covered under your policy.".to_string(),
            );
        };
        let covered = self
            .roadside_assistance
            .services
            .get(&service)
            .map(|coverage| coverage.is_covered)
            .unwrap_or(false);
        if covered {
            (true, format!("Your policy covers {}.", service.label()))
        } else {
            (
                false,
                format!("Unfortunately, {} is not covered under your policy.", service.label()),
            )
        }
    }

    pub fn excludes(&self, tag: ExclusionTag) -> bool {
        self.exclusions.contains(&tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCategory {
    RepairTruck,
    TowTruck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "type")]
    pub category: ProviderCategory,
}

impl Provider {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Garage {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl Garage {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

/// Stage of the customer dialogue.
///
/// Serialised by name. Numeric steps from older clients (`0`, `1`, `1.5`, `2`,
/// `3`, `4`, `5`) are still accepted; `3` lands on `CollectingLocation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStep {
    #[default]
    Greeting,
    CollectingProblem,
    Clarifying,
    CollectingName,
    CollectingLocation,
    Done,
}

impl ConversationStep {
    fn from_legacy_number(number: f64) -> Option<Self> {
        let doubled = number * 2.0;
        if doubled.fract() != 0.0 {
            return None;
        }
        match doubled as i64 {
            0 => Some(ConversationStep::Greeting),
            2 => Some(ConversationStep::CollectingProblem),
            3 => Some(ConversationStep::Clarifying),
            4 => Some(ConversationStep::CollectingName),
            6 | 8 => Some(ConversationStep::CollectingLocation),
            10 => Some(ConversationStep::Done),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "greeting" => Some(ConversationStep::Greeting),
            "collecting_problem" => Some(ConversationStep::CollectingProblem),
            "clarifying" => Some(ConversationStep::Clarifying),
            "collecting_name" => Some(ConversationStep::CollectingName),
            "collecting_location" => Some(ConversationStep::CollectingLocation),
            "done" => Some(ConversationStep::Done),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ConversationStep {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawStep {
            Number(f64),
            Name(String),
        }

        match RawStep::deserialize(deserializer)? {
            RawStep::Number(number) => Self::from_legacy_number(number)
                .ok_or_else(|| D::Error::custom(format!("unknown conversation step {number}"))),
            RawStep::Name(name) => Self::from_name(&name)
                .ok_or_else(|| D::Error::custom(format!("unknown conversation step {name:?}"))),
        }
    }
}

/// Fields accumulated across the dialogue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectedFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_covered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub potential_exclusions: Option<Vec<ExclusionTag>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification_questions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_description: Option<String>,
}

/// Dialogue state owned by the caller and handed back on every turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationState {
    pub step: ConversationStep,
    pub collected: CollectedFields,
    pub ready_for_dispatch: bool,
    pub coverage_denied: bool,
    pub complete: bool,
}

/// Result of classifying a free-text problem description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemAnalysis {
    pub problem_type: String,
    pub needs_clarification: bool,
    pub clarification_questions: Option<Vec<String>>,
    pub potential_exclusions: Option<Vec<ExclusionTag>>,
    /// `None` while an exclusion question is still open.
    pub is_covered: Option<bool>,
    pub coverage_reason: String,
    pub suggested_service: Option<String>,
}

/// Outcome of checking a customer's clarification reply against the raised exclusions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationResolution {
    pub exclusions_apply: bool,
    pub applicable_exclusions: Vec<ExclusionTag>,
    pub is_covered: bool,
    pub coverage_reason: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Open,
    Dispatched,
    Resolved,
    ManualTakeover,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimEvent {
    pub timestamp: DateTime<Utc>,
    pub status: ClaimStatus,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub policy_holder: String,
    pub policy_number: String,
    pub problem_type: String,
    pub status: ClaimStatus,
    pub created_at: DateTime<Utc>,
    pub history: Vec<ClaimEvent>,
}

impl Claim {
    pub fn open(
        policy_holder: impl Into<String>,
        policy_number: impl Into<String>,
        problem_type: impl Into<String>,
        conversation_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let problem_type = problem_type.into();
        let opened = ClaimEvent {
            timestamp: now,
            status: ClaimStatus::Open,
            details: Value::String(format!("Claim created for {problem_type}")),
        };
        Self {
            claim_id: uuid::Uuid::new_v4().to_string(),
            conversation_id,
            policy_holder: policy_holder.into(),
            policy_number: policy_number.into(),
            problem_type,
            status: ClaimStatus::Open,
            created_at: now,
            history: vec![opened],
        }
    }

    /// Moves the claim to `status` and appends the matching history event.
    /// Event timestamps never go backwards.
    pub fn record(&mut self, status: ClaimStatus, details: Value, now: DateTime<Utc>) {
        let timestamp = self
            .history
            .last()
            .map_or(now, |last| now.max(last.timestamp));
        self.status = status;
        self.history.push(ClaimEvent {
            timestamp,
            status,
            details,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    Open,
    RequiresHuman,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Agent,
    Admin,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Agent => "agent",
            MessageKind::Admin => "admin",
            MessageKind::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub sender: String,
}

/// Admin-board record of a conversation, independent of `ConversationState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub customer_name: String,
    pub problem_type: String,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub messages: Vec<ConversationMessage>,
    pub requires_human: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_user: Option<String>,
    pub is_active: bool,
}

impl ConversationRecord {
    pub fn new(
        conversation_id: impl Into<String>,
        customer_name: impl Into<String>,
        problem_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            customer_name: customer_name.into(),
            problem_type: problem_type.into(),
            status: ConversationStatus::Open,
            created_at: now,
            last_updated: now,
            messages: Vec::new(),
            requires_human: false,
            admin_user: None,
            is_active: true,
        }
    }

    /// Advances `last_updated` without letting it move backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.last_updated = self.last_updated.max(now);
        self.last_updated
    }

    pub fn push_message(
        &mut self,
        kind: MessageKind,
        content: impl Into<String>,
        sender: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let timestamp = self.touch(now);
        self.messages.push(ConversationMessage {
            timestamp,
            kind,
            content: content.into(),
            sender: sender.into(),
        });
    }
}

/// Conversation records grouped by status for the admin board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationBoard {
    pub open: Vec<ConversationRecord>,
    pub requires_human: Vec<ConversationRecord>,
    pub closed: Vec<ConversationRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub step: usize,
    pub agent: String,
    pub decision: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// One claim as the admin dashboard shows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseView {
    pub claim: Claim,
    pub conversation: Vec<ConversationMessage>,
    pub decisions: Vec<DecisionEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn legacy_numeric_steps_still_deserialize() {
        let cases = [
            (json!(0), ConversationStep::Greeting),
            (json!(1), ConversationStep::CollectingProblem),
            (json!(1.5), ConversationStep::Clarifying),
            (json!(2), ConversationStep::CollectingName),
            (json!(3), ConversationStep::CollectingLocation),
            (json!(4), ConversationStep::CollectingLocation),
            (json!(5), ConversationStep::Done),
        ];
        for (raw, expected) in cases {
            let step: ConversationStep = serde_json::from_value(raw.clone()).unwrap();
            assert_eq!(step, expected, "step {raw}");
        }
    }

    #[test]
    fn unknown_steps_are_rejected() {
        assert!(serde_json::from_value::<ConversationStep>(json!(2.5)).is_err());
        assert!(serde_json::from_value::<ConversationStep>(json!(7)).is_err());
        assert!(serde_json::from_value::<ConversationStep>(json!("waiting")).is_err());
    }

    #[test]
    fn step_names_round_trip() {
        let value = serde_json::to_value(ConversationStep::Clarifying).unwrap();
        assert_eq!(value, json!("clarifying"));
        let back: ConversationStep = serde_json::from_value(value).unwrap();
        assert_eq!(back, ConversationStep::Clarifying);
    }

    #[test]
    fn empty_state_object_is_a_fresh_conversation() {
        let state: ConversationState = serde_json::from_value(json!({})).unwrap();
        assert_eq!(state, ConversationState::default());
        assert_eq!(state.step, ConversationStep::Greeting);
    }

    #[test]
    fn claim_history_timestamps_never_decrease() {
        let now = Utc::now();
        let mut claim = Claim::open("John Doe", "XYZ-12345", "flat tire", None, now);
        claim.record(ClaimStatus::Dispatched, json!({}), now - Duration::seconds(30));
        claim.record(ClaimStatus::Resolved, json!({}), now + Duration::seconds(5));

        assert_eq!(claim.status, ClaimStatus::Resolved);
        assert_eq!(claim.history.len(), 3);
        assert!(
            claim
                .history
                .windows(2)
                .all(|pair| pair[0].timestamp <= pair[1].timestamp)
        );
    }

    #[test]
    fn conversation_last_updated_never_decreases() {
        let now = Utc::now();
        let mut record = ConversationRecord::new("c-1", "John Doe", "lockout", now);
        record.push_message(MessageKind::User, "hi", "Customer", now - Duration::minutes(1));
        assert_eq!(record.last_updated, now);
        assert_eq!(record.messages[0].timestamp, now);
    }

    #[test]
    fn claim_status_uses_upper_snake_case() {
        assert_eq!(
            serde_json::to_value(ClaimStatus::ManualTakeover).unwrap(),
            json!("MANUAL_TAKEOVER")
        );
        assert_eq!(
            serde_json::to_value(ConversationStatus::RequiresHuman).unwrap(),
            json!("REQUIRES_HUMAN")
        );
    }
}
