// Roadside assistance agents, called in a fixed order by the conversation
// state machine and the dispatch orchestrator.
pub mod clarification_resolver;
pub mod communications;
pub mod coverage_analyzer;
pub mod geo;
pub mod geolocation;
pub mod llm;
pub mod policy_verifier;
pub mod provider_selector;
pub mod reference_data;

pub use clarification_resolver::ClarificationResolver;
pub use communications::{Notification, compose_notification};
pub use coverage_analyzer::CoverageAnalyzer;
pub use geo::haversine_km;
pub use geolocation::{LocationFix, locate_customer};
pub use llm::{DisabledGenerator, GenerationError, OpenRouterGenerator, TextGenerator};
pub use policy_verifier::{CoverageStatus, PolicyVerification, verify_policy};
pub use provider_selector::{Assignment, select_provider};
pub use reference_data::ReferenceData;

// Audit-trail names, in call order.
pub mod agent_names {
    pub const VERIFICATION_POLICY: &str = "verification_policy_agent";
    pub const GEOLOCATION: &str = "geolocation_agent";
    pub const DISPATCH_LOGISTICS: &str = "dispatch_logistics_agent";
    pub const CUSTOMER_COMMUNICATIONS: &str = "customer_communications_agent";
    pub const CLAIMS_FOLLOWUP: &str = "claims_followup_agent";
}
