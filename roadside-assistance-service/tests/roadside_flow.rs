use roadside_assistance_service::agents::{DisabledGenerator, ReferenceData};
use roadside_assistance_service::{
    CaseRepository, ClaimStatus, ConversationState, ConversationStep, DispatchOrchestrator,
    DispatchStatus, InMemoryDocumentStore, ProviderCategory, RoadsideAssistant,
};
use std::sync::Arc;

struct Harness {
    assistant: RoadsideAssistant,
    orchestrator: DispatchOrchestrator,
    repository: Arc<CaseRepository>,
}

fn harness() -> Harness {
    let reference = ReferenceData::default();
    let repository = Arc::new(CaseRepository::new(Arc::new(InMemoryDocumentStore::new())));
    Harness {
        assistant: RoadsideAssistant::new(Arc::new(DisabledGenerator), reference.policy.clone()),
        orchestrator: DispatchOrchestrator::new(Arc::new(reference), repository.clone()),
        repository,
    }
}

async fn converse(assistant: &RoadsideAssistant, messages: &[&str]) -> ConversationState {
    let mut state = ConversationState::default();
    // The first turn only produces the greeting.
    let greeting = assistant.handle_turn("", state).await;
    state = greeting.state;
    for message in messages {
        state = assistant.handle_turn(message, state).await.state;
    }
    state
}

#[tokio::test]
async fn battery_customer_is_dispatched_and_claim_resolved() {
    let h = harness();
    let state = converse(&h.assistant, &["my battery is dead", "John Doe", "Main Street"]).await;
    assert!(state.ready_for_dispatch);
    assert_eq!(state.step, ConversationStep::Done);

    let result = h.orchestrator.dispatch(&state, Some("conv-42")).await.unwrap();
    assert_eq!(result.status, DispatchStatus::Success);
    let summary = result.summary.expect("success carries a summary");
    assert!(matches!(
        summary.service_type,
        ProviderCategory::RepairTruck | ProviderCategory::TowTruck
    ));
    assert!(summary.eta_minutes >= 15);

    let claim = h.repository.claim(&summary.claim_id).await.unwrap();
    assert_eq!(claim.status, ClaimStatus::Resolved);
    assert_eq!(claim.policy_number, "XYZ-12345");

    let cases = h.repository.list_cases_for_admin().await.unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].decisions.len(), 3);
}

#[tokio::test]
async fn delivery_van_triggers_clarification_not_dispatch() {
    let h = harness();
    let state = converse(&h.assistant, &["delivery van battery dead"]).await;

    assert_eq!(state.step, ConversationStep::Clarifying);
    assert!(!state.ready_for_dispatch);
    assert!(h.orchestrator.dispatch(&state, None).await.is_err());
    assert!(h.repository.claims().await.unwrap().is_empty());
}

#[tokio::test]
async fn excluded_trip_is_denied_end_to_end() {
    let h = harness();
    let state = converse(
        &h.assistant,
        &["tyre blew out on a mountain road", "we were racing up the dirt trail"],
    )
    .await;
    assert!(state.coverage_denied);

    let result = h.orchestrator.dispatch(&state, None).await.unwrap();
    assert_eq!(result.status, DispatchStatus::Denied);
    assert!(result.agents_executed.is_empty());
}

#[tokio::test]
async fn wrong_policy_holder_is_denied_at_verification() {
    let h = harness();
    let state = converse(&h.assistant, &["locked my keys in", "Jane Smith", "Station Road"]).await;
    assert!(state.ready_for_dispatch);

    let result = h.orchestrator.dispatch(&state, None).await.unwrap();
    assert_eq!(result.status, DispatchStatus::Denied);
    assert!(h.repository.claims().await.unwrap().is_empty());
}

#[tokio::test]
async fn repeated_takeover_keeps_both_entries() {
    let h = harness();
    let state = converse(&h.assistant, &["flat tire", "john doe", "High Street"]).await;
    let result = h.orchestrator.dispatch(&state, None).await.unwrap();
    let claim_id = result.claim.unwrap().claim_id;

    h.repository.takeover_case(&claim_id, "alice", "first look").await.unwrap();
    let claim = h.repository.takeover_case(&claim_id, "alice", "first look").await.unwrap();

    assert_eq!(claim.status, ClaimStatus::ManualTakeover);
    let takeovers = claim
        .history
        .iter()
        .filter(|event| event.status == ClaimStatus::ManualTakeover)
        .count();
    assert_eq!(takeovers, 2);
}
