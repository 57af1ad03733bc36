use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::agents::{ClarificationResolver, CoverageAnalyzer, TextGenerator};
use crate::models::{ConversationState, ConversationStep, Policy, problem_types};

pub const GREETING: &str = "Hello! I'm here to help with your roadside assistance request. Can you briefly describe what's happening with your vehicle?";

const PROBLEM_REPROMPT: &str =
    "I'm here to help! Could you briefly describe what's happening with your vehicle?";

const READY_REPLY: &str = "Perfect! I have all the information needed. Let me find the best service provider for your situation and dispatch them to your location.";

const CLOSING_REPLY: &str =
    "Your request has been processed. You should receive updates shortly!";

const DENIED_CLOSING_REPLY: &str = "This request is closed because it isn't covered under your policy. Please contact us again if anything changes.";

const CONVERSATION_PROMPT: &str = r#"You are a helpful insurance roadside assistance agent. Guide the customer through the assistance process with empathy and professionalism.

CURRENT SITUATION:
- Conversation stage: {stage}
- Information collected: {collected}

WHAT TO DO NOW:
{goal}

GUIDELINES:
- Be empathetic and professional
- Keep responses concise (1-2 sentences max)
- Ask only one question at a time
- Sound natural and human-like
- Never promise coverage or mention policy exclusions
"#;

/// Reply plus the updated state the caller must send back on the next turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub state: ConversationState,
}

impl TurnOutcome {
    fn new(reply: impl Into<String>, state: ConversationState) -> Self {
        Self {
            reply: reply.into(),
            state,
        }
    }
}

/// Drives the customer dialogue: one transition per inbound message.
pub struct RoadsideAssistant {
    generator: Arc<dyn TextGenerator>,
    analyzer: CoverageAnalyzer,
    resolver: ClarificationResolver,
}

impl RoadsideAssistant {
    pub fn new(generator: Arc<dyn TextGenerator>, policy: Policy) -> Self {
        Self {
            analyzer: CoverageAnalyzer::new(generator.clone(), policy.clone()),
            resolver: ClarificationResolver::new(generator.clone(), policy),
            generator,
        }
    }

    pub fn analyzer(&self) -> &CoverageAnalyzer {
        &self.analyzer
    }

    pub async fn handle_turn(&self, message: &str, state: ConversationState) -> TurnOutcome {
        let from = state.step;
        let outcome = match state.step {
            ConversationStep::Greeting => self.greet(state),
            ConversationStep::CollectingProblem => self.collect_problem(message, state).await,
            ConversationStep::Clarifying => self.clarify(message, state).await,
            ConversationStep::CollectingName => self.collect_name(message, state).await,
            ConversationStep::CollectingLocation => self.collect_location(message, state).await,
            ConversationStep::Done => self.close(message, state).await,
        };

        info!(
            from = ?from,
            to = ?outcome.state.step,
            ready_for_dispatch = outcome.state.ready_for_dispatch,
            coverage_denied = outcome.state.coverage_denied,
            "Conversation turn handled"
        );
        outcome
    }

    fn greet(&self, mut state: ConversationState) -> TurnOutcome {
        state.step = ConversationStep::CollectingProblem;
        TurnOutcome::new(GREETING, state)
    }

    async fn collect_problem(&self, message: &str, mut state: ConversationState) -> TurnOutcome {
        let description = message.trim();
        if description.is_empty() {
            return TurnOutcome::new(PROBLEM_REPROMPT, state);
        }

        let analysis = self.analyzer.analyze(description, None).await;
        state.collected.problem_description = Some(description.to_string());
        state.collected.problem_type = Some(analysis.problem_type.clone());

        if analysis.needs_clarification {
            let reply = format!(
                "Thanks for letting me know, I'm sorry you're dealing with this. {}",
                questions_text(analysis.clarification_questions.as_deref())
            );
            state.collected.potential_exclusions = analysis.potential_exclusions;
            state.collected.clarification_questions = analysis.clarification_questions;
            state.step = ConversationStep::Clarifying;
            return TurnOutcome::new(reply, state);
        }

        let is_covered = analysis.is_covered.unwrap_or(false);
        state.collected.is_covered = Some(is_covered);
        state.collected.coverage_reason = Some(analysis.coverage_reason.clone());
        if !is_covered {
            return deny(state, &analysis.coverage_reason);
        }

        self.ask_for_name(description, state).await
    }

    async fn clarify(&self, message: &str, mut state: ConversationState) -> TurnOutcome {
        let reply = message.trim();
        if reply.is_empty() {
            let questions = questions_text(state.collected.clarification_questions.as_deref());
            return TurnOutcome::new(
                format!("Could you tell me a little more before I continue? {questions}"),
                state,
            );
        }
        let potential = state
            .collected
            .potential_exclusions
            .clone()
            .unwrap_or_default();
        let problem_type = state
            .collected
            .problem_type
            .clone()
            .unwrap_or_else(|| problem_types::GENERAL.to_string());

        let resolution = self.resolver.resolve(reply, &potential, &problem_type).await;
        state.collected.clarification_response = Some(reply.to_string());
        state.collected.is_covered = Some(resolution.is_covered);
        state.collected.coverage_reason = Some(resolution.coverage_reason.clone());

        if !resolution.is_covered {
            return deny(state, &resolution.coverage_reason);
        }
        self.ask_for_name(reply, state).await
    }

    async fn ask_for_name(&self, message: &str, mut state: ConversationState) -> TurnOutcome {
        let problem_type = state
            .collected
            .problem_type
            .as_deref()
            .unwrap_or(problem_types::GENERAL);
        let scripted = format!(
            "I understand you're having a {problem_type} issue. To verify your coverage, can you please confirm your full name as it appears on your policy?"
        );
        state.step = ConversationStep::CollectingName;
        let reply = self
            .compose_reply(
                &state,
                "The customer's problem is covered. Acknowledge it briefly and ask for their full name as it appears on their policy.",
                message,
                scripted,
            )
            .await;
        TurnOutcome::new(reply, state)
    }

    async fn collect_name(&self, message: &str, mut state: ConversationState) -> TurnOutcome {
        let name = message.trim().to_string();
        let scripted = format!(
            "Thank you, {name}. I'm verifying your policy coverage now. For the fastest assistance, can you describe where you are? (Street name, nearby landmarks, etc.)"
        );
        state.collected.customer_name = Some(name);
        state.step = ConversationStep::CollectingLocation;
        let reply = self
            .compose_reply(
                &state,
                "The customer gave their name. Thank them, say their policy is being verified, and ask for their exact location (street name, landmarks).",
                message,
                scripted,
            )
            .await;
        TurnOutcome::new(reply, state)
    }

    async fn collect_location(&self, message: &str, mut state: ConversationState) -> TurnOutcome {
        state.collected.location_description = Some(message.trim().to_string());
        state.ready_for_dispatch = true;
        state.step = ConversationStep::Done;
        let reply = self
            .compose_reply(
                &state,
                "The customer gave their location. Confirm you have everything needed and that help is being arranged.",
                message,
                READY_REPLY.to_string(),
            )
            .await;
        TurnOutcome::new(reply, state)
    }

    async fn close(&self, message: &str, mut state: ConversationState) -> TurnOutcome {
        state.complete = true;
        if state.coverage_denied {
            return TurnOutcome::new(DENIED_CLOSING_REPLY, state);
        }
        let reply = self
            .compose_reply(
                &state,
                "The request has been processed. Reassure the customer that updates will follow.",
                message,
                CLOSING_REPLY.to_string(),
            )
            .await;
        TurnOutcome::new(reply, state)
    }

    /// Generated reply for the current stage, or `scripted` if the generation
    /// service fails for any reason.
    async fn compose_reply(
        &self,
        state: &ConversationState,
        goal: &str,
        message: &str,
        scripted: String,
    ) -> String {
        let collected = serde_json::to_string(&state.collected).unwrap_or_default();
        let stage = serde_json::to_string(&state.step).unwrap_or_default();
        let instructions = CONVERSATION_PROMPT
            .replace("{stage}", &stage)
            .replace("{collected}", &collected)
            .replace("{goal}", goal);
        let message = message.trim();
        let input = format!(
            "Customer says: {}",
            if message.is_empty() { "Hello" } else { message }
        );

        match self.generator.generate(&instructions, &input).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, step = ?state.step, "Using scripted reply");
                scripted
            }
        }
    }
}

fn questions_text(questions: Option<&[String]>) -> String {
    questions.unwrap_or_default().join(" ")
}

fn deny(mut state: ConversationState, reason: &str) -> TurnOutcome {
    state.coverage_denied = true;
    state.step = ConversationStep::Done;
    let reply = format!(
        "I'm sorry, but I'm unable to arrange roadside assistance for this request. {reason}"
    );
    TurnOutcome::new(reply, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::DisabledGenerator;
    use crate::agents::GenerationError;
    use crate::agents::llm::testing::ScriptedGenerator;
    use crate::agents::reference_data::mock_policy;
    use crate::models::ExclusionTag;

    fn offline() -> RoadsideAssistant {
        RoadsideAssistant::new(Arc::new(DisabledGenerator), mock_policy())
    }

    async fn run(assistant: &RoadsideAssistant, messages: &[&str]) -> TurnOutcome {
        let mut outcome = assistant.handle_turn("", ConversationState::default()).await;
        for message in messages {
            outcome = assistant.handle_turn(message, outcome.state).await;
        }
        outcome
    }

    #[tokio::test]
    async fn greeting_moves_to_problem_collection() {
        let outcome = offline()
            .handle_turn("hi", ConversationState::default())
            .await;
        assert_eq!(outcome.reply, GREETING);
        assert_eq!(outcome.state.step, ConversationStep::CollectingProblem);
    }

    #[tokio::test]
    async fn covered_problem_collects_name_then_location() {
        let assistant = offline();
        let outcome = run(&assistant, &["I have a flat tire", "John Doe", "Main Street"]).await;

        let state = &outcome.state;
        assert_eq!(state.step, ConversationStep::Done);
        assert!(state.ready_for_dispatch);
        assert!(!state.coverage_denied);
        assert_eq!(state.collected.problem_type.as_deref(), Some("flat tire"));
        assert_eq!(state.collected.customer_name.as_deref(), Some("John Doe"));
        assert_eq!(state.collected.location_description.as_deref(), Some("Main Street"));
        assert_eq!(outcome.reply, READY_REPLY);
    }

    #[tokio::test]
    async fn name_step_asks_for_location() {
        let assistant = offline();
        let outcome = run(&assistant, &["my battery is dead", "  John Doe "]).await;
        assert_eq!(outcome.state.step, ConversationStep::CollectingLocation);
        assert_eq!(outcome.state.collected.customer_name.as_deref(), Some("John Doe"));
        assert!(outcome.reply.contains("where you are"));
    }

    #[tokio::test]
    async fn suspected_exclusion_asks_a_question() {
        let outcome = run(&offline(), &["delivery van battery dead"]).await;

        assert_eq!(outcome.state.step, ConversationStep::Clarifying);
        assert!(!outcome.state.ready_for_dispatch);
        assert_eq!(
            outcome.state.collected.potential_exclusions,
            Some(vec![ExclusionTag::CommercialUse])
        );
        assert!(outcome.reply.contains('?'));
        assert!(!outcome.reply.to_lowercase().contains("commercial"));
    }

    #[tokio::test]
    async fn blank_clarification_repeats_the_questions() {
        let asked = run(&offline(), &["delivery van battery dead"]).await;
        let questions = asked.state.collected.clarification_questions.clone().unwrap();

        let outcome = run(&offline(), &["delivery van battery dead", "   "]).await;
        assert_eq!(outcome.state.step, ConversationStep::Clarifying);
        assert_eq!(outcome.state.collected.is_covered, None);
        assert!(!outcome.state.coverage_denied);
        assert!(!outcome.state.ready_for_dispatch);
        for question in &questions {
            assert!(outcome.reply.contains(question.as_str()));
        }
    }

    #[tokio::test]
    async fn clarification_that_confirms_exclusion_denies() {
        let outcome = run(
            &offline(),
            &["flat tire on a forest road", "yes I was on a dirt trail"],
        )
        .await;
        assert_eq!(outcome.state.step, ConversationStep::Done);
        assert!(outcome.state.coverage_denied);
        assert!(!outcome.state.ready_for_dispatch);
        assert_eq!(outcome.state.collected.is_covered, Some(false));
    }

    #[tokio::test]
    async fn clarification_that_clears_exclusion_continues() {
        let outcome = run(
            &offline(),
            &["delivery van battery dead", "it's my own car, I was going home"],
        )
        .await;
        assert_eq!(outcome.state.step, ConversationStep::CollectingName);
        assert!(!outcome.state.coverage_denied);
        assert_eq!(
            outcome.state.collected.clarification_response.as_deref(),
            Some("it's my own car, I was going home")
        );
    }

    #[tokio::test]
    async fn uncovered_service_is_denied_immediately() {
        let outcome = run(&offline(), &["I ran out of fuel"]).await;
        assert_eq!(outcome.state.step, ConversationStep::Done);
        assert!(outcome.state.coverage_denied);
        assert!(outcome.reply.contains("fuel delivery is not covered"));
    }

    #[tokio::test]
    async fn empty_problem_description_reprompts() {
        let outcome = run(&offline(), &["   "]).await;
        assert_eq!(outcome.state.step, ConversationStep::CollectingProblem);
        assert_eq!(outcome.reply, PROBLEM_REPROMPT);
    }

    #[tokio::test]
    async fn done_is_terminal() {
        let assistant = offline();
        let finished = run(&assistant, &["I have a flat tire", "John Doe", "Main Street"]).await;
        let first = assistant.handle_turn("thanks", finished.state).await;
        let second = assistant.handle_turn("hello?", first.state.clone()).await;

        assert_eq!(first.state.step, ConversationStep::Done);
        assert!(first.state.complete);
        assert_eq!(second.state, first.state);
        assert_eq!(second.reply, CLOSING_REPLY);
    }

    #[tokio::test]
    async fn generated_replies_are_used_when_available() {
        let generator = Arc::new(ScriptedGenerator::replying(&[
            "Thanks John! Where exactly are you right now?",
        ]));
        let assistant = RoadsideAssistant::new(generator.clone(), mock_policy());
        let state = ConversationState {
            step: ConversationStep::CollectingName,
            ..ConversationState::default()
        };

        let outcome = assistant.handle_turn("John Doe", state).await;
        assert_eq!(outcome.reply, "Thanks John! Where exactly are you right now?");
        assert_eq!(outcome.state.step, ConversationStep::CollectingLocation);
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn generation_faults_never_fail_the_turn() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(GenerationError::Request("connection reset".to_string())),
            Err(GenerationError::Timeout(std::time::Duration::from_secs(15))),
        ]));
        let assistant = RoadsideAssistant::new(generator.clone(), mock_policy());
        let state = ConversationState {
            step: ConversationStep::CollectingProblem,
            ..ConversationState::default()
        };

        let outcome = assistant.handle_turn("I locked my keys in the car", state).await;
        assert_eq!(outcome.state.step, ConversationStep::CollectingName);
        assert_eq!(outcome.state.collected.problem_type.as_deref(), Some("lockout"));
        assert!(outcome.reply.contains("lockout issue"));
        assert_eq!(generator.call_count(), 2);
    }
}
