use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{ClarificationResolution, ExclusionTag, Policy};

use super::coverage_analyzer::mentions_indicator;
use super::llm::{GenerationError, TextGenerator, parse_structured};

const CLARIFICATION_PROMPT: &str = r#"You are a roadside assistance coverage analyst for an insurance company.

The customer was asked a follow-up question because one of these policy exclusions might apply:
{exclusions}

Decide from the customer's answer whether any of those exclusions actually applies.
Only consider the exclusions listed above. When the answer is ambiguous, apply the exclusion.

Respond with ONLY this JSON (no explanation, no additional text):
{
  "exclusions_apply": false,
  "applicable_exclusions": [],
  "coverage_reason": "short customer-facing reason",
  "confidence": 0.9
}
"#;

const KEYWORD_HIT_CONFIDENCE: f32 = 0.8;
const KEYWORD_CLEAR_CONFIDENCE: f32 = 0.6;

/// Builds the final decision once the applicable exclusions are known.
fn decide(
    applicable: Vec<ExclusionTag>,
    problem_type: &str,
    policy: &Policy,
    reason: Option<String>,
    confidence: f32,
) -> ClarificationResolution {
    if !applicable.is_empty() {
        return ClarificationResolution {
            exclusions_apply: true,
            applicable_exclusions: applicable,
            is_covered: false,
            coverage_reason: reason.unwrap_or_else(|| {
                "Based on the details you shared, this situation falls outside your policy's roadside cover.".to_string()
            }),
            confidence,
        };
    }

    let (is_covered, table_reason) = policy.coverage_for(problem_type);
    ClarificationResolution {
        exclusions_apply: false,
        applicable_exclusions: Vec::new(),
        is_covered,
        coverage_reason: if is_covered {
            reason.unwrap_or(table_reason)
        } else {
            table_reason
        },
        confidence,
    }
}

/// Conservative fallback: any indicator word for a raised tag applies that tag.
pub fn keyword_resolution(
    reply: &str,
    potential_exclusions: &[ExclusionTag],
    problem_type: &str,
    policy: &Policy,
) -> ClarificationResolution {
    let applicable: Vec<ExclusionTag> = potential_exclusions
        .iter()
        .copied()
        .filter(|tag| mentions_indicator(*tag, reply))
        .collect();
    let confidence = if applicable.is_empty() {
        KEYWORD_CLEAR_CONFIDENCE
    } else {
        KEYWORD_HIT_CONFIDENCE
    };
    decide(applicable, problem_type, policy, None, confidence)
}

#[derive(Deserialize)]
struct GeneratedResolution {
    #[serde(default)]
    applicable_exclusions: Vec<ExclusionTag>,
    #[serde(default)]
    coverage_reason: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Decides, from the customer's answer to a clarification question, whether a
/// suspected exclusion applies.
pub struct ClarificationResolver {
    generator: Arc<dyn TextGenerator>,
    policy: Policy,
}

impl ClarificationResolver {
    pub fn new(generator: Arc<dyn TextGenerator>, policy: Policy) -> Self {
        Self { generator, policy }
    }

    pub async fn resolve(
        &self,
        reply: &str,
        potential_exclusions: &[ExclusionTag],
        problem_type: &str,
    ) -> ClarificationResolution {
        let resolution = match self
            .resolve_with_generator(reply, potential_exclusions, problem_type)
            .await
        {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(error = %e, "Clarification falling back to keyword scan");
                keyword_resolution(reply, potential_exclusions, problem_type, &self.policy)
            }
        };

        info!(
            problem_type = %problem_type,
            exclusions_apply = resolution.exclusions_apply,
            is_covered = resolution.is_covered,
            confidence = resolution.confidence,
            "Clarification resolved"
        );
        resolution
    }

    async fn resolve_with_generator(
        &self,
        reply: &str,
        potential_exclusions: &[ExclusionTag],
        problem_type: &str,
    ) -> Result<ClarificationResolution, GenerationError> {
        let exclusions = serde_json::to_string(potential_exclusions)
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        let instructions = CLARIFICATION_PROMPT.replace("{exclusions}", &exclusions);
        let input = format!("Problem type: {problem_type}\nCustomer answer: {reply}");

        let raw = self.generator.generate(&instructions, &input).await?;
        let generated: GeneratedResolution = parse_structured(&raw)?;

        // Only tags that were actually raised can apply.
        let applicable: Vec<ExclusionTag> = generated
            .applicable_exclusions
            .into_iter()
            .filter(|tag| potential_exclusions.contains(tag))
            .collect();
        let confidence = generated.confidence.unwrap_or(0.5).clamp(0.0, 1.0);

        Ok(decide(
            applicable,
            problem_type,
            &self.policy,
            generated.coverage_reason,
            confidence,
        ))
    }
}
