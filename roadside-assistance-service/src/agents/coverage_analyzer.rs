use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

use crate::models::{ExclusionTag, Policy, ProblemAnalysis, ServiceKind, problem_types};

use super::llm::{GenerationError, TextGenerator, parse_structured};

const COVERAGE_ANALYSIS_PROMPT: &str = r#"You are a roadside assistance coverage analyst for an insurance company.

Classify the customer's problem and check it against the policy below.

POLICY COVERAGE TABLE:
{coverage}

POLICY EXCLUSIONS:
{exclusions}

PROBLEM TYPES (use exactly one):
"flat tire", "battery issue", "lockout", "fuel delivery", "breakdown requiring tow", "general roadside assistance"

If the description hints that an exclusion MIGHT apply, do not decide and never mention the exclusion.
Set "needs_clarification" to true, list the suspected exclusion tags, and write one tactful, neutral
question per suspected exclusion that lets the customer describe their situation.

Respond with ONLY this JSON (no explanation, no additional text):
{
  "problem_type": "flat tire",
  "needs_clarification": false,
  "clarification_questions": null,
  "potential_exclusions": null,
  "is_covered": true,
  "coverage_reason": "short customer-facing reason",
  "suggested_service": "flat_tire_service"
}
"#;

/// Words that hint an exclusion might apply, per exclusion tag.
pub const EXCLUSION_INDICATORS: [(ExclusionTag, &[&str]); 3] = [
    (
        ExclusionTag::OffRoadUse,
        &[
            "trail", "dirt", "mud", "forest", "mountain", "desert", "beach", "sand", "creek",
            "river",
        ],
    ),
    (
        ExclusionTag::CommercialUse,
        &["delivery", "work", "business", "commercial", "company", "job"],
    ),
    (
        ExclusionTag::RacingEvents,
        &["race", "track", "event", "competition", "racing", "speed"],
    ),
];

// Indicators match at the start of a word, so "trails" and "working" count but
// "network" does not.
static INDICATOR_PATTERNS: LazyLock<Vec<(ExclusionTag, Regex)>> = LazyLock::new(|| {
    EXCLUSION_INDICATORS
        .iter()
        .filter_map(|(tag, words)| {
            let pattern = format!(r"(?i)\b(?:{})", words.join("|"));
            Regex::new(&pattern).ok().map(|re| (*tag, re))
        })
        .collect()
});

/// Whether `text` contains one of the indicator words for `tag`.
pub fn mentions_indicator(tag: ExclusionTag, text: &str) -> bool {
    INDICATOR_PATTERNS
        .iter()
        .any(|(indicator_tag, pattern)| *indicator_tag == tag && pattern.is_match(text))
}

/// Exclusion tags whose indicator words appear in `text`, in tag order.
pub fn detect_exclusions(text: &str) -> Vec<ExclusionTag> {
    INDICATOR_PATTERNS
        .iter()
        .filter(|(_, pattern)| pattern.is_match(text))
        .map(|(tag, _)| *tag)
        .collect()
}

/// Tactful follow-up for a suspected exclusion. Never names the exclusion.
pub fn clarification_question(tag: ExclusionTag) -> &'static str {
    match tag {
        ExclusionTag::OffRoadUse => {
            "So we can send the right vehicle, could you describe the surface your car is on right now? For example, is it a paved public road?"
        }
        ExclusionTag::CommercialUse => {
            "Could you tell me a little about the trip you were on when this happened? For example, was it a personal journey or something else?"
        }
        ExclusionTag::RacingEvents => {
            "Could you tell me what you were doing just before this happened and where the car was being driven?"
        }
    }
}

/// Keyword classification of the problem type. First matching group wins.
pub fn classify_problem(description: &str) -> &'static str {
    let text = description.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|word| text.contains(word));

    if mentions(&["flat", "tire", "tyre", "puncture", "wheel"]) {
        problem_types::FLAT_TIRE
    } else if mentions(&["battery", "dead", "won't start", "wont start", "no start"]) {
        problem_types::BATTERY_ISSUE
    } else if mentions(&["locked", "keys", "lock"]) {
        problem_types::LOCKOUT
    } else if mentions(&["fuel", "gas", "petrol", "empty"]) {
        problem_types::FUEL_DELIVERY
    } else if mentions(&["engine", "breakdown", "broken", "tow"]) {
        problem_types::BREAKDOWN_TOW
    } else {
        problem_types::GENERAL
    }
}

/// Deterministic analysis used whenever the generation service cannot answer.
pub fn keyword_analysis(description: &str, location: Option<&str>, policy: &Policy) -> ProblemAnalysis {
    let problem_type = classify_problem(description);
    let suggested_service = ServiceKind::for_problem(problem_type).map(|s| s.key().to_string());

    let scanned = match location {
        Some(location) => format!("{description} {location}"),
        None => description.to_string(),
    };
    let exclusions: Vec<ExclusionTag> = detect_exclusions(&scanned)
        .into_iter()
        .filter(|tag| policy.excludes(*tag))
        .collect();

    if !exclusions.is_empty() {
        let questions = exclusions
            .iter()
            .map(|tag| clarification_question(*tag).to_string())
            .collect();
        return ProblemAnalysis {
            problem_type: problem_type.to_string(),
            needs_clarification: true,
            clarification_questions: Some(questions),
            potential_exclusions: Some(exclusions),
            is_covered: None,
            coverage_reason: "A few more details are needed to confirm coverage.".to_string(),
            suggested_service,
        };
    }

    let (is_covered, coverage_reason) = policy.coverage_for(problem_type);
    ProblemAnalysis {
        problem_type: problem_type.to_string(),
        needs_clarification: false,
        clarification_questions: None,
        potential_exclusions: None,
        is_covered: Some(is_covered),
        coverage_reason,
        suggested_service,
    }
}

#[derive(Deserialize)]
struct GeneratedAnalysis {
    problem_type: String,
    #[serde(default)]
    needs_clarification: bool,
    #[serde(default)]
    clarification_questions: Option<Vec<String>>,
    #[serde(default)]
    potential_exclusions: Option<Vec<ExclusionTag>>,
    #[serde(default)]
    is_covered: Option<bool>,
    #[serde(default)]
    coverage_reason: Option<String>,
    #[serde(default)]
    suggested_service: Option<String>,
}

/// Classifies a problem description and flags possible policy exclusions.
pub struct CoverageAnalyzer {
    generator: Arc<dyn TextGenerator>,
    policy: Policy,
}

impl CoverageAnalyzer {
    pub fn new(generator: Arc<dyn TextGenerator>, policy: Policy) -> Self {
        Self { generator, policy }
    }

    pub async fn analyze(&self, description: &str, location: Option<&str>) -> ProblemAnalysis {
        match self.analyze_with_generator(description, location).await {
            Ok(analysis) => {
                info!(
                    problem_type = %analysis.problem_type,
                    needs_clarification = analysis.needs_clarification,
                    "Coverage analysis from generation service"
                );
                analysis
            }
            Err(e) => {
                warn!(error = %e, "Coverage analysis falling back to keyword classifier");
                let analysis = keyword_analysis(description, location, &self.policy);
                info!(
                    problem_type = %analysis.problem_type,
                    needs_clarification = analysis.needs_clarification,
                    is_covered = ?analysis.is_covered,
                    "Keyword coverage analysis"
                );
                analysis
            }
        }
    }

    async fn analyze_with_generator(
        &self,
        description: &str,
        location: Option<&str>,
    ) -> Result<ProblemAnalysis, GenerationError> {
        let coverage = serde_json::to_string_pretty(&self.policy.roadside_assistance)
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        let exclusions = json!(self.policy.exclusions).to_string();
        let instructions = COVERAGE_ANALYSIS_PROMPT
            .replace("{coverage}", &coverage)
            .replace("{exclusions}", &exclusions);

        let input = match location {
            Some(location) => format!("Problem: {description}\nLocation: {location}"),
            None => format!("Problem: {description}"),
        };

        let raw = self.generator.generate(&instructions, &input).await?;
        let generated: GeneratedAnalysis = parse_structured(&raw)?;
        self.sanitize(generated)
    }

    /// Keeps a generated analysis consistent with the policy. Labels outside
    /// the known problem types, or a clarification request with no exclusion
    /// the policy lists, reject the payload. Settled coverage comes from the
    /// static table.
    fn sanitize(&self, generated: GeneratedAnalysis) -> Result<ProblemAnalysis, GenerationError> {
        let exclusions: Vec<ExclusionTag> = generated
            .potential_exclusions
            .unwrap_or_default()
            .into_iter()
            .filter(|tag| self.policy.excludes(*tag))
            .collect();
        let problem_type = generated.problem_type.trim().to_lowercase();
        if !problem_types::ALL.contains(&problem_type.as_str()) {
            return Err(GenerationError::Malformed(format!(
                "unknown problem type {problem_type:?}"
            )));
        }

        if generated.needs_clarification {
            if exclusions.is_empty() {
                return Err(GenerationError::Malformed(
                    "clarification requested without a policy exclusion".to_string(),
                ));
            }
            let questions = generated
                .clarification_questions
                .filter(|questions| !questions.is_empty())
                .unwrap_or_else(|| {
                    exclusions
                        .iter()
                        .map(|tag| clarification_question(*tag).to_string())
                        .collect()
                });
            return Ok(ProblemAnalysis {
                problem_type,
                needs_clarification: true,
                clarification_questions: Some(questions),
                potential_exclusions: Some(exclusions),
                is_covered: None,
                coverage_reason: generated.coverage_reason.unwrap_or_else(|| {
                    "A few more details are needed to confirm coverage.".to_string()
                }),
                suggested_service: generated.suggested_service,
            });
        }

        let (table_covered, table_reason) = self.policy.coverage_for(&problem_type);
        let is_covered = generated.is_covered.unwrap_or(table_covered) && table_covered;
        Ok(ProblemAnalysis {
            problem_type,
            needs_clarification: false,
            clarification_questions: None,
            potential_exclusions: None,
            is_covered: Some(is_covered),
            coverage_reason: if is_covered == table_covered {
                table_reason
            } else {
                generated.coverage_reason.unwrap_or(table_reason)
            },
            suggested_service: generated.suggested_service,
        })
    }
}
