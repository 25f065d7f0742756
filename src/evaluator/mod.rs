use std::sync::Arc;

use futures::{stream, StreamExt};

use crate::{
    dataset::LabeledExample,
    llm_client::{InferenceGateway, LlmClientError, ModelRole},
    store::{Demonstration, Program},
};

const MAX_COMPLETION_TOKENS: u16 = 256;

/// The (instruction, demonstrations) content of a program, detached from
/// version metadata so unsaved candidates evaluate exactly like stored ones.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PromptConfig {
    pub(crate) instruction: String,
    pub(crate) demonstrations: Vec<Demonstration>,
}

impl PromptConfig {
    pub(crate) fn from_program(program: &Program) -> Self {
        Self {
            instruction: program.instruction.clone(),
            demonstrations: program.demonstrations.clone(),
        }
    }

    /// Content identity, used as the run-scoped evaluation cache key.
    pub(crate) fn fingerprint(&self) -> String {
        let mut key = self.instruction.clone();
        for demo in &self.demonstrations {
            key.push('\u{1f}');
            key.push_str(&demo.input);
            key.push('\u{1e}');
            key.push_str(&demo.label);
        }
        key
    }

    /// Cost proxy for tie-breaking: demonstration bulk first, then
    /// instruction length. Cheaper configurations win ties.
    pub(crate) fn cost(&self) -> (usize, usize) {
        let demo_chars = self
            .demonstrations
            .iter()
            .map(|d| d.input.len() + d.label.len() + d.reasoning.as_deref().map_or(0, str::len))
            .sum();
        (demo_chars, self.instruction.len())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Prediction {
    pub(crate) label: Option<String>,
    pub(crate) reasoning: Option<String>,
    pub(crate) raw: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EvaluationResult {
    pub(crate) fingerprint: String,
    pub(crate) split: String,
    pub(crate) score: f64,
    pub(crate) trace: Vec<bool>,
}

pub(crate) struct Evaluator {
    gateway: Arc<InferenceGateway>,
    labels: Vec<String>,
    concurrency: usize,
}

impl Evaluator {
    pub(crate) fn new(gateway: Arc<InferenceGateway>, labels: Vec<String>, concurrency: usize) -> Self {
        Self {
            gateway,
            labels,
            concurrency: concurrency.max(1),
        }
    }

    pub(crate) fn labels(&self) -> &[String] {
        &self.labels
    }

    pub(crate) async fn predict(
        &self,
        config: &PromptConfig,
        text: &str,
    ) -> Result<Prediction, LlmClientError> {
        let prompt = render_prompt(config, &self.labels, text);
        let raw = self
            .gateway
            .complete_with_retry(&prompt, ModelRole::Student, MAX_COMPLETION_TOKENS)
            .await?;
        Ok(Prediction {
            label: parse_label(&raw, &self.labels),
            reasoning: extract_reasoning(&raw),
            raw,
        })
    }

    /// Scores a configuration against an example set. Per-example failures
    /// (unparseable labels, exhausted retries) count as incorrect and never
    /// abort the evaluation. Results are reassembled in example order, so the
    /// score does not depend on completion order or the concurrency limit.
    pub(crate) async fn evaluate(
        &self,
        config: &PromptConfig,
        examples: &[LabeledExample],
        split: &str,
    ) -> EvaluationResult {
        let trace = stream::iter(examples.iter().map(|example| async move {
            match self.predict(config, &example.text).await {
                Ok(prediction) => prediction.label.as_deref() == Some(example.label.as_str()),
                Err(e) => {
                    log::warn!("Scoring example as incorrect after inference failure: {e}");
                    false
                }
            }
        }))
        .buffered(self.concurrency)
        .collect::<Vec<bool>>()
        .await;

        let score = if trace.is_empty() {
            0.0
        } else {
            trace.iter().filter(|c| **c).count() as f64 / trace.len() as f64
        };

        EvaluationResult {
            fingerprint: config.fingerprint(),
            split: split.to_string(),
            score,
            trace,
        }
    }
}

pub(crate) fn render_prompt(config: &PromptConfig, labels: &[String], input: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(&config.instruction);
    prompt.push_str("\n\nRespond with a line `Label: <label>` where <label> is exactly one of:\n");
    prompt.push_str(&labels.join(", "));
    prompt.push('\n');

    for demo in &config.demonstrations {
        prompt.push_str("\nText: ");
        prompt.push_str(&demo.input);
        if let Some(reasoning) = &demo.reasoning {
            prompt.push_str("\nReasoning: ");
            prompt.push_str(reasoning);
        }
        prompt.push_str("\nLabel: ");
        prompt.push_str(&demo.label);
        prompt.push('\n');
    }

    prompt.push_str("\nText: ");
    prompt.push_str(input);
    prompt.push_str("\nReasoning:");
    prompt
}

/// Strict parse rule: the completion must contain exactly one known label
/// token. Matches that are substrings of a longer match are discarded first,
/// so `transfer` does not conflict with `cancel_transfer`. Zero or several
/// surviving matches yield no label.
pub(crate) fn parse_label(completion: &str, labels: &[String]) -> Option<String> {
    let matched = labels
        .iter()
        .map(String::as_str)
        .filter(|label| completion.contains(*label))
        .collect::<Vec<&str>>();

    let mut distinct = matched
        .iter()
        .copied()
        .filter(|label| {
            !matched
                .iter()
                .any(|other| other != label && other.contains(*label))
        })
        .collect::<Vec<&str>>();

    match (distinct.len(), distinct.pop()) {
        (1, Some(label)) => Some(label.to_string()),
        _ => None,
    }
}

fn extract_reasoning(completion: &str) -> Option<String> {
    let before_label = completion.split("Label:").next()?;
    let reasoning = before_label
        .trim()
        .trim_start_matches("Reasoning:")
        .trim();
    if reasoning.is_empty() {
        None
    } else {
        Some(reasoning.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_data::{scripted_gateway, seed_examples, seed_labels, ScriptedClient};

    fn bare_config(instruction: &str) -> PromptConfig {
        PromptConfig {
            instruction: instruction.to_string(),
            demonstrations: vec![],
        }
    }

    #[test]
    fn parse_requires_exactly_one_label() {
        let labels = seed_labels();
        assert_eq!(
            parse_label("Reasoning: pending.\nLabel: cancel_transfer", &labels),
            Some("cancel_transfer".to_string())
        );
        assert_eq!(parse_label("no label here", &labels), None);
        assert_eq!(
            parse_label("Label: cancel_transfer or declined_card_payment", &labels),
            None
        );
    }

    #[test]
    fn parse_prefers_the_longest_containing_match() {
        let labels = vec!["transfer".to_string(), "cancel_transfer".to_string()];
        assert_eq!(
            parse_label("Label: cancel_transfer", &labels),
            Some("cancel_transfer".to_string())
        );
    }

    #[test]
    fn rendered_prompt_carries_demonstrations_in_order() {
        let config = PromptConfig {
            instruction: "Classify the query.".to_string(),
            demonstrations: vec![
                Demonstration {
                    input: "first".to_string(),
                    label: "card_arrival".to_string(),
                    provenance: crate::store::Provenance::Seed,
                    reasoning: None,
                },
                Demonstration {
                    input: "second".to_string(),
                    label: "cancel_transfer".to_string(),
                    provenance: crate::store::Provenance::Bootstrapped,
                    reasoning: Some("because".to_string()),
                },
            ],
        };
        let prompt = render_prompt(&config, &seed_labels(), "query");
        let first = prompt.find("Text: first").unwrap();
        let second = prompt.find("Text: second").unwrap();
        assert!(first < second);
        assert!(prompt.contains("Reasoning: because"));
        assert!(prompt.ends_with("Text: query\nReasoning:"));
    }

    #[tokio::test]
    async fn evaluation_is_idempotent_and_concurrency_independent() {
        let examples = seed_examples();
        let mut script = ScriptedClient::default();
        for example in &examples {
            // Only the cancel_transfer slice of the pool answers correctly.
            let answer = if example.label == "cancel_transfer" {
                example.label.clone()
            } else {
                "visa_or_mastercard".to_string()
            };
            script.respond_containing(&example.text, &format!("Label: {answer}"));
        }

        let config = bare_config("Classify the query.");
        let serial = Evaluator::new(scripted_gateway(&script), seed_labels(), 1)
            .evaluate(&config, &examples, "dev")
            .await;
        let concurrent = Evaluator::new(scripted_gateway(&script), seed_labels(), 8)
            .evaluate(&config, &examples, "dev")
            .await;
        let again = Evaluator::new(scripted_gateway(&script), seed_labels(), 8)
            .evaluate(&config, &examples, "dev")
            .await;

        assert_eq!(serial, concurrent);
        assert_eq!(concurrent, again);
        assert!(serial.score > 0.0 && serial.score < 1.0);
        assert_eq!(serial.trace.len(), examples.len());
    }

    #[tokio::test]
    async fn unparseable_completion_scores_incorrect_without_aborting() {
        let examples = seed_examples().into_iter().take(2).collect::<Vec<_>>();
        let mut script = ScriptedClient::default();
        script.respond_containing(&examples[0].text, &format!("Label: {}", examples[0].label));
        script.respond_containing(&examples[1].text, "I am not sure at all.");

        let result = Evaluator::new(scripted_gateway(&script), seed_labels(), 2)
            .evaluate(&bare_config("Classify."), &examples, "dev")
            .await;
        assert_eq!(result.trace, vec![true, false]);
        assert_eq!(result.score, 0.5);
    }
}
