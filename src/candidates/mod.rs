use std::sync::Arc;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::{
    dataset::LabeledExample,
    evaluator::{Evaluator, PromptConfig},
    llm_client::{InferenceGateway, ModelRole},
    store::{Demonstration, Provenance},
};

const TEACHER_MAX_TOKENS: u16 = 192;
const FAILURE_EXAMPLE_LIMIT: usize = 8;
/// Bound on how many pool examples one bootstrapped subset may try.
const BOOTSTRAP_OVERSAMPLE: usize = 4;

/// Ephemeral output of one teacher-generation call. Never persisted; the
/// search controller combines and evaluates it within a single round.
#[derive(Debug, Clone)]
pub(crate) struct CandidateSet {
    pub(crate) instructions: Vec<String>,
    pub(crate) demo_sets: Vec<Vec<Demonstration>>,
    /// True when the teacher model could not be reached and only fallback
    /// (seed-derived) candidates are present.
    pub(crate) degraded: bool,
}

pub(crate) struct CandidateGenerator {
    gateway: Arc<InferenceGateway>,
}

impl CandidateGenerator {
    pub(crate) fn new(gateway: Arc<InferenceGateway>) -> Self {
        Self { gateway }
    }

    /// Proposes `k_instructions` instruction variants and `k_demo_sets`
    /// demonstration subsets for the current program. Teacher calls run
    /// sequentially and retry transient failures with backoff; once retries
    /// are exhausted the set degrades to seed-only candidates instead of
    /// aborting. Sampling is driven entirely by `seed`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn propose(
        &self,
        evaluator: &Evaluator,
        current: &PromptConfig,
        failing_examples: &[LabeledExample],
        train_pool: &[LabeledExample],
        k_instructions: usize,
        k_demo_sets: usize,
        max_demos: usize,
        seed: u64,
    ) -> CandidateSet {
        let mut instructions = Vec::with_capacity(k_instructions);
        for variant in 0..k_instructions {
            let prompt = self.instruction_prompt(
                current,
                failing_examples,
                evaluator.labels(),
                variant + 1,
                k_instructions,
            );
            match self
                .gateway
                .complete_with_retry(&prompt, ModelRole::Teacher, TEACHER_MAX_TOKENS)
                .await
            {
                Ok(completion) => {
                    let instruction = completion.trim().trim_matches('"').trim().to_string();
                    if !instruction.is_empty() && !instructions.contains(&instruction) {
                        instructions.push(instruction);
                    }
                }
                Err(e) => {
                    log::warn!("Teacher rejected instruction variant {}: {e}", variant + 1);
                }
            }
        }

        let mut demo_sets = Vec::with_capacity(k_demo_sets);
        for set_index in 0..k_demo_sets {
            let set_seed = seed.wrapping_add(set_index as u64 + 1);
            demo_sets.push(
                self.bootstrap_demo_set(evaluator, current, train_pool, max_demos, set_seed)
                    .await,
            );
        }

        let degraded = instructions.is_empty();
        if degraded {
            log::warn!(
                "Teacher candidate generation degraded; continuing with seed-only candidates"
            );
            instructions.push(current.instruction.clone());
        }

        CandidateSet {
            instructions,
            demo_sets,
            degraded,
        }
    }

    /// Bootstrapped few-shot selection: sample from the train pool, keep only
    /// examples the current program already classifies correctly (with the
    /// model's own reasoning attached), and fill any shortfall with plain
    /// labeled examples.
    async fn bootstrap_demo_set(
        &self,
        evaluator: &Evaluator,
        current: &PromptConfig,
        train_pool: &[LabeledExample],
        max_demos: usize,
        seed: u64,
    ) -> Vec<Demonstration> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order = (0..train_pool.len()).collect::<Vec<_>>();
        order.shuffle(&mut rng);

        let mut demos: Vec<Demonstration> = Vec::with_capacity(max_demos);
        for index in order.iter().take(max_demos * BOOTSTRAP_OVERSAMPLE) {
            if demos.len() == max_demos {
                break;
            }
            let example = &train_pool[*index];
            match evaluator.predict(current, &example.text).await {
                Ok(prediction) if prediction.label.as_deref() == Some(example.label.as_str()) => {
                    demos.push(Demonstration {
                        input: example.text.clone(),
                        label: example.label.clone(),
                        provenance: Provenance::Bootstrapped,
                        reasoning: prediction.reasoning,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    log::debug!("Skipping bootstrap example after inference failure: {e}");
                }
            }
        }

        // Shortfall is made up from the labeled pool as-is.
        for index in order {
            if demos.len() == max_demos {
                break;
            }
            let example = &train_pool[index];
            if demos.iter().any(|d| d.input == example.text) {
                continue;
            }
            demos.push(Demonstration {
                input: example.text.clone(),
                label: example.label.clone(),
                provenance: Provenance::Seed,
                reasoning: None,
            });
        }

        demos
    }

    fn instruction_prompt(
        &self,
        current: &PromptConfig,
        failing_examples: &[LabeledExample],
        labels: &[String],
        variant: usize,
        total: usize,
    ) -> String {
        let mut prompt = String::from(
            "You write instructions for a text classification prompt. \
             The classifier assigns one of these labels to a customer query:\n",
        );
        prompt.push_str(&labels.join(", "));
        prompt.push_str("\n\nCurrent instruction:\n");
        prompt.push_str(&current.instruction);
        prompt.push('\n');

        if failing_examples.is_empty() {
            prompt.push_str(
                "\nNo misclassified examples are available; propose an exploratory rewording.\n",
            );
        } else {
            prompt.push_str("\nThe current prompt misclassified these examples:\n");
            for example in failing_examples.iter().take(FAILURE_EXAMPLE_LIMIT) {
                prompt.push_str("Text: ");
                prompt.push_str(&example.text);
                prompt.push_str("\nCorrect label: ");
                prompt.push_str(&example.label);
                prompt.push('\n');
            }
        }

        prompt.push_str(&format!(
            "\nPropose improved instruction variant {variant} of {total}. Make it specific \
             about how to choose between easily confused labels. Reply with the new \
             instruction only."
        ));
        prompt
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_data::{
        failing_gateway, scripted_gateway, seed_examples, seed_labels, ScriptedClient,
    };

    fn current_config() -> PromptConfig {
        PromptConfig {
            instruction: "Given the fields `text`, produce the fields `label`.".to_string(),
            demonstrations: vec![],
        }
    }

    #[tokio::test]
    async fn bootstrapped_demos_keep_only_correct_answers_with_reasoning() {
        let pool = seed_examples();
        let mut script = ScriptedClient::default();
        script.respond_containing(
            "instruction variant",
            "Read the query carefully and pick the single best matching intent label.",
        );
        for example in &pool {
            // Only cancel_transfer examples classify correctly; everything
            // else answers a label wrong for that example.
            if example.label == "cancel_transfer" {
                script.respond_containing(
                    &example.text,
                    &format!("Reasoning: the user wants to stop it.\nLabel: {}", example.label),
                );
            } else {
                let wrong = if example.label == "card_arrival" {
                    "visa_or_mastercard"
                } else {
                    "card_arrival"
                };
                script.respond_containing(&example.text, &format!("Label: {wrong}"));
            }
        }

        let gateway = scripted_gateway(&script);
        let evaluator = Evaluator::new(gateway.clone(), seed_labels(), 1);
        let set = CandidateGenerator::new(gateway)
            .propose(&evaluator, &current_config(), &[], &pool, 2, 2, 3, 0)
            .await;

        assert!(!set.degraded);
        assert_eq!(set.demo_sets.len(), 2);
        for demos in &set.demo_sets {
            assert_eq!(demos.len(), 3);
            for demo in demos {
                match demo.provenance {
                    Provenance::Bootstrapped => {
                        assert_eq!(demo.label, "cancel_transfer");
                        assert!(demo.reasoning.is_some());
                    }
                    Provenance::Seed => assert!(demo.reasoning.is_none()),
                    Provenance::Feedback => panic!("no feedback in the pool"),
                }
            }
        }
    }

    #[tokio::test]
    async fn proposal_is_deterministic_for_a_fixed_seed() {
        let pool = seed_examples();
        let mut script = ScriptedClient::default();
        script.respond_default("Label: cancel_transfer");
        script.respond_containing("instruction variant", "Pick the closest banking intent.");

        let gateway = scripted_gateway(&script);
        let evaluator = Evaluator::new(gateway.clone(), seed_labels(), 1);
        let generator = CandidateGenerator::new(gateway);

        let a = generator
            .propose(&evaluator, &current_config(), &[], &pool, 1, 3, 2, 7)
            .await;
        let b = generator
            .propose(&evaluator, &current_config(), &[], &pool, 1, 3, 2, 7)
            .await;
        assert_eq!(a.instructions, b.instructions);
        assert_eq!(a.demo_sets, b.demo_sets);
    }

    #[tokio::test]
    async fn generation_degrades_to_seed_candidates_when_the_gateway_only_errors() {
        let pool = seed_examples();
        let gateway = failing_gateway();
        let evaluator = Evaluator::new(gateway.clone(), seed_labels(), 1);

        let set = CandidateGenerator::new(gateway)
            .propose(&evaluator, &current_config(), &[], &pool, 2, 2, 3, 0)
            .await;

        assert!(set.degraded);
        assert_eq!(set.instructions, vec![current_config().instruction]);
        for demos in &set.demo_sets {
            assert_eq!(demos.len(), 3);
            assert!(demos.iter().all(|d| d.provenance == Provenance::Seed));
        }
    }
}
