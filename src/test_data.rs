use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::{
    dataset::{label_inventory, LabeledExample},
    llm_client::{CompletionBackend, CompletionClientImpl, InferenceGateway, LlmClientError},
};

#[derive(Clone)]
struct Rule {
    keys: Vec<String>,
    completion: String,
}

/// Deterministic stand-in for both gateway backends. Rules are tried in
/// insertion order; a rule fires when its first key appears in the match
/// target and every remaining key appears anywhere in the prompt.
#[derive(Clone, Default)]
pub(crate) struct ScriptedClient {
    rules: Vec<Rule>,
    default_response: Option<String>,
    fail_all_transient: bool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedClient {
    pub(crate) fn respond_containing(&mut self, key: &str, completion: &str) {
        self.rules.push(Rule {
            keys: vec![key.to_string()],
            completion: completion.to_string(),
        });
    }

    pub(crate) fn respond_when_all(&mut self, keys: &[&str], completion: &str) {
        assert!(!keys.is_empty());
        self.rules.push(Rule {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            completion: completion.to_string(),
        });
    }

    pub(crate) fn respond_default(&mut self, completion: &str) {
        self.default_response = Some(completion.to_string());
    }

    /// Total completions requested across every clone of this script.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CompletionBackend for ScriptedClient {
    async fn get_response(&self, prompt: &str, _max_tokens: u16) -> Result<String, LlmClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all_transient {
            return Err(LlmClientError::RateLimited);
        }
        let target = match_target(prompt);
        for rule in &self.rules {
            let (first, rest) = rule.keys.split_first().expect("rules have keys");
            if target.contains(first.as_str()) && rest.iter().all(|key| prompt.contains(key.as_str()))
            {
                return Ok(rule.completion.clone());
            }
        }
        match &self.default_response {
            Some(completion) => Ok(completion.clone()),
            None => Err(LlmClientError::EmptyResponse),
        }
    }
}

/// Classification prompts end with `Text: ..\nReasoning:`; matching the first
/// key against that final block keeps demonstrations embedded earlier in the
/// prompt from hijacking the scripted answer.
fn match_target(prompt: &str) -> &str {
    if prompt.trim_end().ends_with("Reasoning:") {
        match prompt.rfind("\nText: ") {
            Some(index) => &prompt[index..],
            None => prompt,
        }
    } else {
        prompt
    }
}

pub(crate) fn scripted_gateway(script: &ScriptedClient) -> Arc<InferenceGateway> {
    Arc::new(InferenceGateway::new(
        CompletionClientImpl::Scripted(script.clone()),
        CompletionClientImpl::Scripted(script.clone()),
    ))
}

/// A gateway whose every call fails with a transient (retryable) error.
pub(crate) fn failing_gateway() -> Arc<InferenceGateway> {
    let script = ScriptedClient {
        fail_all_transient: true,
        ..ScriptedClient::default()
    };
    scripted_gateway(&script)
}

pub(crate) async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite")
}

pub(crate) fn seed_labels() -> Vec<String> {
    label_inventory(&seed_examples())
}

pub(crate) fn seed_examples() -> Vec<LabeledExample> {
    [
        ("I sent money to the wrong account, please cancel the transfer", "cancel_transfer"),
        ("Can you stop the transfer I just made?", "cancel_transfer"),
        ("I want to cancel a transfer that is still pending", "cancel_transfer"),
        ("My card payment was declined at the supermarket", "declined_card_payment"),
        ("Why did my card get declined this morning?", "declined_card_payment"),
        ("The terminal rejected my card payment twice", "declined_card_payment"),
        ("When will my new card arrive?", "card_arrival"),
        ("I ordered a card two weeks ago and it has not arrived", "card_arrival"),
        ("How long does card delivery usually take?", "card_arrival"),
        ("Do you offer Visa or Mastercard?", "visa_or_mastercard"),
        ("Can I choose between Visa and Mastercard for my new card?", "visa_or_mastercard"),
        ("Which card network does the bank support?", "visa_or_mastercard"),
    ]
    .into_iter()
    .map(|(text, label)| LabeledExample {
        text: text.to_string(),
        label: label.to_string(),
    })
    .collect()
}
