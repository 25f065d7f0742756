use std::{cmp::Ordering, collections::HashMap};

use futures::{stream, StreamExt};
use indicatif::{MultiProgress, ProgressBar};

use crate::{
    candidates::CandidateGenerator,
    dataset::{LabeledExample, Pools},
    evaluator::{EvaluationResult, Evaluator, PromptConfig},
    feedback::FeedbackStore,
    store::{Demonstration, ProgramStore},
};

use super::{CancellationFlag, OptimizeError, OptimizeOutcome, OptimizeStatus, SearchParams};

const FULL_SPLIT: &str = "full";

/// One configuration in flight through the halving rounds. `order` is the
/// generation order (baseline is 0) and the final tie-break key.
struct Candidate {
    order: usize,
    config: PromptConfig,
    last: Option<EvaluationResult>,
}

pub(crate) struct Engine {
    store: ProgramStore,
    feedback: FeedbackStore,
    evaluator: Evaluator,
    generator: CandidateGenerator,
    concurrency: usize,
    progress: Option<MultiProgress>,
}

impl Engine {
    pub(crate) fn new(
        store: ProgramStore,
        feedback: FeedbackStore,
        evaluator: Evaluator,
        generator: CandidateGenerator,
        concurrency: usize,
        progress: Option<MultiProgress>,
    ) -> Self {
        Self {
            store,
            feedback,
            evaluator,
            generator,
            concurrency: concurrency.max(1),
            progress,
        }
    }

    pub(crate) fn store(&self) -> &ProgramStore {
        &self.store
    }

    pub(crate) fn feedback(&self) -> &FeedbackStore {
        &self.feedback
    }

    pub(crate) fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Successive-halving search for a configuration that beats the base
    /// program within `params.budget` evaluation trials. Always persists the
    /// resulting program (audit record) and always returns an outcome.
    pub(crate) async fn optimize(
        &self,
        base_program_id: i64,
        pools: Pools,
        params: SearchParams,
        include_feedback: bool,
        cancel: &CancellationFlag,
    ) -> Result<OptimizeOutcome, OptimizeError> {
        let base = self.store.get(base_program_id).await?;
        let baseline = PromptConfig::from_program(&base);

        let Pools {
            mut train,
            mut validation,
        } = pools;

        // A run that can perform no trial exits here, before any feedback is
        // claimed: a record's consumed flag is never unset, so claiming one
        // and then dropping it would lose the correction for good.
        if params.budget == 0 || cancel.is_cancelled() {
            let status = if params.budget == 0 {
                OptimizeStatus::NoImprovement
            } else {
                OptimizeStatus::Cancelled
            };
            let audit = self
                .store
                .create(
                    &baseline.instruction,
                    &baseline.demonstrations,
                    Some(base.id),
                    base.score,
                )
                .await?;
            return Ok(OptimizeOutcome {
                program_id: audit.id,
                score: base.score.unwrap_or(0.0),
                status,
                degraded: false,
                trials_used: 0,
            });
        }

        // User corrections are claimed exactly once and pushed into both
        // pools so the next program is searched and judged against them.
        let mut feedback_demos: Vec<Demonstration> = vec![];
        if include_feedback {
            let drained = self.feedback.drain_unconsumed().await?;
            log::info!("Including {} feedback records in this run", drained.len());
            for (index, record) in drained.iter().enumerate() {
                log::debug!(
                    "Feedback {}: {} corrected to {}",
                    record.id,
                    record.predicted_label,
                    record.correct_label
                );
                train.push(record.example());
                // Corrections go to the front of the validation pool so the
                // earliest minibatches already exercise them.
                validation.insert(index, record.example());
                feedback_demos.push(record.demonstration());
            }
        }

        let mut cache: HashMap<(String, String), EvaluationResult> = HashMap::new();
        let mut trials_used = 0usize;

        // Probe the baseline on the first minibatch; its failures inform the
        // teacher and the result seeds the round-0 cache entry.
        let probe_batch = Self::minibatch(&validation, params.minibatch_size);
        let probe = self.evaluator.evaluate(&baseline, probe_batch, "mb0").await;
        trials_used += 1;
        let failing = probe_batch
            .iter()
            .zip(probe.trace.iter())
            .filter(|(_, correct)| !**correct)
            .map(|(example, _)| example.clone())
            .collect::<Vec<_>>();
        cache.insert((probe.fingerprint.clone(), probe.split.clone()), probe.clone());
        let mut baseline_last = probe;

        if cancel.is_cancelled() {
            return self
                .finish(
                    &base,
                    Candidate {
                        order: 0,
                        config: baseline.clone(),
                        last: Some(baseline_last.clone()),
                    },
                    baseline_last.score,
                    OptimizeStatus::Cancelled,
                    false,
                    trials_used,
                )
                .await;
        }

        let mut candidate_set = self
            .generator
            .propose(
                &self.evaluator,
                &baseline,
                &failing,
                &train,
                params.instruction_candidates,
                params.demo_set_candidates,
                params.max_demos,
                params.seed,
            )
            .await;

        for demo_set in &mut candidate_set.demo_sets {
            demo_set.splice(0..0, feedback_demos.iter().cloned());
        }
        if candidate_set.demo_sets.is_empty() {
            candidate_set.demo_sets.push(feedback_demos.clone());
        }
        let degraded = candidate_set.degraded;

        // Cartesian product of candidates, baseline first.
        let mut survivors = vec![Candidate {
            order: 0,
            config: baseline.clone(),
            last: Some(baseline_last.clone()),
        }];
        for instruction in &candidate_set.instructions {
            for demo_set in &candidate_set.demo_sets {
                survivors.push(Candidate {
                    order: survivors.len(),
                    config: PromptConfig {
                        instruction: instruction.clone(),
                        demonstrations: demo_set.clone(),
                    },
                    last: None,
                });
            }
        }
        log::info!(
            "Searching over {} configurations with a budget of {} trials",
            survivors.len(),
            params.budget
        );

        let mut cancelled = false;
        let mut round = 0usize;
        while survivors.len() > 1 {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let split = format!("mb{round}");
            let batch = Self::minibatch(&validation, params.minibatch_size << round);
            let cached = survivors
                .iter()
                .map(|c| cache.contains_key(&(c.config.fingerprint(), split.clone())))
                .collect::<Vec<_>>();
            let needed = cached.iter().filter(|hit| !**hit).count();
            if trials_used + needed > params.budget {
                log::info!(
                    "Budget exhausted before round {round} ({needed} evaluations needed, \
                     {} remaining)",
                    params.budget - trials_used
                );
                break;
            }

            // Barrier: every evaluation in the round completes before any
            // selection, so partial results never decide advancement.
            let bar = self
                .progress
                .as_ref()
                .map(|mp| mp.add(ProgressBar::new(survivors.len() as u64)));
            let results = stream::iter(survivors.iter().map(|candidate| {
                let cached = cache
                    .get(&(candidate.config.fingerprint(), split.clone()))
                    .cloned();
                let config = candidate.config.clone();
                let split = split.clone();
                let bar = bar.clone();
                async move {
                    let result = match cached {
                        Some(result) => result,
                        None => self.evaluator.evaluate(&config, batch, &split).await,
                    };
                    if let Some(bar) = &bar {
                        bar.inc(1);
                    }
                    result
                }
            }))
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }

            trials_used += needed;
            for (candidate, result) in survivors.iter_mut().zip(results) {
                cache.insert(
                    (result.fingerprint.clone(), result.split.clone()),
                    result.clone(),
                );
                if candidate.order == 0 {
                    baseline_last = result.clone();
                }
                candidate.last = Some(result);
            }

            Self::rank(&mut survivors);
            let keep = survivors.len().div_ceil(2);
            log::info!(
                "Round {round}: best score {:.3} over {} examples; keeping {keep} of {}",
                survivors[0].last.as_ref().map(|r| r.score).unwrap_or(0.0),
                batch.len(),
                survivors.len()
            );
            survivors.truncate(keep);
            round += 1;
        }

        Self::rank(&mut survivors);
        let winner = survivors.swap_remove(0);

        if cancelled {
            let score = winner.last.as_ref().map(|r| r.score).unwrap_or(0.0);
            return self
                .finish(&base, winner, score, OptimizeStatus::Cancelled, degraded, trials_used)
                .await;
        }

        // Final recorded score: one evaluation on the full validation pool,
        // falling back to the last minibatch score when the budget is gone.
        let final_score = match cache.get(&(winner.config.fingerprint(), FULL_SPLIT.to_string())) {
            Some(result) => result.score,
            None if trials_used < params.budget => {
                let result = self
                    .evaluator
                    .evaluate(&winner.config, &validation, FULL_SPLIT)
                    .await;
                trials_used += 1;
                cache.insert(
                    (result.fingerprint.clone(), result.split.clone()),
                    result.clone(),
                );
                if winner.order == 0 {
                    baseline_last = result.clone();
                }
                result.score
            }
            None => winner.last.as_ref().map(|r| r.score).unwrap_or(0.0),
        };

        // The parent's cached score is the bar to clear; an unscored parent
        // is measured in this run, on the full pool if the budget allows.
        let parent_score = match base.score {
            Some(score) => score,
            None if winner.order != 0 && trials_used < params.budget => {
                let result = match cache.get(&(baseline.fingerprint(), FULL_SPLIT.to_string())) {
                    Some(result) => result.clone(),
                    None => {
                        let result = self
                            .evaluator
                            .evaluate(&baseline, &validation, FULL_SPLIT)
                            .await;
                        trials_used += 1;
                        result
                    }
                };
                result.score
            }
            None => baseline_last.score,
        };

        let status = if final_score > parent_score {
            OptimizeStatus::Improved
        } else {
            OptimizeStatus::NoImprovement
        };
        self.finish(&base, winner, final_score, status, degraded, trials_used)
            .await
    }

    async fn finish(
        &self,
        base: &crate::store::Program,
        winner: Candidate,
        score: f64,
        status: OptimizeStatus,
        degraded: bool,
        trials_used: usize,
    ) -> Result<OptimizeOutcome, OptimizeError> {
        let program = self
            .store
            .create(
                &winner.config.instruction,
                &winner.config.demonstrations,
                Some(base.id),
                Some(score),
            )
            .await?;
        log::info!(
            "Optimization finished: program {} scored {score:.3} ({status:?}, degraded: {degraded}, \
             trials: {trials_used})",
            program.id
        );
        Ok(OptimizeOutcome {
            program_id: program.id,
            score,
            status,
            degraded,
            trials_used,
        })
    }

    fn minibatch(validation: &[LabeledExample], size: usize) -> &[LabeledExample] {
        &validation[..size.min(validation.len())]
    }

    /// Stable selection order: score descending, then cheaper configuration,
    /// then earlier generation order.
    fn rank(survivors: &mut [Candidate]) {
        survivors.sort_by(|a, b| {
            let score_a = a.last.as_ref().map(|r| r.score).unwrap_or(f64::NEG_INFINITY);
            let score_b = b.last.as_ref().map(|r| r.score).unwrap_or(f64::NEG_INFINITY);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.config.cost().cmp(&b.config.cost()))
                .then_with(|| a.order.cmp(&b.order))
        });
    }
}
