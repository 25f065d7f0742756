mod candidates;
mod cli_args;
mod config;
mod dataset;
mod evaluator;
mod feedback;
mod inspector;
mod llm_client;
mod optimizer;
mod store;

#[cfg(test)]
mod test_data;

use std::{str::FromStr, sync::Arc};

use async_openai::{config::OpenAIConfig, Client};
use clap::Parser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::runtime::Runtime;
use url::Url;

use crate::{
    candidates::CandidateGenerator,
    cli_args::{Cli, Commands},
    config::Config,
    dataset::{LabeledExample, Pools},
    evaluator::{Evaluator, PromptConfig},
    feedback::FeedbackStore,
    llm_client::{CompletionClientImpl, InferenceGateway, OpenAiCompletionClient},
    optimizer::{CancellationFlag, Engine, SearchParams},
    store::ProgramStore,
};

fn main() -> anyhow::Result<()> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();

    let multi_progress = MultiProgress::new();

    LogWrapper::new(multi_progress.clone(), logger).try_init()?;

    let runtime = Runtime::new()?;

    match Cli::parse().command {
        Commands::Classify(args) => {
            let config = Config::from(args.common);
            log::info!("{config}");
            let (engine, _) = build_engine(&runtime, &config, multi_progress)?;

            let program = runtime.block_on(engine.store().get(args.program_id))?;
            let prediction = runtime.block_on(
                engine
                    .evaluator()
                    .predict(&PromptConfig::from_program(&program), &args.text),
            )?;
            match prediction.label {
                Some(label) => println!("{label}"),
                None => {
                    log::warn!("Completion did not contain a known label");
                    println!("{}", prediction.raw);
                }
            }
            Ok(())
        }
        Commands::SubmitFeedback(args) => {
            let config = Config::from(args.common);
            log::info!("{config}");
            let (engine, _) = build_engine(&runtime, &config, multi_progress)?;

            let record = runtime.block_on(engine.feedback().submit(
                &args.text,
                &args.predicted_label,
                &args.correct_label,
            ))?;
            println!("Recorded feedback {}", record.id);
            Ok(())
        }
        Commands::Optimize(args) => {
            let config = Config::from(args.common);
            log::info!("{config}");
            let (engine, examples) = build_engine(&runtime, &config, multi_progress)?;

            let pools = Pools::split(examples, args.train_size, args.val_size, args.seed);
            let params = SearchParams {
                budget: args.budget,
                instruction_candidates: args.instruction_candidates,
                demo_set_candidates: args.demo_set_candidates,
                max_demos: args.max_demos,
                minibatch_size: args.minibatch_size,
                seed: args.seed,
            };

            let cancel = CancellationFlag::new();
            {
                let cancel = cancel.clone();
                runtime.spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        log::warn!("Interrupted; finishing with the best configuration so far");
                        cancel.cancel();
                    }
                });
            }

            let outcome = runtime.block_on(engine.optimize(
                args.base_program_id,
                pools,
                params,
                args.include_feedback,
                &cancel,
            ))?;
            println!(
                "Program {} scored {:.3} ({:?}, {} trials used{})",
                outcome.program_id,
                outcome.score,
                outcome.status,
                outcome.trials_used,
                if outcome.degraded { ", degraded" } else { "" }
            );
            if outcome.improved() {
                log::info!(
                    "Program {} beats its parent; pass --program-id {} to classify with it",
                    outcome.program_id,
                    outcome.program_id
                );
            }
            Ok(())
        }
        Commands::ListPrograms(args) => {
            let config = Config::from(args.common);
            let (engine, _) = build_engine(&runtime, &config, multi_progress)?;

            for program in runtime.block_on(engine.store().list())? {
                let score = program
                    .score
                    .map(|s| format!("{s:.3}"))
                    .unwrap_or_else(|| "-".to_string());
                let parent = program
                    .parent_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>4}  parent {:>4}  score {:>6}  demos {:>3}  {}  {}",
                    program.id,
                    parent,
                    score,
                    program.demonstrations.len(),
                    program.created_at.format("%Y-%m-%d %H:%M:%S"),
                    program.instruction.lines().next().unwrap_or_default(),
                );
            }
            Ok(())
        }
        Commands::Compare(args) => {
            let config = Config::from(args.common);
            let (engine, _) = build_engine(&runtime, &config, multi_progress)?;

            let a = runtime.block_on(engine.store().get(args.program_a))?;
            let b = runtime.block_on(engine.store().get(args.program_b))?;
            let diff = inspector::diff(&a, &b);
            if diff.is_empty() {
                println!("Programs {} and {} are identical", a.id, b.id);
            } else {
                print!("{diff}");
            }
            Ok(())
        }
    }
}

fn build_engine(
    runtime: &Runtime,
    config: &Config,
    progress: MultiProgress,
) -> anyhow::Result<(Engine, Vec<LabeledExample>)> {
    let examples = dataset::load_examples(&config.seed_data)?;
    let labels = dataset::label_inventory(&examples);

    let pool = runtime.block_on(connect(&config.store_url))?;
    let store = runtime.block_on(ProgramStore::new(pool.clone()))?;
    let feedback = runtime.block_on(FeedbackStore::new(pool))?;
    runtime.block_on(store.ensure_base_program())?;

    let gateway = Arc::new(InferenceGateway::new(
        openai_backend(&config.teacher_url, config.api_key.as_deref(), &config.teacher_model),
        openai_backend(&config.student_url, config.api_key.as_deref(), &config.student_model),
    ));
    let evaluator = Evaluator::new(gateway.clone(), labels, config.concurrency);
    let generator = CandidateGenerator::new(gateway);

    let engine = Engine::new(
        store,
        feedback,
        evaluator,
        generator,
        config.concurrency,
        Some(progress),
    );
    Ok((engine, examples))
}

async fn connect(store_url: &str) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(SqliteConnectOptions::from_str(store_url)?.create_if_missing(true))
        .await
}

fn openai_backend(url: &Url, api_key: Option<&str>, model: &str) -> CompletionClientImpl {
    let mut openai_config = OpenAIConfig::new().with_api_base(url.as_ref());
    if let Some(key) = api_key {
        openai_config = openai_config.with_api_key(key);
    }
    CompletionClientImpl::OpenAi(OpenAiCompletionClient::new(
        Client::with_config(openai_config),
        model.to_string(),
    ))
}
