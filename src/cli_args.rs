use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use url::Url;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Classify a text with a stored program.
    Classify(ClassifyArgs),
    /// Record a user correction for a prediction.
    SubmitFeedback(SubmitFeedbackArgs),
    /// Search for a program that beats the given base program.
    Optimize(OptimizeArgs),
    /// List every stored program version.
    ListPrograms(ListProgramsArgs),
    /// Show a structured diff between two program versions.
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
pub(crate) struct CommonArgs {
    #[arg(long, default_value = "sqlite://promptwright.sqlite")]
    pub(crate) store_url: String,
    #[arg(long)]
    pub(crate) seed_data: PathBuf,
    #[arg(long)]
    pub(crate) student_url: Url,
    #[arg(long)]
    pub(crate) student_model: String,
    #[arg(long)]
    pub(crate) teacher_url: Url,
    #[arg(long)]
    pub(crate) teacher_model: String,
    #[arg(long)]
    pub(crate) api_key: Option<String>,
    #[arg(long, default_value_t = 8)]
    pub(crate) concurrency: usize,
}

#[derive(Parser, Debug)]
pub(crate) struct ClassifyArgs {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
    #[arg(long)]
    pub(crate) program_id: i64,
    #[arg(long)]
    pub(crate) text: String,
}

#[derive(Parser, Debug)]
pub(crate) struct SubmitFeedbackArgs {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
    #[arg(long)]
    pub(crate) text: String,
    #[arg(long)]
    pub(crate) predicted_label: String,
    #[arg(long)]
    pub(crate) correct_label: String,
}

#[derive(Parser, Debug)]
pub(crate) struct OptimizeArgs {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
    #[arg(long)]
    pub(crate) base_program_id: i64,
    #[arg(long)]
    pub(crate) budget: usize,
    #[arg(long, default_value_t = false)]
    pub(crate) include_feedback: bool,
    #[arg(long, default_value_t = 0)]
    pub(crate) seed: u64,
    #[arg(long, default_value_t = 4)]
    pub(crate) instruction_candidates: usize,
    #[arg(long, default_value_t = 2)]
    pub(crate) demo_set_candidates: usize,
    #[arg(long, default_value_t = 4)]
    pub(crate) max_demos: usize,
    #[arg(long, default_value_t = 8)]
    pub(crate) minibatch_size: usize,
    #[arg(long, default_value_t = 64)]
    pub(crate) train_size: usize,
    #[arg(long, default_value_t = 64)]
    pub(crate) val_size: usize,
}

#[derive(Parser, Debug)]
pub(crate) struct ListProgramsArgs {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
}

#[derive(Parser, Debug)]
pub(crate) struct CompareArgs {
    #[command(flatten)]
    pub(crate) common: CommonArgs,
    #[arg(long)]
    pub(crate) program_a: i64,
    #[arg(long)]
    pub(crate) program_b: i64,
}
