use std::{fmt::Display, path::PathBuf};

use colored::Colorize;
use url::Url;

use crate::cli_args::CommonArgs;

#[derive(Debug)]
pub(crate) struct Config {
    pub(crate) store_url: String,
    pub(crate) seed_data: PathBuf,
    pub(crate) student_url: Url,
    pub(crate) student_model: String,
    pub(crate) teacher_url: Url,
    pub(crate) teacher_model: String,
    pub(crate) api_key: Option<String>,
    pub(crate) concurrency: usize,
}

impl From<CommonArgs> for Config {
    fn from(value: CommonArgs) -> Self {
        Config {
            store_url: value.store_url,
            seed_data: value.seed_data,
            student_url: value.student_url,
            student_model: value.student_model,
            teacher_url: value.teacher_url,
            teacher_model: value.teacher_model,
            api_key: value.api_key,
            concurrency: value.concurrency.max(1),
        }
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Config {
            store_url,
            seed_data,
            student_url,
            student_model,
            teacher_url,
            teacher_model,
            api_key: _,
            concurrency,
        } = self;

        let store_url = store_url.as_str().green();
        let seed_data = seed_data.display().to_string().yellow();

        let student_url = student_url.as_str().blue();
        let student_model = student_model.as_str().bright_blue();
        let teacher_url = teacher_url.as_str().blue();
        let teacher_model = teacher_model.as_str().bright_blue();

        write!(
            f,
            r#"Promptwright starting.
Using program store at {store_url}.
Using seed dataset at {seed_data}.
Student model {student_model} at {student_url}.
Teacher model {teacher_model} at {teacher_url}.
Evaluating {concurrency} examples concurrently."#
        )
    }
}
