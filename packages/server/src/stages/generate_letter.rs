//! Stage 4: write the cover letter.

use async_trait::async_trait;
use stagecoach::{Stage, StageError, StageInput, StageOutput};
use tracing::info;

use super::{
    artifact_error, artifact_stem, llm_error, FILTERED, OUTPUT, OUTPUT_FILE_PATH, PAGE_TITLE,
    USER_STORY,
};
use crate::kernel::ServerDeps;

/// Anything shorter is treated as a refusal or a broken completion.
pub const MIN_LETTER_CHARS: usize = 50;

/// Used when the applicant does not tell us anything about themselves.
const DEFAULT_USER_STORY: &str = "I am an applicant who wants to contribute to your company and \
grow with it. I will turn my potential and enthusiasm into outstanding results.";

const SYSTEM_PROMPT: &str = "You are an expert career writer. Write a tailored, professional \
cover letter for the job posting provided by the user. Ground every claim about the applicant \
in the applicant's story; never invent employers, degrees or numbers. Address the specific \
responsibilities and qualifications of the posting. Write in the language of the posting, in \
four to six paragraphs, and return only the letter text.";

pub struct GenerateLetterStage {
    deps: ServerDeps,
}

impl GenerateLetterStage {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }
}

fn user_prompt(posting: &str, title: Option<&str>, story: &str) -> String {
    let mut prompt = String::new();
    if let Some(title) = title.filter(|t| !t.is_empty()) {
        prompt.push_str(&format!("Page title: {title}\n\n"));
    }
    prompt.push_str("Job posting:\n");
    prompt.push_str(posting);
    prompt.push_str("\n\nApplicant's story:\n");
    prompt.push_str(story);
    prompt
}

#[async_trait]
impl Stage for GenerateLetterStage {
    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        let posting = input.context.require_str(FILTERED)?;
        let story = input
            .context
            .get_str(USER_STORY)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_USER_STORY);

        input.progress.report(20, "generating letter").await;
        let prompt = user_prompt(posting, input.context.get_str(PAGE_TITLE), story);
        let letter = self
            .deps
            .llm
            .complete(SYSTEM_PROMPT, &prompt)
            .await
            .map_err(llm_error)?;
        let letter = letter.trim();

        let length = letter.chars().count();
        if length < MIN_LETTER_CHARS {
            return Err(StageError::fatal(format!(
                "generated letter too short ({length} chars)"
            )));
        }

        input.progress.report(90, "saving letter").await;
        let saved = self
            .deps
            .artifacts
            .save(
                &artifact_stem(input.context, "letter"),
                &input.attempt_id.to_string(),
                "txt",
                letter,
            )
            .await
            .map_err(artifact_error)?;
        input
            .progress
            .record_detail(OUTPUT_FILE_PATH, saved.filename.clone())
            .await;

        info!(job_id = %input.job_id, chars = length, "cover letter generated");

        Ok(StageOutput::new()
            .with_field(OUTPUT, letter)
            .with_field(OUTPUT_FILE_PATH, saved.filename))
    }
}
