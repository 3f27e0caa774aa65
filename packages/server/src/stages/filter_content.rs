//! Stage 3: strip everything that is not the job posting itself.

use async_trait::async_trait;
use stagecoach::{Stage, StageError, StageInput, StageOutput};
use tracing::{info, warn};

use super::{artifact_error, artifact_stem, llm_error, FILTERED, FILTERED_FILE_PATH, TEXT};
use crate::kernel::ServerDeps;

/// Longest text sent to the model, in characters.
pub const MAX_INPUT_CHARS: usize = 24_000;

/// Exact reply the model gives when the page holds no posting.
pub const NO_POSTING_REPLY: &str = "NO_JOB_POSTING_CONTENT";

const SYSTEM_PROMPT: &str = "You are a careful text processing assistant. Extract only the core \
job posting from the text you are given: the role, responsibilities, qualifications, benefits \
and how to apply. Remove advertising, company promotion unrelated to the role, navigation links, \
sidebars, headers, footers, legal notices, cookie banners and unrelated articles. Keep the \
original wording and language; do not summarize or add commentary. If the text is not a job \
posting, or is too damaged to recover any meaningful posting, reply with exactly \
NO_JOB_POSTING_CONTENT and nothing else.";

pub struct FilterContentStage {
    deps: ServerDeps,
}

impl FilterContentStage {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }
}

/// First `max_chars` characters of `text`, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[async_trait]
impl Stage for FilterContentStage {
    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        let text = input.context.require_str(TEXT)?;

        let prompt = truncate_chars(text, MAX_INPUT_CHARS);
        if prompt.len() < text.len() {
            warn!(
                job_id = %input.job_id,
                max_chars = MAX_INPUT_CHARS,
                "text truncated before filtering"
            );
            input
                .progress
                .record_detail("filter_input_truncated", true)
                .await;
        }

        input.progress.report(20, "filtering posting content").await;
        let filtered = self
            .deps
            .llm
            .complete(SYSTEM_PROMPT, prompt)
            .await
            .map_err(llm_error)?;
        let filtered = filtered.trim();

        if filtered.is_empty() || filtered == NO_POSTING_REPLY {
            return Err(StageError::fatal("no job posting content found in page"));
        }

        input.progress.report(80, "saving filtered content").await;
        let saved = self
            .deps
            .artifacts
            .save(
                &artifact_stem(input.context, "filtered"),
                &input.attempt_id.to_string(),
                "txt",
                filtered,
            )
            .await
            .map_err(artifact_error)?;
        input
            .progress
            .record_detail(FILTERED_FILE_PATH, saved.filename.clone())
            .await;

        info!(
            job_id = %input.job_id,
            model = self.deps.llm.model(),
            input_chars = prompt.chars().count(),
            output_chars = filtered.chars().count(),
            "content filtered"
        );

        Ok(StageOutput::new()
            .with_field(FILTERED, filtered)
            .with_field(FILTERED_FILE_PATH, saved.filename))
    }
}
