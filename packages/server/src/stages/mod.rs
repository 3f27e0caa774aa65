//! Cover letter pipeline stages.
//!
//! Four stages turn a job posting URL into a letter:
//! fetch the page, extract readable text, filter it down to the posting
//! itself, then generate the letter. Each stage owns the context fields it
//! produces and persists its intermediate result as an artifact.

use std::sync::Arc;
use std::time::Duration;

use stagecoach::{Backoff, PipelineDefinition, StageDescriptor, StageError};

use crate::kernel::artifacts::sanitize_stem;
use crate::kernel::{ArtifactError, FetchError, LlmError, ServerDeps};

pub mod extract_text;
pub mod fetch_document;
pub mod filter_content;
pub mod generate_letter;

pub use extract_text::ExtractTextStage;
pub use fetch_document::FetchDocumentStage;
pub use filter_content::FilterContentStage;
pub use generate_letter::GenerateLetterStage;

pub const COVER_LETTER_PIPELINE: &str = "cover_letter";

// Context fields
pub const SOURCE_URL: &str = "source_url";
pub const USER_STORY: &str = "user_story";
pub const RAW_HTML: &str = "raw_html";
pub const PAGE_TITLE: &str = "page_title";
pub const HTML_FILE_PATH: &str = "html_file_path";
pub const TEXT: &str = "text";
pub const TEXT_FILE_PATH: &str = "text_file_path";
pub const FILTERED: &str = "filtered";
pub const FILTERED_FILE_PATH: &str = "filtered_file_path";
pub const OUTPUT: &str = "output";
pub const OUTPUT_FILE_PATH: &str = "output_file_path";

/// Per-deployment knobs applied to every stage.
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub timeout: Duration,
    pub max_retries_override: Option<u32>,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            max_retries_override: None,
        }
    }
}

impl StageSettings {
    fn retries(&self, default: u32) -> u32 {
        self.max_retries_override.unwrap_or(default)
    }
}

/// Build the `cover_letter` pipeline on top of the given collaborators.
pub fn cover_letter_pipeline(deps: &ServerDeps, settings: &StageSettings) -> PipelineDefinition {
    PipelineDefinition::new(COVER_LETTER_PIPELINE, OUTPUT)
        .stage(
            StageDescriptor::builder()
                .name("fetch_document")
                .max_retries(settings.retries(1))
                .backoff(Backoff::Fixed(Duration::from_secs(10)))
                .timeout(settings.timeout)
                .produces(owned(&[RAW_HTML, PAGE_TITLE, HTML_FILE_PATH]))
                .stage(Arc::new(FetchDocumentStage::new(deps.clone())))
                .build(),
        )
        .stage(
            StageDescriptor::builder()
                .name("extract_text")
                .max_retries(settings.retries(1))
                .backoff(Backoff::Fixed(Duration::from_secs(5)))
                .timeout(settings.timeout)
                .produces(owned(&[TEXT, TEXT_FILE_PATH]))
                .stage(Arc::new(ExtractTextStage::new(deps.clone())))
                .build(),
        )
        .stage(
            StageDescriptor::builder()
                .name("filter_content")
                .max_retries(settings.retries(1))
                .backoff(Backoff::Fixed(Duration::from_secs(15)))
                .timeout(settings.timeout)
                .produces(owned(&[FILTERED, FILTERED_FILE_PATH]))
                .stage(Arc::new(FilterContentStage::new(deps.clone())))
                .build(),
        )
        .stage(
            StageDescriptor::builder()
                .name("generate_letter")
                .max_retries(settings.retries(1))
                .backoff(Backoff::Fixed(Duration::from_secs(20)))
                .timeout(settings.timeout)
                .produces(owned(&[OUTPUT, OUTPUT_FILE_PATH]))
                .stage(Arc::new(GenerateLetterStage::new(deps.clone())))
                .build(),
        )
}

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

// =============================================================================
// Error mapping
// =============================================================================

pub(crate) fn fetch_error(err: FetchError) -> StageError {
    if err.is_transient() {
        StageError::transient(err.to_string())
    } else {
        StageError::fatal(err.to_string())
    }
}

pub(crate) fn llm_error(err: LlmError) -> StageError {
    if err.is_transient() {
        StageError::transient(err.to_string())
    } else {
        StageError::fatal(err.to_string())
    }
}

/// Disk trouble is usually temporary; a bad name never is.
pub(crate) fn artifact_error(err: ArtifactError) -> StageError {
    match err {
        ArtifactError::Io(e) => StageError::transient(format!("failed to write artifact: {e}")),
        other => StageError::fatal(other.to_string()),
    }
}

/// Artifact stem: the sanitized source URL followed by the stage's label.
pub(crate) fn artifact_stem(context: &stagecoach::PipelineContext, label: &str) -> String {
    let source = context.get_str(SOURCE_URL).unwrap_or("document");
    format!("{}_{label}", sanitize_stem(source, label.len() + 1))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::TestDependencies;

    #[test]
    fn pipeline_has_four_stages_in_order() {
        let deps = TestDependencies::new().server_deps();
        let pipeline = cover_letter_pipeline(&deps, &StageSettings::default());

        assert_eq!(
            pipeline.stage_names(),
            vec!["fetch_document", "extract_text", "filter_content", "generate_letter"]
        );
        assert_eq!(pipeline.output_field, OUTPUT);
    }

    #[test]
    fn retry_override_applies_to_every_stage() {
        let deps = TestDependencies::new().server_deps();
        let settings = StageSettings {
            timeout: Duration::from_secs(5),
            max_retries_override: Some(0),
        };
        let pipeline = cover_letter_pipeline(&deps, &settings);

        for index in 0..pipeline.len() {
            let stage = pipeline.get(index).unwrap();
            assert_eq!(stage.max_retries, 0);
            assert_eq!(stage.timeout, Duration::from_secs(5));
        }
    }

    #[test]
    fn stages_own_disjoint_fields() {
        let deps = TestDependencies::new().server_deps();
        let pipeline = cover_letter_pipeline(&deps, &StageSettings::default());

        let fetch = pipeline.get(0).unwrap();
        assert!(fetch.owns(RAW_HTML));
        assert!(!fetch.owns(OUTPUT));
        assert!(pipeline.get(3).unwrap().owns(OUTPUT));
    }

    #[test]
    fn artifact_stem_keeps_the_label_after_the_url() {
        let context = stagecoach::PipelineContext::new()
            .with_field(SOURCE_URL, "https://www.example.com/jobs/7?utm=feed");
        assert_eq!(artifact_stem(&context, "filtered"), "example.com_jobs_7_filtered");
    }

    #[test]
    fn fetch_errors_classified_by_status() {
        let transient = fetch_error(FetchError::Status {
            status: 503,
            url: "https://example.com".into(),
        });
        assert!(transient.is_retryable());

        let fatal = fetch_error(FetchError::Status {
            status: 404,
            url: "https://example.com".into(),
        });
        assert!(!fatal.is_retryable());
    }
}
