//! Stage 1: download the job posting page.

use async_trait::async_trait;
use scraper::{Html, Selector};
use stagecoach::{Stage, StageError, StageInput, StageOutput};
use tracing::info;

use super::{
    artifact_error, artifact_stem, fetch_error, HTML_FILE_PATH, PAGE_TITLE, RAW_HTML, SOURCE_URL,
};
use crate::kernel::ServerDeps;

pub struct FetchDocumentStage {
    deps: ServerDeps,
}

impl FetchDocumentStage {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }
}

/// Contents of `<title>`, whitespace collapsed.
fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    let title = document
        .select(&selector)
        .next()?
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

#[async_trait]
impl Stage for FetchDocumentStage {
    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        let url = input.context.require_str(SOURCE_URL)?;

        input.progress.report(10, "fetching page").await;
        let document = self.deps.fetcher.fetch(url).await.map_err(fetch_error)?;

        input.progress.report(60, "saving page").await;
        let saved = self
            .deps
            .artifacts
            .save(
                &artifact_stem(input.context, "html"),
                &input.attempt_id.to_string(),
                "html",
                &document.body,
            )
            .await
            .map_err(artifact_error)?;
        input
            .progress
            .record_detail(HTML_FILE_PATH, saved.filename.clone())
            .await;

        let title = extract_title(&document.body).unwrap_or_default();
        info!(
            job_id = %input.job_id,
            url = %document.url,
            bytes = document.body.len(),
            "page fetched"
        );

        Ok(StageOutput::new()
            .with_field(RAW_HTML, document.body)
            .with_field(PAGE_TITLE, title)
            .with_field(HTML_FILE_PATH, saved.filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{FetchError, MockDocumentFetcher, TestDependencies};
    use crate::stages::test_support::run_once;
    use stagecoach::{ErrorKind, PipelineContext};

    const PAGE: &str =
        "<html><head><title>  Backend   Engineer </title></head><body><p>Rust</p></body></html>";

    fn context() -> PipelineContext {
        PipelineContext::new().with_field(SOURCE_URL, "https://jobs.example.com/42")
    }

    #[test]
    fn title_is_trimmed() {
        assert_eq!(extract_title(PAGE).as_deref(), Some("Backend Engineer"));
        assert_eq!(extract_title("<html><body></body></html>"), None);
    }

    #[tokio::test]
    async fn fetches_and_saves_page() {
        let deps = TestDependencies::new().mock_fetcher(MockDocumentFetcher::new().with_html(PAGE));
        let stage = FetchDocumentStage::new(deps.server_deps());

        let output = tokio_test::assert_ok!(run_once(&stage, "fetch_document", &context()).await);

        assert_eq!(output.get(RAW_HTML).unwrap(), PAGE);
        assert_eq!(output.get(PAGE_TITLE).unwrap(), "Backend Engineer");
        assert_eq!(deps.fetcher.calls(), vec!["https://jobs.example.com/42"]);

        let filename = output.get(HTML_FILE_PATH).unwrap().as_str().unwrap();
        assert!(filename.starts_with("jobs.example.com_42_html_"));
        assert!(filename.ends_with(".html"));
        assert_eq!(deps.artifacts.filenames(), vec![filename.to_string()]);
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let deps = TestDependencies::new().mock_fetcher(MockDocumentFetcher::new().with_error(
            FetchError::Status {
                status: 502,
                url: "https://jobs.example.com/42".into(),
            },
        ));
        let stage = FetchDocumentStage::new(deps.server_deps());

        let err = run_once(&stage, "fetch_document", &context()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientExternalError);
    }

    #[tokio::test]
    async fn not_found_is_fatal() {
        let deps = TestDependencies::new();
        let stage = FetchDocumentStage::new(deps.server_deps());

        let err = run_once(&stage, "fetch_document", &context()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FatalExternalError);
        assert!(deps.artifacts.filenames().is_empty());
    }

    #[tokio::test]
    async fn missing_url_is_reported() {
        let deps = TestDependencies::new();
        let stage = FetchDocumentStage::new(deps.server_deps());

        let err = run_once(&stage, "fetch_document", &PipelineContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
        assert!(deps.fetcher.calls().is_empty());
    }
}
