//! Stage 2: turn raw HTML into readable text.
//!
//! Picks the main content region when the page marks one, converts it to
//! Markdown-flavoured text with htmd while skipping navigation and script
//! nodes, then normalizes whitespace.

use std::sync::OnceLock;

use async_trait::async_trait;
use htmd::HtmlToMarkdown;
use regex::Regex;
use scraper::{Html, Selector};
use stagecoach::{Stage, StageError, StageInput, StageOutput};
use tracing::debug;

use super::{artifact_error, artifact_stem, RAW_HTML, TEXT, TEXT_FILE_PATH};
use crate::kernel::ServerDeps;

const SKIPPED_TAGS: [&str; 10] = [
    "script", "style", "noscript", "iframe", "nav", "header", "footer", "aside", "form", "svg",
];

const MAIN_CONTENT_SELECTORS: [&str; 4] = ["main", "article", "[role=\"main\"]", "body"];

static BLANK_LINES: OnceLock<Regex> = OnceLock::new();
static INLINE_SPACE: OnceLock<Regex> = OnceLock::new();

pub struct ExtractTextStage {
    deps: ServerDeps,
}

impl ExtractTextStage {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }
}

/// HTML of the first main-content region, or the whole document.
fn main_content(html: &str) -> String {
    let document = Html::parse_document(html);
    for selector in MAIN_CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(selector) {
            if let Some(element) = document.select(&selector).next() {
                return element.html();
            }
        }
    }
    document.html()
}

fn html_to_text(html: &str) -> String {
    let converter = HtmlToMarkdown::builder()
        .skip_tags(SKIPPED_TAGS.to_vec())
        .build();
    converter.convert(html).unwrap_or_else(|_| {
        // Fallback: plain text nodes
        Html::parse_document(html)
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ")
    })
}

/// Trim every line, squeeze inner runs of spaces and cap blank runs at one.
pub fn normalize_whitespace(text: &str) -> String {
    let inline = INLINE_SPACE.get_or_init(|| Regex::new(r"[ \t\u{a0}]+").expect("static regex"));
    let blank = BLANK_LINES.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"));

    let lines: Vec<String> = text
        .lines()
        .map(|line| inline.replace_all(line.trim(), " ").into_owned())
        .collect();
    blank.replace_all(&lines.join("\n"), "\n\n").trim().to_string()
}

pub fn extract_text(html: &str) -> String {
    normalize_whitespace(&html_to_text(&main_content(html)))
}

#[async_trait]
impl Stage for ExtractTextStage {
    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        let html = input.context.require_str(RAW_HTML)?;

        input.progress.report(20, "extracting text").await;
        let text = extract_text(html);
        if text.is_empty() {
            return Err(StageError::fatal("no readable text in document"));
        }
        debug!(
            job_id = %input.job_id,
            html_bytes = html.len(),
            text_chars = text.chars().count(),
            "text extracted"
        );

        input.progress.report(70, "saving text").await;
        let saved = self
            .deps
            .artifacts
            .save(
                &artifact_stem(input.context, "text"),
                &input.attempt_id.to_string(),
                "txt",
                &text,
            )
            .await
            .map_err(artifact_error)?;
        input
            .progress
            .record_detail(TEXT_FILE_PATH, saved.filename.clone())
            .await;

        Ok(StageOutput::new()
            .with_field(TEXT, text)
            .with_field(TEXT_FILE_PATH, saved.filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::TestDependencies;
    use crate::stages::test_support::run_once;
    use stagecoach::{ErrorKind, PipelineContext};

    const PAGE: &str = r#"
        <html>
          <head><title>Job</title><style>body { color: red; }</style></head>
          <body>
            <nav><a href="/">Home</a> <a href="/jobs">All jobs</a></nav>
            <main>
              <h1>Backend Engineer</h1>
              <p>We build   payment   systems in Rust.</p>
              <script>trackVisitor();</script>
              <p>Requirements: distributed systems experience.</p>
            </main>
            <footer>Copyright 2024</footer>
          </body>
        </html>
    "#;

    #[test]
    fn keeps_main_content_only() {
        let text = extract_text(PAGE);

        assert!(text.contains("Backend Engineer"));
        assert!(text.contains("We build payment systems in Rust."));
        assert!(text.contains("distributed systems experience"));
        assert!(!text.contains("All jobs"));
        assert!(!text.contains("trackVisitor"));
        assert!(!text.contains("Copyright"));
    }

    #[test]
    fn whitespace_is_normalized() {
        assert_eq!(
            normalize_whitespace("  a   b  \n\n\n\n  c\t\td  "),
            "a b\n\nc d"
        );
    }

    #[tokio::test]
    async fn saves_text_artifact() {
        let deps = TestDependencies::new();
        let stage = ExtractTextStage::new(deps.server_deps());
        let context = PipelineContext::new()
            .with_field("source_url", "https://jobs.example.com/42")
            .with_field(RAW_HTML, PAGE);

        let output = run_once(&stage, "extract_text", &context).await.unwrap();

        let filename = output.get(TEXT_FILE_PATH).unwrap().as_str().unwrap();
        assert!(filename.starts_with("jobs.example.com_42_text_"));
        assert!(filename.ends_with(".txt"));
        assert!(output.get(TEXT).unwrap().as_str().unwrap().contains("Backend Engineer"));
    }

    #[tokio::test]
    async fn empty_page_is_fatal() {
        let deps = TestDependencies::new();
        let stage = ExtractTextStage::new(deps.server_deps());
        let context = PipelineContext::new()
            .with_field(RAW_HTML, "<html><body><script>x()</script></body></html>");

        let err = run_once(&stage, "extract_text", &context).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FatalExternalError);
        assert!(deps.artifacts.filenames().is_empty());
    }
}
