//! Canned pages and model replies.

#![allow(dead_code)]

use letter_server::kernel::{MockDocumentFetcher, MockLanguageModel, TestDependencies};

pub const JOB_URL: &str = "https://jobs.example.com/postings/42";

pub const JOB_PAGE: &str = r#"
<html>
  <head><title>Backend Engineer | Example Corp</title></head>
  <body>
    <nav><a href="/">Home</a> <a href="/about">About us</a></nav>
    <main>
      <h1>Backend Engineer</h1>
      <p>Build payment services in Rust and Postgres.</p>
      <p>Requirements: three years of backend experience.</p>
    </main>
    <footer>Example Corp. All rights reserved.</footer>
  </body>
</html>
"#;

pub const FILTERED_POSTING: &str =
    "Backend Engineer\nBuild payment services in Rust and Postgres.\nRequirements: three years of backend experience.";

pub const LETTER: &str = "Dear Sir or Madam,\n\nI am excited to apply for the Backend Engineer position at Example Corp.";

/// Mocks for a run where every stage succeeds.
pub fn happy_path_deps() -> TestDependencies {
    TestDependencies::new()
        .mock_fetcher(MockDocumentFetcher::new().with_html(JOB_PAGE))
        .mock_llm(
            MockLanguageModel::new()
                .with_response(FILTERED_POSTING)
                .with_response(LETTER),
        )
}
