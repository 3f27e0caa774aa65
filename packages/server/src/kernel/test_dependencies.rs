// TestDependencies - mock implementations for testing
//
// Provides mock services that can be injected into ServerDeps for tests.
// Each mock replays queued responses in order and repeats the last one once
// the queue runs dry.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{
    artifacts::{artifact_filename, validate_filename},
    ArtifactError, BaseArtifactStore, BaseDocumentFetcher, BaseLanguageModel, FetchError,
    FetchedDocument, LlmError, SavedArtifact, ServerDeps,
};

fn next_from<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

// =============================================================================
// Mock Document Fetcher
// =============================================================================

pub struct MockDocumentFetcher {
    responses: Arc<Mutex<VecDeque<Result<FetchedDocument, FetchError>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockDocumentFetcher {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_html(self, html: &str) -> Self {
        let document = FetchedDocument {
            url: "https://example.org/job".to_string(),
            status: 200,
            body: html.to_string(),
        };
        self.responses.lock().unwrap().push_back(Ok(document));
        self
    }

    pub fn with_error(self, error: FetchError) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    /// URLs passed to `fetch`, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockDocumentFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseDocumentFetcher for MockDocumentFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        next_from(&self.responses).unwrap_or_else(|| {
            Err(FetchError::Status {
                status: 404,
                url: url.to_string(),
            })
        })
    }
}

// =============================================================================
// Mock Language Model
// =============================================================================

/// Prompts captured from a completion call
#[derive(Debug, Clone)]
pub struct CompletionCall {
    pub system_prompt: String,
    pub user_prompt: String,
}

pub struct MockLanguageModel {
    responses: Arc<Mutex<VecDeque<Result<String, LlmError>>>>,
    calls: Arc<Mutex<Vec<CompletionCall>>>,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_response(self, response: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(response.to_string()));
        self
    }

    pub fn with_error(self, error: LlmError) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn calls(&self) -> Vec<CompletionCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseLanguageModel for MockLanguageModel {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(CompletionCall {
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
        });
        next_from(&self.responses).unwrap_or_else(|| Ok("mock response".to_string()))
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}

// =============================================================================
// Mock Artifact Store
// =============================================================================

/// Keeps artifacts in memory, keyed by filename
#[derive(Default)]
pub struct MockArtifactStore {
    files: Arc<Mutex<HashMap<String, String>>>,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, filename: &str, content: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(filename.to_string(), content.to_string());
        self
    }

    pub fn filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl BaseArtifactStore for MockArtifactStore {
    async fn save(
        &self,
        stem: &str,
        unique_key: &str,
        extension: &str,
        content: &str,
    ) -> Result<SavedArtifact, ArtifactError> {
        let filename = artifact_filename(stem, unique_key, extension);
        self.files
            .lock()
            .unwrap()
            .insert(filename.clone(), content.to_string());
        Ok(SavedArtifact {
            path: format!("memory/{filename}"),
            filename,
        })
    }

    async fn load(&self, filename: &str) -> Result<Option<String>, ArtifactError> {
        validate_filename(filename)?;
        Ok(self.files.lock().unwrap().get(filename).cloned())
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Mock services bundled for injection into `ServerDeps`
pub struct TestDependencies {
    pub fetcher: Arc<MockDocumentFetcher>,
    pub llm: Arc<MockLanguageModel>,
    pub artifacts: Arc<MockArtifactStore>,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            fetcher: Arc::new(MockDocumentFetcher::new()),
            llm: Arc::new(MockLanguageModel::new()),
            artifacts: Arc::new(MockArtifactStore::new()),
        }
    }

    pub fn mock_fetcher(mut self, fetcher: MockDocumentFetcher) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    pub fn mock_llm(mut self, llm: MockLanguageModel) -> Self {
        self.llm = Arc::new(llm);
        self
    }

    pub fn mock_artifacts(mut self, artifacts: MockArtifactStore) -> Self {
        self.artifacts = Arc::new(artifacts);
        self
    }

    pub fn server_deps(&self) -> ServerDeps {
        ServerDeps::new(self.fetcher.clone(), self.llm.clone(), self.artifacts.clone())
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
