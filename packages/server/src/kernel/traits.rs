// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no pipeline logic.
// Stages in `crate::stages` hold these behind `Arc<dyn ..>` and classify
// their errors into transient or fatal failures.
//
// Naming convention: Base* for trait names (e.g., BaseDocumentFetcher)

use async_trait::async_trait;

use super::artifacts::{ArtifactError, SavedArtifact};
use super::fetcher::{FetchError, FetchedDocument};
use super::llm::LlmError;

// =============================================================================
// Document Fetcher Trait (Infrastructure - remote document retrieval)
// =============================================================================

#[async_trait]
pub trait BaseDocumentFetcher: Send + Sync {
    /// Fetch a document and return its body as text
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError>;
}

// =============================================================================
// Language Model Trait (Infrastructure - generic chat completion)
// =============================================================================

#[async_trait]
pub trait BaseLanguageModel: Send + Sync {
    /// Complete a system + user prompt pair (returns raw text response)
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError>;

    /// Model identifier, for logging and artifact metadata
    fn model(&self) -> &str;
}

// =============================================================================
// Artifact Store Trait (Infrastructure - intermediate output persistence)
// =============================================================================

#[async_trait]
pub trait BaseArtifactStore: Send + Sync {
    /// Persist `content` under a name derived from `stem` and `unique_key`.
    ///
    /// `unique_key` must differ between attempts so retries never collide.
    async fn save(
        &self,
        stem: &str,
        unique_key: &str,
        extension: &str,
        content: &str,
    ) -> Result<SavedArtifact, ArtifactError>;

    /// Read an artifact back by filename. `Ok(None)` if it does not exist.
    async fn load(&self, filename: &str) -> Result<Option<String>, ArtifactError>;
}
