//! Kernel module - server infrastructure and dependencies.

pub mod artifacts;
pub mod deps;
pub mod fetcher;
pub mod llm;
pub mod test_dependencies;
pub mod traits;

/// Default chat model on the Groq OpenAI-compatible endpoint.
pub const DEFAULT_LLM_MODEL: &str = "meta-llama/llama-4-maverick-17b-128e-instruct";

pub use artifacts::{ArtifactError, FileArtifactStore, SavedArtifact};
pub use deps::ServerDeps;
pub use fetcher::{FetchError, FetchedDocument, HttpDocumentFetcher};
pub use llm::{ChatCompletionsClient, LlmError};
pub use test_dependencies::{MockArtifactStore, MockDocumentFetcher, MockLanguageModel, TestDependencies};
pub use traits::*;
