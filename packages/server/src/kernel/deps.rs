//! Server dependencies for pipeline stages (using traits for testability)
//!
//! This module provides the dependency container the stage implementations
//! are built from. All external services sit behind trait abstractions so
//! tests can swap in the mocks from `test_dependencies`.

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::kernel::{
    BaseArtifactStore, BaseDocumentFetcher, BaseLanguageModel, ChatCompletionsClient,
    FileArtifactStore, HttpDocumentFetcher,
};

// =============================================================================
// ServerDeps
// =============================================================================

/// Dependencies accessible to stages (using traits for testability)
#[derive(Clone)]
pub struct ServerDeps {
    pub fetcher: Arc<dyn BaseDocumentFetcher>,
    pub llm: Arc<dyn BaseLanguageModel>,
    pub artifacts: Arc<dyn BaseArtifactStore>,
}

impl ServerDeps {
    pub fn new(
        fetcher: Arc<dyn BaseDocumentFetcher>,
        llm: Arc<dyn BaseLanguageModel>,
        artifacts: Arc<dyn BaseArtifactStore>,
    ) -> Self {
        Self {
            fetcher,
            llm,
            artifacts,
        }
    }

    /// Production wiring: reqwest fetcher, chat completions client, files on disk.
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = HttpDocumentFetcher::new(config.fetch_timeout)?;
        let llm = ChatCompletionsClient::new(
            config.llm_api_key.clone(),
            config.llm_base_url.clone(),
            config.llm_model.clone(),
            config.stage_timeout,
        )?;
        let artifacts = FileArtifactStore::new(config.artifact_dir.clone());

        Ok(Self::new(Arc::new(fetcher), Arc::new(llm), Arc::new(artifacts)))
    }
}
