//! Filesystem artifact store.
//!
//! Stages persist their intermediate outputs (raw HTML, extracted text,
//! filtered text, the letter) so they can be inspected after the fact. Every
//! file name carries a per-attempt suffix, so a redelivered or retried stage
//! writes a new file instead of clobbering the previous one.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::BaseArtifactStore;

const MAX_FILENAME_LENGTH: usize = 100;
const SUFFIX_LENGTH: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct SavedArtifact {
    /// Bare file name, as served by `/artifacts/:filename`
    pub filename: String,
    /// Full path on disk
    pub path: String,
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();
static REPEATED_UNDERSCORES: OnceLock<Regex> = OnceLock::new();

/// Turn a URL or arbitrary label into a safe, lowercase file stem.
///
/// URLs become `host_path` with a leading `www.` dropped. Anything outside
/// `[a-zA-Z0-9_.-]` becomes `_`, runs of `_` collapse, and the result is
/// truncated to leave room for `reserved` trailing characters.
pub fn sanitize_stem(raw: &str, reserved: usize) -> String {
    let name = match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            let host = url.host_str().unwrap_or_default();
            let host = host.strip_prefix("www.").unwrap_or(host);
            format!("{}_{}", host, url.path().replace('/', "_"))
        }
        _ => raw.to_string(),
    };

    let unsafe_chars = UNSAFE_CHARS.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_.-]").expect("static regex"));
    let repeated = REPEATED_UNDERSCORES.get_or_init(|| Regex::new(r"_+").expect("static regex"));

    let name = unsafe_chars.replace_all(&name, "_");
    let name = repeated.replace_all(&name, "_");
    let mut name = name.trim_matches('_').to_lowercase();

    let budget = MAX_FILENAME_LENGTH.saturating_sub(reserved);
    if name.len() > budget {
        // Only ASCII remains after sanitizing, so byte truncation is safe.
        name.truncate(budget);
    }
    if name.is_empty() {
        name.push_str("artifact");
    }
    name
}

/// Short hex digest of `key`, used as the per-attempt uniqueness suffix.
pub fn unique_suffix(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)[..SUFFIX_LENGTH].to_string()
}

/// Build `<stem>_<suffix>.<ext>`.
pub fn artifact_filename(stem: &str, unique_key: &str, extension: &str) -> String {
    let reserved = SUFFIX_LENGTH + 1 + if extension.is_empty() { 0 } else { extension.len() + 1 };
    let stem = sanitize_stem(stem, reserved);
    let suffix = unique_suffix(unique_key);
    if extension.is_empty() {
        format!("{stem}_{suffix}")
    } else {
        format!("{stem}_{suffix}.{extension}")
    }
}

/// Reject anything that could escape the artifact directory.
pub fn validate_filename(filename: &str) -> Result<(), ArtifactError> {
    let bad = filename.is_empty()
        || filename.starts_with('.')
        || filename.contains("..")
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0');
    if bad {
        return Err(ArtifactError::InvalidName(filename.to_string()));
    }
    Ok(())
}

pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BaseArtifactStore for FileArtifactStore {
    async fn save(
        &self,
        stem: &str,
        unique_key: &str,
        extension: &str,
        content: &str,
    ) -> Result<SavedArtifact, ArtifactError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let filename = artifact_filename(stem, unique_key, extension);
        let path = self.root.join(&filename);
        tokio::fs::write(&path, content).await?;

        debug!(path = %path.display(), bytes = content.len(), "artifact saved");
        Ok(SavedArtifact {
            filename,
            path: path.display().to_string(),
        })
    }

    async fn load(&self, filename: &str) -> Result<Option<String>, ArtifactError> {
        validate_filename(filename)?;

        match tokio::fs::read_to_string(self.root.join(filename)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
