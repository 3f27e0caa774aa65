//! Pipeline context: the accumulating set of named fields passed from stage to stage.
//!
//! The context behaves as an append-only record across one job. Each stage
//! receives the accumulated context and contributes new fields; a stage may
//! only overwrite a field it declares ownership of.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::StageError;
use crate::stage::StageOutput;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineContext {
    fields: BTreeMap<String, Value>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return this context with `key` set to `value`.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String view of a field. Non-string values read as absent.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Like [`get_str`](Self::get_str) but a missing field is a stage failure.
    pub fn require_str(&self, key: &str) -> Result<&str, StageError> {
        self.get_str(key).ok_or_else(|| StageError::missing(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Merge a stage's output into the context.
    ///
    /// New fields are always added. An existing field is replaced only when
    /// `owned` names it; other overwrites are dropped and reported back so the
    /// caller can log them.
    pub fn merge_output(mut self, output: StageOutput, owned: &[String]) -> (Self, Vec<String>) {
        let mut rejected = Vec::new();

        for (key, value) in output.into_fields() {
            if self.fields.contains_key(&key) && !owned.iter().any(|o| o == &key) {
                warn!(field = %key, "stage attempted to overwrite a field it does not own");
                rejected.push(key);
                continue;
            }
            self.fields.insert(key, value);
        }

        (self, rejected)
    }
}

impl From<BTreeMap<String, Value>> for PipelineContext {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}
