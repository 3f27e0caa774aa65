//! Pipeline definitions: an ordered list of stages plus the output field the
//! completion handler extracts from the final context.

use std::sync::Arc;

use crate::stage::StageDescriptor;

#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub name: String,
    pub stages: Vec<StageDescriptor>,
    /// Context field copied into the SUCCESS snapshot's `output`.
    pub output_field: String,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>, output_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            output_field: output_field.into(),
        }
    }

    /// Append a stage to the end of the chain.
    pub fn stage(mut self, descriptor: StageDescriptor) -> Self {
        self.stages.push(descriptor);
        self
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }

    pub fn get(&self, index: usize) -> Option<&StageDescriptor> {
        self.stages.get(index)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}
