//! Processor registry: routes a `job_type` to the function that does the work.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::ProcessorError;

/// A processor supplied by the surrounding application.
pub type Processor = Arc<dyn Fn(&JsonValue) -> Result<JsonValue, ProcessorError> + Send + Sync>;

/// `job_type` -> processor map.
///
/// Populated before the scheduler starts and read-only afterwards.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Processor>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the processor for a job type.
    pub fn register<F>(&mut self, job_type: impl Into<String>, processor: F)
    where
        F: Fn(&JsonValue) -> Result<JsonValue, ProcessorError> + Send + Sync + 'static,
    {
        self.processors.insert(job_type.into(), Arc::new(processor));
    }

    pub fn get(&self, job_type: &str) -> Option<&Processor> {
        self.processors.get(job_type)
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.processors.contains_key(job_type)
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut job_types: Vec<_> = self.processors.keys().collect();
        job_types.sort();
        f.debug_struct("ProcessorRegistry")
            .field("job_types", &job_types)
            .finish()
    }
}
