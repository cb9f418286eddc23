use serde::{Deserialize, Serialize};

/// Configuration for in-memory storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of jobs to keep in memory (None = unlimited)
    pub max_jobs: Option<usize>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_jobs: Some(10_000),
        }
    }
}

impl MemoryConfig {
    /// Create a new memory config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of jobs to keep in memory
    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = Some(max_jobs);
        self
    }

    /// Disable the job limit
    pub fn unlimited(mut self) -> Self {
        self.max_jobs = None;
        self
    }
}
