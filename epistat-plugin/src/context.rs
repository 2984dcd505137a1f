//! Analysis Context

use epistat_core::EngineConfig;

/// Context passed to plugins
///
/// Read-only: plugins are pure functions of their arguments and this
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub config: EngineConfig,
}

impl AnalysisContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
