use super::Orchestrator;
use crate::error::{LifecycleError, Result};
use crate::invoker::{CommandRunner, ProcessRunner};
use crate::render::{EmbeddedTemplates, ManifestRenderer};
use crate::settings::Settings;
use std::sync::Arc;

/// Builder for wiring an orchestrator to its collaborators
#[derive(Default)]
pub struct OrchestratorBuilder {
    settings: Option<Settings>,
    runner: Option<Arc<dyn CommandRunner>>,
    renderer: Option<Arc<dyn ManifestRenderer>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the runtime settings
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Set the command runner (defaults to real child processes)
    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Set the manifest renderer (defaults to the embedded templates)
    pub fn renderer(mut self, renderer: Arc<dyn ManifestRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Build the orchestrator
    pub fn build(self) -> Result<Orchestrator> {
        let settings = self
            .settings
            .ok_or_else(|| LifecycleError::precondition("settings are required"))?;

        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(ProcessRunner::new()));

        let renderer = match self.renderer {
            Some(renderer) => renderer,
            None => Arc::new(EmbeddedTemplates::new(settings.template_params())?),
        };

        Ok(Orchestrator::new(settings, runner, renderer))
    }
}
