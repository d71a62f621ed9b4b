//! Manifest rendering
//!
//! Turns an [`Environment`] into the files the external tools consume:
//! the node-group claim (base or GPU variant), the Omni cluster template
//! and the kubeconfig handed back to the user.

use crate::error::{LifecycleError, Result};
use crate::models::Environment;
use async_trait::async_trait;
use minijinja::{context, Environment as TemplateEnv, UndefinedBehavior};
use secrecy::ExposeSecret;
use std::fmt;
use std::path::Path;

const CLAIM_BASE_TEMPLATE: &str = include_str!("../../templates/claim-base.yaml");
const CLAIM_GPU_TEMPLATE: &str = include_str!("../../templates/claim-gpu.yaml");
const CLUSTER_TEMPLATE: &str = include_str!("../../templates/cluster.yaml");
const KUBECONFIG_TEMPLATE: &str = include_str!("../../templates/kubeconfig.yaml");

/// Selects which manifest to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    ClaimBase,
    ClaimGpu,
    Cluster,
    Kubeconfig,
}

impl TemplateKind {
    /// Claim variant for the requested hardware
    pub fn claim(gpu_requested: bool) -> Self {
        if gpu_requested {
            TemplateKind::ClaimGpu
        } else {
            TemplateKind::ClaimBase
        }
    }

    fn template_name(&self) -> &'static str {
        match self {
            TemplateKind::ClaimBase => "claim-base",
            TemplateKind::ClaimGpu => "claim-gpu",
            TemplateKind::Cluster => "cluster",
            TemplateKind::Kubeconfig => "kubeconfig",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template_name())
    }
}

/// Produces manifest content for an environment
#[async_trait]
pub trait ManifestRenderer: Send + Sync {
    /// Render a template to a string
    fn render(&self, kind: TemplateKind, environment: &Environment) -> Result<String>;

    /// Render a template and write it to `dest`, replacing any existing file
    async fn render_to(
        &self,
        kind: TemplateKind,
        environment: &Environment,
        dest: &Path,
    ) -> Result<()> {
        let content = self.render(kind, environment)?;
        tokio::fs::write(dest, content)
            .await
            .map_err(|e| LifecycleError::io(dest, e))
    }
}

/// Values written into the templates that do not come from the environment
#[derive(Debug, Clone)]
pub struct TemplateParams {
    pub kubernetes_version: String,
    pub talos_version: String,
    pub omni_endpoint: String,
}

/// Renderer backed by the templates compiled into the crate
pub struct EmbeddedTemplates {
    env: TemplateEnv<'static>,
    params: TemplateParams,
}

impl EmbeddedTemplates {
    pub fn new(params: TemplateParams) -> Result<Self> {
        let mut env = TemplateEnv::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_filter("quote", quote);

        for (kind, source) in [
            (TemplateKind::ClaimBase, CLAIM_BASE_TEMPLATE),
            (TemplateKind::ClaimGpu, CLAIM_GPU_TEMPLATE),
            (TemplateKind::Cluster, CLUSTER_TEMPLATE),
            (TemplateKind::Kubeconfig, KUBECONFIG_TEMPLATE),
        ] {
            env.add_template(kind.template_name(), source)
                .map_err(|source| LifecycleError::Render {
                    template: kind,
                    source,
                })?;
        }

        Ok(Self { env, params })
    }
}

#[async_trait]
impl ManifestRenderer for EmbeddedTemplates {
    fn render(&self, kind: TemplateKind, environment: &Environment) -> Result<String> {
        let creds = &environment.credentials;
        let ctx = context! {
            name => &environment.name,
            control_plane => &environment.control_plane,
            workers => &environment.workers,
            gpus => &environment.gpus,
            tailscale_client_id => creds.tailscale_client_id.expose_secret(),
            tailscale_client_secret => creds.tailscale_client_secret.expose_secret(),
            github_token => creds.github_token.expose_secret(),
            kubernetes_version => &self.params.kubernetes_version,
            talos_version => &self.params.talos_version,
            omni_endpoint => self.params.omni_endpoint.trim_end_matches('/'),
        };

        self.env
            .get_template(kind.template_name())
            .and_then(|template| template.render(ctx))
            .map(|mut rendered| {
                if !rendered.ends_with('\n') {
                    rendered.push('\n');
                }
                rendered
            })
            .map_err(|source| LifecycleError::Render {
                template: kind,
                source,
            })
    }
}

/// Double-quoted YAML scalar
fn quote(value: String) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
