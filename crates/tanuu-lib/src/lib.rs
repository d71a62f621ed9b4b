//! Lifecycle library for ephemeral Omni-managed Kubernetes environments
//!
//! This crate provides the core functionality for:
//! - Rendering node-group claims, cluster templates and kubeconfigs
//! - Running `kubectl` and `omnictl` with bounded timeouts
//! - Polling node and cluster readiness
//! - Discovering and classifying the machines of an environment
//! - Orchestrating the create and delete workflows
//! - Metrics and structured logging

pub mod error;
pub mod inventory;
pub mod invoker;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod poller;
pub mod render;
pub mod settings;
pub mod suffix;
pub mod tools;

#[cfg(test)]
mod testing;

pub use error::{DeleteFailure, LifecycleError, Result};
pub use inventory::{AmbiguityPolicy, NodeInventory, RoleMatchScope};
pub use invoker::{CommandRunner, Invocation, InvocationOutput, ProcessRunner};
pub use models::*;
pub use observability::{LifecycleMetrics, StructuredLogger};
pub use orchestrator::{
    CreatePhase, CreateReport, DeletePhase, DeleteReport, Orchestrator, OrchestratorBuilder,
};
pub use poller::PollOutcome;
pub use render::{EmbeddedTemplates, ManifestRenderer, TemplateKind};
pub use settings::Settings;
