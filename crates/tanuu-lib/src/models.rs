//! Core data models for environment lifecycle operations

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pass-through credentials rendered into the manifests
#[derive(Debug, Clone)]
pub struct Credentials {
    pub tailscale_client_id: SecretString,
    pub tailscale_client_secret: SecretString,
    pub github_token: SecretString,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            tailscale_client_id: SecretString::new(String::new()),
            tailscale_client_secret: SecretString::new(String::new()),
            github_token: SecretString::new(String::new()),
        }
    }
}

/// The unit of work for create and delete workflows.
///
/// Node lists start empty and are filled in place once discovery has run.
#[derive(Debug, Clone)]
pub struct Environment {
    pub name: String,
    pub gpu_requested: bool,
    pub control_plane: Vec<String>,
    pub workers: Vec<String>,
    pub gpus: Vec<String>,
    pub credentials: Credentials,
}

impl Environment {
    pub fn new(name: impl Into<String>, gpu_requested: bool, credentials: Credentials) -> Self {
        Self {
            name: name.into(),
            gpu_requested,
            control_plane: Vec::new(),
            workers: Vec::new(),
            gpus: Vec::new(),
            credentials,
        }
    }

    /// Replace the node lists with a discovered topology
    pub fn apply_topology(&mut self, topology: NodeTopology) {
        self.control_plane = topology.control_plane;
        self.workers = topology.workers;
        self.gpus = topology.gpus;
    }
}

/// Node role derived from a machine hostname
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    ControlPlane,
    Worker,
    Gpu,
}

impl Role {
    /// Hostname token that marks this role
    pub fn token(&self) -> &'static str {
        match self {
            Role::ControlPlane => "ctlr",
            Role::Worker => "worker",
            Role::Gpu => "gpu",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::ControlPlane => write!(f, "control-plane"),
            Role::Worker => write!(f, "worker"),
            Role::Gpu => write!(f, "gpu"),
        }
    }
}

/// A machine reported by the fleet manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub hostname: String,
    pub connected: bool,
}

/// Machine ids of one environment grouped by role, in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTopology {
    pub control_plane: Vec<String>,
    pub workers: Vec<String>,
    pub gpus: Vec<String>,
}

impl NodeTopology {
    pub fn push(&mut self, role: Role, machine_id: String) {
        match role {
            Role::ControlPlane => self.control_plane.push(machine_id),
            Role::Worker => self.workers.push(machine_id),
            Role::Gpu => self.gpus.push(machine_id),
        }
    }

    pub fn len(&self) -> usize {
        self.control_plane.len() + self.workers.len() + self.gpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
