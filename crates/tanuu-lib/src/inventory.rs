//! Node inventory
//!
//! Lists fleet machines, fetches each machine's status and turns the
//! ones belonging to an environment into a [`NodeTopology`]. Hostnames
//! are the only classification signal.

use crate::error::{LifecycleError, Result};
use crate::models::{Machine, NodeTopology, Role};
use crate::tools::OmniCtl;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Role tokens in precedence order
const ROLE_PRECEDENCE: [Role; 3] = [Role::Gpu, Role::Worker, Role::ControlPlane];

/// What to do with a hostname that matches more than one role token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguityPolicy {
    /// Leave the machine out of every bucket
    #[default]
    Drop,
    /// Pick gpu, then worker, then control plane
    Priority,
    /// Fail discovery
    Reject,
}

impl fmt::Display for AmbiguityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmbiguityPolicy::Drop => write!(f, "drop"),
            AmbiguityPolicy::Priority => write!(f, "priority"),
            AmbiguityPolicy::Reject => write!(f, "reject"),
        }
    }
}

/// Which part of a hostname is searched for role tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleMatchScope {
    /// The whole hostname, environment name included
    #[default]
    Hostname,
    /// The hostname with the first occurrence of the environment name
    /// removed, so `gpu-lab-1a2b-worker-0` in `gpu-lab-1a2b` is a worker
    Remainder,
}

impl fmt::Display for RoleMatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleMatchScope::Hostname => write!(f, "hostname"),
            RoleMatchScope::Remainder => write!(f, "remainder"),
        }
    }
}

/// Where a hostname lands relative to one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Hostname does not contain the environment name
    Excluded,
    /// Exactly one role token matched
    Role(Role),
    /// Belongs to the environment but carries no role token
    Unmatched,
    /// Several role tokens matched, listed in precedence order
    Ambiguous(Vec<Role>),
}

/// Classify a hostname for `environment`.
///
/// A hostname belongs to the environment when it contains its name. Role
/// tokens are then matched as substrings of the part selected by `scope`.
pub fn classify(hostname: &str, environment: &str, scope: RoleMatchScope) -> Placement {
    let Some(pos) = hostname.find(environment) else {
        return Placement::Excluded;
    };

    let searched = match scope {
        RoleMatchScope::Hostname => hostname.to_string(),
        RoleMatchScope::Remainder => format!(
            "{}{}",
            &hostname[..pos],
            &hostname[pos + environment.len()..]
        ),
    };

    let roles: Vec<Role> = ROLE_PRECEDENCE
        .into_iter()
        .filter(|role| searched.contains(role.token()))
        .collect();

    match roles.as_slice() {
        [] => Placement::Unmatched,
        [role] => Placement::Role(*role),
        _ => Placement::Ambiguous(roles),
    }
}

/// Resolve a machine's bucket under `policy`; `None` leaves it out
pub fn assign(
    machine: &Machine,
    environment: &str,
    scope: RoleMatchScope,
    policy: AmbiguityPolicy,
) -> Result<Option<Role>> {
    match classify(&machine.hostname, environment, scope) {
        Placement::Role(role) => Ok(Some(role)),
        Placement::Excluded | Placement::Unmatched => Ok(None),
        Placement::Ambiguous(roles) => match policy {
            AmbiguityPolicy::Drop => Ok(None),
            AmbiguityPolicy::Priority => Ok(roles.first().copied()),
            AmbiguityPolicy::Reject => Err(LifecycleError::AmbiguousMachine {
                machine_id: machine.id.clone(),
                hostname: machine.hostname.clone(),
            }),
        },
    }
}

/// Reads machine inventory from the fleet manager
pub struct NodeInventory {
    omnictl: OmniCtl,
    concurrency: usize,
    scope: RoleMatchScope,
    policy: AmbiguityPolicy,
}

impl NodeInventory {
    pub fn new(
        omnictl: OmniCtl,
        concurrency: usize,
        scope: RoleMatchScope,
        policy: AmbiguityPolicy,
    ) -> Self {
        Self {
            omnictl,
            concurrency: concurrency.max(1),
            scope,
            policy,
        }
    }

    /// Every machine whose hostname contains `environment`, in listing order.
    ///
    /// Status calls run with bounded concurrency. The first failure aborts
    /// the whole read and drops the calls still in flight.
    pub async fn machines_for(&self, environment: &str) -> Result<Vec<Machine>> {
        let ids = self
            .omnictl
            .list_machine_ids()
            .await
            .map_err(|e| LifecycleError::discovery("listing machines", e))?;

        debug!(machines = ids.len(), "Fetching machine status");

        let omnictl = &self.omnictl;
        let machines: Vec<Machine> = stream::iter(ids)
            .map(move |id| async move {
                omnictl
                    .machine_status(&id)
                    .await
                    .map_err(|e| LifecycleError::discovery("fetching machine status", e))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(machines
            .into_iter()
            .filter(|machine| machine.hostname.contains(environment))
            .collect())
    }

    /// Discover and bucket the machines of `environment`.
    ///
    /// Empty buckets are valid; the caller decides whether that is enough.
    pub async fn discover(&self, environment: &str) -> Result<NodeTopology> {
        let mut topology = NodeTopology::default();

        for machine in self.machines_for(environment).await? {
            match assign(&machine, environment, self.scope, self.policy)? {
                Some(role) => {
                    debug!(
                        machine_id = %machine.id,
                        hostname = %machine.hostname,
                        role = %role,
                        "Classified machine"
                    );
                    topology.push(role, machine.id);
                }
                None => {
                    debug!(
                        machine_id = %machine.id,
                        hostname = %machine.hostname,
                        scope = %self.scope,
                        policy = %self.policy,
                        "Machine has no unambiguous role, leaving it out"
                    );
                }
            }
        }

        Ok(topology)
    }
}
