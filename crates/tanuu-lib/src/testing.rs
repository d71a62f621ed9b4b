//! Test doubles shared by the unit tests

use crate::error::Result;
use crate::invoker::{CommandRunner, Invocation, InvocationOutput};
use async_trait::async_trait;
use std::sync::Mutex;

type Handler = Box<dyn Fn(&Invocation) -> InvocationOutput + Send + Sync>;

/// Command runner that answers from a closure and records every call
pub(crate) struct ScriptedRunner {
    handler: Handler,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub(crate) fn new<F>(handler: F) -> Self
    where
        F: Fn(&Invocation) -> InvocationOutput + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Rendered command lines in call order
    pub(crate) fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<InvocationOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        Ok((self.handler)(invocation))
    }
}

/// `omnictl get machinestatus -o json` payload for one machine
pub(crate) fn machine_status_json(id: &str, hostname: &str) -> String {
    serde_json::json!({
        "metadata": {
            "namespace": "default",
            "type": "MachineStatuses.omni.sidero.dev",
            "id": id,
        },
        "spec": {
            "connected": true,
            "platformmetadata": { "hostname": hostname },
        },
    })
    .to_string()
}
