//! Scripted command collaborator
//!
//! Answers commands from canned per-host outputs. Hosts can be made to fail
//! as a whole, and a command without a canned output fails the way a device
//! rejects an unknown command.

use async_trait::async_trait;
use netsync_extract::{HostOutputs, RawOutput};
use netsync_syncd::{CommandError, CommandExecutor, CommandOutputs, HostTarget};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone)]
enum Script {
    Outputs(HostOutputs),
    Fail(CommandError),
}

/// [`CommandExecutor`] driven by canned outputs.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: RwLock<BTreeMap<String, Script>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts (or re-scripts) the outputs of a host.
    pub fn set_outputs(&self, address: &str, outputs: HostOutputs) {
        self.scripts
            .write()
            .insert(address.to_string(), Script::Outputs(outputs));
    }

    /// Makes every session to the host fail with `error`.
    pub fn set_failure(&self, address: &str, error: CommandError) {
        self.scripts
            .write()
            .insert(address.to_string(), Script::Fail(error));
    }

    /// Replaces one command's output of an already scripted host.
    pub fn set_output(&self, address: &str, command: &str, output: RawOutput) {
        let mut scripts = self.scripts.write();
        let entry = scripts
            .entry(address.to_string())
            .or_insert_with(|| Script::Outputs(HostOutputs::new()));
        match entry {
            Script::Outputs(outputs) => {
                outputs.insert(command.to_string(), output);
            }
            Script::Fail(_) => {
                let mut outputs = HostOutputs::new();
                outputs.insert(command.to_string(), output);
                *entry = Script::Outputs(outputs);
            }
        }
    }

    /// Commands run so far, as `(host, command)` pairs.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    /// Hosts contacted so far, without duplicates.
    pub fn contacted_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.calls.lock().iter().map(|(h, _)| h.clone()).collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, host: &HostTarget, commands: &[String]) -> Result<CommandOutputs, CommandError> {
        let script = self.scripts.read().get(&host.address).cloned();
        {
            let mut calls = self.calls.lock();
            for command in commands {
                calls.push((host.address.clone(), command.clone()));
            }
        }

        let outputs = match script {
            Some(Script::Outputs(outputs)) => outputs,
            Some(Script::Fail(error)) => return Err(error),
            None => {
                return Err(CommandError::unreachable(&host.address, "no route to host"));
            }
        };

        let mut results = CommandOutputs::new();
        for command in commands {
            let result = match outputs.get(command) {
                Some(output) => Ok(output.clone()),
                None => Err(CommandError::CommandFailed {
                    host: host.address.clone(),
                    command: command.clone(),
                    exit_code: 1,
                    output: "% Invalid input detected".to_string(),
                }),
            };
            debug!(host = %host.address, command = %command, ok = result.is_ok(), "Scripted command");
            results.insert(command.clone(), result);
        }
        Ok(results)
    }
}
