//! Host task dispatcher.
//!
//! Every host gets one task that runs its commands in declared order. Tasks
//! run in parallel up to `max_workers`; a host's failure is recorded under
//! its own key and never cancels other hosts. [`Dispatcher::dispatch`]
//! returns only once every task has finished.

use dashmap::DashMap;
use netsync_extract::HostOutputs;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::command::{CommandExecutor, HostTarget};
use crate::error::CommandError;

/// Outcome of collecting one host's outputs.
pub type HostResult = Result<HostOutputs, CommandError>;

/// A host together with the commands to run on it.
#[derive(Debug, Clone)]
pub struct HostTask {
    pub host: HostTarget,
    pub commands: Vec<String>,
}

/// Fans command collection out over a bounded worker pool.
pub struct Dispatcher {
    executor: Arc<dyn CommandExecutor>,
    max_workers: usize,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn CommandExecutor>, max_workers: usize) -> Self {
        Self {
            executor,
            max_workers: max_workers.max(1),
        }
    }

    /// Returns the worker limit.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Runs every task and returns the per-host results keyed by address.
    #[instrument(skip_all, fields(hosts = tasks.len(), workers = self.max_workers))]
    pub async fn dispatch(&self, tasks: Vec<HostTask>) -> BTreeMap<String, HostResult> {
        let results: Arc<DashMap<String, HostResult>> = Arc::new(DashMap::new());
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let addresses: Vec<String> = tasks.iter().map(|t| t.host.address.clone()).collect();
        let mut set = JoinSet::new();

        for task in tasks {
            let executor = Arc::clone(&self.executor);
            let permits = Arc::clone(&permits);
            let results = Arc::clone(&results);
            set.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let address = task.host.address.clone();
                debug!(host = %address, commands = task.commands.len(), "Collecting outputs");
                let result = collect(executor.as_ref(), &task).await;
                results.insert(address, result);
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Host task ended abnormally");
            }
        }

        let mut collected = BTreeMap::new();
        for address in addresses {
            let result = results
                .remove(&address)
                .map(|(_, result)| result)
                .unwrap_or_else(|| Err(CommandError::unreachable(&address, "host task aborted")));
            if let Err(err) = &result {
                warn!(host = %address, error = %err, "Host excluded");
            }
            collected.insert(address, result);
        }

        let failed = collected.values().filter(|r| r.is_err()).count();
        info!(hosts = collected.len(), failed, "Dispatch complete");
        collected
    }
}

/// Runs one host's commands and keeps the outputs that succeeded.
///
/// The executor must answer exactly the commands it was given.
async fn collect(executor: &dyn CommandExecutor, task: &HostTask) -> HostResult {
    let outputs = executor.run(&task.host, &task.commands).await?;
    let requested: BTreeSet<&str> = task.commands.iter().map(String::as_str).collect();
    if let Some(extra) = outputs.keys().find(|c| !requested.contains(c.as_str())) {
        return Err(CommandError::UnexpectedOutputs {
            host: task.host.address.clone(),
            message: format!("output for unrequested command '{}'", extra),
        });
    }
    if let Some(missing) = task.commands.iter().find(|c| !outputs.contains_key(c.as_str())) {
        return Err(CommandError::UnexpectedOutputs {
            host: task.host.address.clone(),
            message: format!("no result for command '{}'", missing),
        });
    }

    let mut collected = HostOutputs::new();
    for (command, result) in outputs {
        match result {
            Ok(raw) => {
                collected.insert(command, raw);
            }
            Err(err) if err.is_host_fatal() => return Err(err),
            Err(err) => {
                debug!(host = %task.host.address, command = %command, error = %err, "Skipping failed command");
            }
        }
    }
    Ok(collected)
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("max_workers", &self.max_workers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutputs;
    use async_trait::async_trait;
    use netsync_extract::RawOutput;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeExecutor {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl CommandExecutor for FakeExecutor {
        async fn run(&self, host: &HostTarget, commands: &[String]) -> Result<CommandOutputs, CommandError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if host.address == "10.0.0.2" {
                return Err(CommandError::unreachable(&host.address, "no route to host"));
            }
            let mut outputs = CommandOutputs::new();
            for command in commands {
                if command == "show inventory" {
                    outputs.insert(
                        command.clone(),
                        Err(CommandError::CommandFailed {
                            host: host.address.clone(),
                            command: command.clone(),
                            exit_code: 1,
                            output: "% Invalid input".into(),
                        }),
                    );
                } else {
                    outputs.insert(command.clone(), Ok(RawOutput::text(host.address.clone())));
                }
            }
            Ok(outputs)
        }
    }

    fn task(address: &str) -> HostTask {
        HostTask {
            host: HostTarget::new(address, "arista_eos"),
            commands: vec!["show version".into(), "show inventory".into()],
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_workers_bounded() {
        let executor = Arc::new(FakeExecutor {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(executor.clone(), 2);
        let results = dispatcher
            .dispatch(vec![task("10.0.0.1"), task("10.0.0.2"), task("10.0.0.3"), task("10.0.0.4")])
            .await;

        assert_eq!(results.len(), 4);
        assert!(matches!(results["10.0.0.2"], Err(CommandError::DeviceUnreachable { .. })));
        let outputs = results["10.0.0.1"].as_ref().unwrap();
        assert_eq!(outputs.keys().collect::<Vec<_>>(), vec!["show version"]);
        assert!(results["10.0.0.3"].is_ok());
        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
    }

    struct Bogus;

    #[async_trait]
    impl CommandExecutor for Bogus {
        async fn run(&self, _host: &HostTarget, _commands: &[String]) -> Result<CommandOutputs, CommandError> {
            let mut outputs = CommandOutputs::new();
            outputs.insert("bogus".into(), Ok(RawOutput::text("")));
            Ok(outputs)
        }
    }

    #[tokio::test]
    async fn test_mismatched_outputs_are_a_contract_violation() {
        let dispatcher = Dispatcher::new(Arc::new(Bogus), 1);
        let results = dispatcher.dispatch(vec![task("10.0.0.1")]).await;

        let err = results["10.0.0.1"].as_ref().unwrap_err();
        assert!(err.is_contract_violation());
        assert!(err.to_string().contains("'bogus'"));
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let executor = Arc::new(FakeExecutor {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        assert_eq!(Dispatcher::new(executor, 0).max_workers(), 1);
    }
}
