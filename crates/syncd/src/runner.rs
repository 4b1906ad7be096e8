//! One sync run end to end.
//!
//! ```text
//! inventory ─> plan commands ─> dispatch ─> extract ─> source records ─┐
//!                                                                       ├─ diff ─> apply (+ fix-up)
//!                               scoped datastore objects ─> target ─────┘
//! ```
//!
//! Host-level problems (unknown platform, unreachable device, missing
//! required facts, device not onboarded) exclude the host and are listed in
//! the run report; they never stop the run. Only contract violations and
//! invalid type orders end a run early, and the report carries the error.

use netsync_core::{
    diff, load_target_store, Datastore, HandlerContext, IdentifierCache, Reconciler, RecordStore,
    RunConfig, RunReport, SyncError, TargetScope,
};
use netsync_extract::{Extractor, MappingTable};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::command::HostTarget;
use crate::config_file::SyncConfig;
use crate::dispatcher::{Dispatcher, HostTask};
use crate::error::Result;
use crate::fixup::PrimaryIpFixup;
use crate::jobs::SyncJob;

/// Runs sync jobs against one datastore.
pub struct JobRunner {
    mappings: MappingTable,
    dispatcher: Dispatcher,
    datastore: Arc<dyn Datastore>,
    cache: IdentifierCache,
    sync: SyncConfig,
    dry_run: bool,
}

impl JobRunner {
    pub fn new(
        mappings: MappingTable,
        dispatcher: Dispatcher,
        datastore: Arc<dyn Datastore>,
        sync: SyncConfig,
    ) -> Self {
        Self {
            mappings,
            dispatcher,
            datastore,
            cache: IdentifierCache::new(),
            sync,
            dry_run: false,
        }
    }

    /// Computes and reports the diff without applying it.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Builds the immutable run configuration for a job.
    pub fn run_config(&self, job: &dyn SyncJob) -> netsync_core::SyncResult<RunConfig> {
        let order = job.registry().type_order(&job.type_order())?;
        let config = self
            .sync
            .unmatched_opt_out
            .iter()
            .fold(RunConfig::new(order), |config, kind| {
                config.with_unmatched_opt_out(kind.as_str())
            })
            .with_continue_on_failure(self.sync.continue_on_failure)
            .with_skip_unmatched_destination(self.sync.skip_unmatched_destination)
            .with_dry_run(self.dry_run);
        Ok(config)
    }

    /// Runs `job` over `hosts` and returns the run report.
    #[instrument(skip_all, fields(job = job.name(), hosts = hosts.len(), dry_run = self.dry_run))]
    pub async fn run(&self, job: &dyn SyncJob, hosts: &[HostTarget]) -> RunReport {
        let mut report = RunReport::new(job.name(), self.dry_run);
        self.cache.clear();

        if let Err(e) = self.execute(job, hosts, &mut report).await {
            error!(error = %e, "Run aborted");
            report.error = Some(e.to_string());
        }

        report.finish(self.cache.stats());
        info!(
            excluded = report.excluded_hosts.len(),
            failures = report.failures.len(),
            "Run finished"
        );
        report
    }

    async fn execute(&self, job: &dyn SyncJob, hosts: &[HostTarget], report: &mut RunReport) -> Result<()> {
        let config = self.run_config(job)?;
        let registry = job.registry();

        let mut tasks = Vec::with_capacity(hosts.len());
        for host in hosts {
            match self.mappings.commands_for(&host.platform, job.name()) {
                Ok(commands) => tasks.push(HostTask {
                    host: host.clone(),
                    commands,
                }),
                Err(e) => {
                    warn!(host = %host.address, platform = %host.platform, error = %e, "Host excluded");
                    report.exclude_host(&host.address, e);
                }
            }
        }
        let planned: Vec<HostTarget> = tasks.iter().map(|t| t.host.clone()).collect();
        let mut results = self.dispatcher.dispatch(tasks).await;

        let extractor = Extractor::new(&self.mappings);
        let unscoped = TargetScope::default();
        let lookup = HandlerContext::new(self.datastore.as_ref(), &self.cache, &unscoped);
        let mut source = RecordStore::new("network");
        let mut devices = BTreeSet::new();

        for host in &planned {
            let outputs = match results.remove(&host.address) {
                Some(Ok(outputs)) => outputs,
                Some(Err(e)) if e.is_contract_violation() => {
                    return Err(SyncError::unexpected_shape(
                        format!("command executor for {}", host.address),
                        "one result per requested command",
                        e.to_string(),
                    )
                    .into());
                }
                Some(Err(e)) => {
                    report.exclude_host(&host.address, e);
                    continue;
                }
                None => continue,
            };

            let record = match extractor.extract(&host.address, &host.platform, job.name(), &outputs) {
                Ok(record) => record,
                Err(e) => {
                    warn!(host = %host.address, error = %e, "Host excluded");
                    report.exclude_host(&host.address, e);
                    continue;
                }
            };
            if !record.empty_fields.is_empty() {
                report
                    .empty_fields
                    .insert(host.address.clone(), record.empty_fields.clone());
            }

            let missing = record.missing(job.required_fields());
            if !missing.is_empty() {
                let reason = format!("missing required fields: {}", missing.join(", "));
                warn!(host = %host.address, reason = %reason, "Host excluded");
                report.exclude_host(&host.address, reason);
                continue;
            }

            let records = job
                .device_name(&lookup, host, &record)
                .and_then(|device| {
                    job.source_records(&lookup, host, &record, &device)
                        .map(|records| (device, records))
                });
            let (device, records) = match records {
                Ok(built) => built,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(host = %host.address, error = %e, "Host excluded");
                    report.exclude_host(&host.address, e);
                    continue;
                }
            };

            debug!(host = %host.address, device = %device, records = records.len(), "Source records built");
            for record in records {
                if !config.type_order().contains(record.kind()) {
                    continue;
                }
                // shared objects (VLANs of one location) come from several hosts
                if source.get(record.kind(), record.key()) == Some(&record) {
                    continue;
                }
                source.add_or_warn(record);
            }
            devices.insert(device);
        }

        let scope = TargetScope::new(devices);
        let ctx = HandlerContext::new(self.datastore.as_ref(), &self.cache, &scope);
        let target = load_target_store(&registry, config.type_order(), &ctx)?;
        let changes = diff(&source, &target, &config);
        info!(summary = %changes.summary(), "Diff computed");

        if self.dry_run {
            report.counts = changes
                .types()
                .map(|t| (t.kind.to_string(), t.counts()))
                .collect();
            return Ok(());
        }

        let fixup = PrimaryIpFixup::new();
        let mut reconciler = Reconciler::new(&registry, &config);
        if job.repairs_primary_ip() {
            reconciler = reconciler.with_hook(&fixup);
        }
        let applied = reconciler.apply(&ctx, &changes)?;
        report.record_apply(applied);
        report.repaired_primary_ips = fixup.repaired();
        Ok(())
    }
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("dispatcher", &self.dispatcher)
            .field("sync", &self.sync)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandExecutor, CommandOutputs};
    use crate::datastore::MemoryDatastore;
    use crate::error::CommandError;
    use crate::jobs::{JobParams, SyncDevices, SyncNetworkData};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct Unreachable;

    #[async_trait]
    impl CommandExecutor for Unreachable {
        async fn run(&self, host: &HostTarget, _commands: &[String]) -> std::result::Result<CommandOutputs, CommandError> {
            Err(CommandError::unreachable(&host.address, "connection refused"))
        }
    }

    fn runner(sync: SyncConfig) -> JobRunner {
        JobRunner::new(
            MappingTable::builtin().unwrap(),
            Dispatcher::new(Arc::new(Unreachable), 2),
            Arc::new(MemoryDatastore::new()),
            sync,
        )
    }

    #[tokio::test]
    async fn test_unknown_platform_and_unreachable_hosts_are_excluded() {
        let hosts = vec![
            HostTarget::new("10.0.0.1", "junos"),
            HostTarget::new("10.0.0.2", "arista_eos"),
        ];
        let report = runner(SyncConfig::default()).run(&SyncDevices::new(), &hosts).await;

        assert_eq!(
            report.excluded_hosts.keys().collect::<Vec<_>>(),
            vec!["10.0.0.1", "10.0.0.2"]
        );
        assert!(report.excluded_hosts["10.0.0.2"].contains("unreachable"));
        assert!(report.error.is_none());
        assert_eq!(report.totals().created, 0);
        assert!(report.finished_at.is_some());
    }

    struct Bogus;

    #[async_trait]
    impl CommandExecutor for Bogus {
        async fn run(&self, _host: &HostTarget, _commands: &[String]) -> std::result::Result<CommandOutputs, CommandError> {
            let mut outputs = CommandOutputs::new();
            outputs.insert("bogus".into(), Ok(netsync_extract::RawOutput::text("{}")));
            Ok(outputs)
        }
    }

    #[tokio::test]
    async fn test_mismatched_command_outputs_abort_the_run() {
        let datastore = Arc::new(MemoryDatastore::new());
        let runner = JobRunner::new(
            MappingTable::builtin().unwrap(),
            Dispatcher::new(Arc::new(Bogus), 2),
            datastore.clone(),
            SyncConfig::default(),
        );
        let hosts = vec![HostTarget::new("10.0.0.1", "arista_eos").with_location("dc1")];
        let report = runner.run(&SyncDevices::new(), &hosts).await;

        let error = report.error.as_deref().unwrap();
        assert!(error.starts_with("Unexpected result shape"), "{}", error);
        assert!(error.contains("'bogus'"), "{}", error);
        assert!(report.excluded_hosts.is_empty());
        assert!(!report.is_clean());
        assert_eq!(datastore.count("device"), 0);
    }

    #[test]
    fn test_run_config_carries_flags() {
        let sync = SyncConfig {
            continue_on_failure: true,
            skip_unmatched_destination: true,
            unmatched_opt_out: vec!["interface".to_string()],
            include_vrfs: false,
            ..SyncConfig::default()
        };
        let job = SyncNetworkData::new(JobParams::new(sync.clone()));
        let config = runner(sync).with_dry_run(true).run_config(&job).unwrap();

        assert!(config.continue_on_failure);
        assert!(config.dry_run);
        assert!(config.skips_unmatched("vlan"));
        assert!(!config.skips_unmatched("interface"));
        assert!(!config.type_order().contains("vrf"));
    }
}
