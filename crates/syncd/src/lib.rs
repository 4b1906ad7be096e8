//! Network source-of-truth sync daemon
//!
//! Collects command output from network devices, extracts canonical facts
//! with the platform mapping tables and reconciles them into the datastore.
//!
//! - [`command`]: the command collaborator (SSH-style shell transport, replay)
//! - [`dispatcher`]: bounded parallel host dispatch with per-host isolation
//! - [`jobs`]: the `sync_devices` and `sync_network_data` jobs
//! - [`runner`]: one run from inventory to run report
//! - [`datastore`]: the in-memory datastore with its JSON snapshot

pub mod command;
pub mod config_file;
pub mod datastore;
pub mod dispatcher;
pub mod error;
pub mod fixup;
pub mod jobs;
pub mod runner;

pub use command::{CommandExecutor, CommandOutputs, HostTarget, ReplayExecutor, ShellCommandExecutor};
pub use config_file::{DatastoreConfig, DispatcherConfig, MappingsConfig, NetsyncConfig, SyncConfig};
pub use datastore::{kinds, MemoryDatastore};
pub use dispatcher::{Dispatcher, HostResult, HostTask};
pub use error::{CommandError, JobError, Result};
pub use fixup::PrimaryIpFixup;
pub use jobs::{JobParams, SyncDevices, SyncJob, SyncNetworkData};
pub use runner::JobRunner;
