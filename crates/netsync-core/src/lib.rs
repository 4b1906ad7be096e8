//! Record stores, diff and reconcile engine for network source-of-truth sync.
//!
//! A reconciliation run builds two [`RecordStore`]s, one from live network
//! facts (source) and one from the [`Datastore`] (target), compares them with
//! [`diff`] into a [`ChangeSet`] and applies the changes through per-type
//! [`RecordHandler`]s with a [`Reconciler`].
//!
//! # Architecture
//!
//! ```text
//! source store ─┐
//!               ├─ diff(type order) ─> ChangeSet ─> Reconciler ─> handlers ─> Datastore
//! target store ─┘                                      │
//!                                                      └─ hooks (before/after apply)
//! ```
//!
//! All run-wide flags live in an immutable [`RunConfig`]; the type order it
//! carries is validated against handler dependencies by
//! [`HandlerRegistry::type_order`]. Related-object lookups go through the
//! per-run [`IdentifierCache`].

mod cache;
mod config;
mod datastore;
mod diff;
mod error;
mod handler;
mod reconcile;
mod record;
mod report;
mod store;

pub use cache::{CacheStats, IdentifierCache};
pub use config::{RunConfig, TypeOrder};
pub use datastore::{Datastore, Filter, ObjectAttrs, ObjectId, StoredObject};
pub use diff::{diff, Change, ChangeKind, ChangeSet, TypeChanges};
pub use error::{SyncError, SyncResult};
pub use handler::{
    load_target_store, HandlerContext, HandlerRegistry, Operation, RecordHandler, TargetScope,
};
pub use reconcile::{
    aggregation_rank, Reconciler, SyncHook, RANK_LAG, RANK_LAG_MEMBER, RANK_PLAIN,
};
pub use record::{Attributes, ChildRelation, Record, RecordFlags, RecordKey, RecordSchema};
pub use report::{ApplyOutcome, ApplyReport, RecordFailure, RunReport, TypeCounts};
pub use store::RecordStore;
