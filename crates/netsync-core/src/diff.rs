//! Classification of source vs. target records into a change set.

use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, instrument};

use crate::config::RunConfig;
use crate::record::{Record, RecordKey};
use crate::report::TypeCounts;
use crate::store::RecordStore;

/// Classification of one (type, identifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Present only in the source store.
    Create,
    /// Present in both stores with at least one differing attribute.
    Update,
    /// Present only in the target store and not protected from deletion.
    Delete,
    /// Present in both stores with identical attributes.
    NoOp,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
            ChangeKind::NoOp => "no-op",
        };
        f.write_str(name)
    }
}

/// One classified record.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<'a> {
    pub kind: ChangeKind,
    pub key: &'a RecordKey,
    /// Source record (carries the full new attribute set for updates).
    pub source: Option<&'a Record>,
    pub target: Option<&'a Record>,
    /// Names of differing attributes; empty unless `kind` is `Update`.
    pub changed: Vec<String>,
}

impl<'a> Change<'a> {
    /// Returns the record the change is about: the source record when
    /// present, otherwise the target record.
    pub fn record(&self) -> Option<&'a Record> {
        self.source.or(self.target)
    }

    /// Returns true for create, update and delete.
    pub fn is_actionable(&self) -> bool {
        self.kind != ChangeKind::NoOp
    }
}

/// All classified records of one type, in identifier order.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeChanges<'a> {
    pub kind: &'static str,
    pub changes: Vec<Change<'a>>,
    /// Target-only records kept because of the unmatched-destination rule.
    pub skipped: usize,
}

impl<'a> TypeChanges<'a> {
    /// Iterates the changes of one classification.
    pub fn of(&self, kind: ChangeKind) -> impl Iterator<Item = &Change<'a>> {
        self.changes.iter().filter(move |c| c.kind == kind)
    }

    /// Planned per-type counts.
    pub fn counts(&self) -> TypeCounts {
        let mut counts = TypeCounts {
            skipped: self.skipped,
            ..TypeCounts::default()
        };
        for change in &self.changes {
            match change.kind {
                ChangeKind::Create => counts.created += 1,
                ChangeKind::Update => counts.updated += 1,
                ChangeKind::Delete => counts.deleted += 1,
                ChangeKind::NoOp => counts.unchanged += 1,
            }
        }
        counts
    }
}

/// Result of comparing two stores, one entry per type in apply order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet<'a> {
    types: Vec<TypeChanges<'a>>,
}

impl<'a> ChangeSet<'a> {
    /// Iterates the per-type changes in apply order.
    pub fn types(&self) -> impl Iterator<Item = &TypeChanges<'a>> {
        self.types.iter()
    }

    /// Returns the changes of one type.
    pub fn for_type(&self, kind: &str) -> Option<&TypeChanges<'a>> {
        self.types.iter().find(|t| t.kind == kind)
    }

    /// Iterates the actionable (create/update/delete) changes.
    pub fn actionable(&self) -> impl Iterator<Item = &Change<'a>> {
        self.types
            .iter()
            .flat_map(|t| t.changes.iter())
            .filter(|c| c.is_actionable())
    }

    /// Returns true if nothing needs to be created, updated or deleted.
    pub fn is_empty(&self) -> bool {
        self.actionable().next().is_none()
    }

    /// Returns a one-line summary of the planned changes.
    pub fn summary(&self) -> String {
        let total = self
            .types
            .iter()
            .map(TypeChanges::counts)
            .fold(TypeCounts::default(), |acc, c| acc.merged(&c));
        format!(
            "{} create, {} update, {} delete, {} unchanged, {} skipped",
            total.created, total.updated, total.deleted, total.unchanged, total.skipped
        )
    }
}

/// Compares `source` against `target` for every type of the run's order.
///
/// Types outside the order are ignored. Within a type, records are visited
/// in identifier order so the result is deterministic.
#[instrument(skip_all, fields(source = source.len(), target = target.len()))]
pub fn diff<'a>(
    source: &'a RecordStore,
    target: &'a RecordStore,
    config: &RunConfig,
) -> ChangeSet<'a> {
    let mut types = Vec::with_capacity(config.type_order().len());

    for kind in config.type_order().iter() {
        let keys: BTreeSet<&RecordKey> = source.keys(kind).chain(target.keys(kind)).collect();
        let mut changes = Vec::with_capacity(keys.len());
        let mut skipped = 0;

        for key in keys {
            let src = source.get(kind, key);
            let dst = target.get(kind, key);

            let change = match (src, dst) {
                (Some(s), None) => Change {
                    kind: ChangeKind::Create,
                    key,
                    source: Some(s),
                    target: None,
                    changed: Vec::new(),
                },
                (None, Some(t)) => {
                    if t.flags().skips_unmatched_destination() || config.skips_unmatched(kind) {
                        debug!(kind = %kind, key = %key, "Keeping unmatched target record");
                        skipped += 1;
                        continue;
                    }
                    Change {
                        kind: ChangeKind::Delete,
                        key,
                        source: None,
                        target: Some(t),
                        changed: Vec::new(),
                    }
                }
                (Some(s), Some(t)) => {
                    let changed = s.changed_attributes(t);
                    Change {
                        kind: if changed.is_empty() {
                            ChangeKind::NoOp
                        } else {
                            ChangeKind::Update
                        },
                        key,
                        source: Some(s),
                        target: Some(t),
                        changed,
                    }
                }
                (None, None) => continue,
            };
            changes.push(change);
        }

        types.push(TypeChanges {
            kind,
            changes,
            skipped,
        });
    }

    let set = ChangeSet { types };
    debug!(summary = %set.summary(), "Diff complete");
    set
}
