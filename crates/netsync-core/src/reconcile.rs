//! Apply engine: walks a change set in dependency-safe order and drives the
//! per-type handlers.
//!
//! Types are applied in the run's type order. Within a type, creates run
//! before updates and updates before deletes; the handler's apply rank adds
//! a secondary order (ascending for create/update, descending for delete).
//! Operations a type forbids are skipped without calling the handler.

use std::cmp::Reverse;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RunConfig;
use crate::diff::{Change, ChangeKind, ChangeSet, TypeChanges};
use crate::error::{SyncError, SyncResult};
use crate::handler::{HandlerContext, HandlerRegistry, Operation, RecordHandler};
use crate::record::Record;
use crate::report::{ApplyOutcome, ApplyReport, RecordFailure};

/// Rank of a plain interface.
pub const RANK_PLAIN: u8 = 0;
/// Rank of an interface that is itself a link-aggregation group.
pub const RANK_LAG: u8 = 1;
/// Rank of an interface that is a member of a link-aggregation group.
pub const RANK_LAG_MEMBER: u8 = 2;

/// Apply rank for interfaces: plain interfaces, then lags, then lag
/// members. Only one level of aggregation is distinguished; anything with a
/// parent `lag` ranks as a member.
pub fn aggregation_rank(record: &Record) -> u8 {
    if record.attr("lag").is_some() {
        RANK_LAG_MEMBER
    } else if record.attr_str("type") == Some("lag") {
        RANK_LAG
    } else {
        RANK_PLAIN
    }
}

/// Hook run around the apply phase.
pub trait SyncHook: Send + Sync {
    /// Hook name used in logs and failure entries.
    fn name(&self) -> &str;

    /// Runs before any change is applied.
    fn before_apply(&self, _ctx: &HandlerContext<'_>, _changes: &ChangeSet<'_>) -> SyncResult<()> {
        Ok(())
    }

    /// Runs after all types were applied, including after a record-level
    /// abort. Not run after a fatal abort.
    fn after_apply(&self, _ctx: &HandlerContext<'_>, _report: &ApplyReport) -> SyncResult<()> {
        Ok(())
    }
}

/// Drives handlers for one run.
pub struct Reconciler<'r> {
    registry: &'r HandlerRegistry,
    config: &'r RunConfig,
    hooks: Vec<&'r dyn SyncHook>,
}

impl<'r> Reconciler<'r> {
    pub fn new(registry: &'r HandlerRegistry, config: &'r RunConfig) -> Self {
        Self {
            registry,
            config,
            hooks: Vec::new(),
        }
    }

    /// Adds a hook; hooks run in registration order.
    pub fn with_hook(mut self, hook: &'r dyn SyncHook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Applies a change set.
    ///
    /// Record-level failures are collected in the report; without
    /// continue-on-failure the first one stops the remaining changes.
    /// Fatal errors (contract violations) always stop the run.
    ///
    /// # Errors
    ///
    /// Returns an error only when a type in the change set has no handler
    /// or a `before_apply` hook fails; nothing has been applied then.
    #[instrument(skip_all, fields(types = self.config.type_order().len()))]
    pub fn apply(&self, ctx: &HandlerContext<'_>, changes: &ChangeSet<'_>) -> SyncResult<ApplyReport> {
        let mut report = ApplyReport::default();
        for type_changes in changes.types() {
            self.registry.get(type_changes.kind)?;
            let planned = type_changes.counts();
            let counts = report.counts_mut(type_changes.kind);
            counts.unchanged = planned.unchanged;
            counts.skipped = planned.skipped;
        }

        for hook in &self.hooks {
            debug!(hook = hook.name(), "Running before-apply hook");
            hook.before_apply(ctx, changes)?;
        }

        let mut fatal = false;
        'types: for type_changes in changes.types() {
            let handler = self.registry.get(type_changes.kind)?;

            for (op, change) in plan(handler, type_changes) {
                if !handler.permits(op) {
                    info!(
                        kind = type_changes.kind,
                        key = %change.key,
                        op = %op,
                        "Operation not permitted for this type, skipping"
                    );
                    report.counts_mut(type_changes.kind).forbidden += 1;
                    continue;
                }

                match self.apply_one(ctx, handler, op, change) {
                    Ok(()) => {
                        let counts = report.counts_mut(type_changes.kind);
                        match op {
                            Operation::Create => counts.created += 1,
                            Operation::Update => counts.updated += 1,
                            Operation::Delete => counts.deleted += 1,
                        }
                    }
                    Err(err) => {
                        let failure = failure_entry(type_changes.kind, op, change, &err);
                        error!(
                            kind = type_changes.kind,
                            key = %change.key,
                            op = %op,
                            attributes = %failure.attributes,
                            error = %err,
                            "Failed to apply change"
                        );
                        report.counts_mut(type_changes.kind).failed += 1;
                        report.failures.push(failure);

                        if err.is_fatal() || !self.config.continue_on_failure {
                            fatal = err.is_fatal();
                            report.outcome = ApplyOutcome::Aborted {
                                kind: type_changes.kind.to_string(),
                                key: change.key.to_string(),
                                message: err.to_string(),
                                fatal,
                            };
                            warn!(kind = type_changes.kind, key = %change.key, fatal, "Aborting reconciliation");
                            break 'types;
                        }
                    }
                }
            }
        }

        if !fatal {
            for hook in &self.hooks {
                debug!(hook = hook.name(), "Running after-apply hook");
                if let Err(err) = hook.after_apply(ctx, &report) {
                    error!(hook = hook.name(), error = %err, "After-apply hook failed");
                    report.failures.push(RecordFailure {
                        kind: hook.name().to_string(),
                        key: String::new(),
                        operation: Operation::Update,
                        attributes: serde_json::Value::Null,
                        message: err.to_string(),
                    });
                }
            }
        }

        let totals = report.totals();
        info!(
            created = totals.created,
            updated = totals.updated,
            deleted = totals.deleted,
            failed = totals.failed,
            forbidden = totals.forbidden,
            "Apply complete"
        );
        Ok(report)
    }

    fn apply_one(
        &self,
        ctx: &HandlerContext<'_>,
        handler: &dyn RecordHandler,
        op: Operation,
        change: &Change<'_>,
    ) -> SyncResult<()> {
        match (op, change.source, change.target) {
            (Operation::Create, Some(source), _) => handler.create(ctx, source),
            (Operation::Update, Some(source), Some(target)) => {
                handler.update(ctx, source, target, &change.changed)
            }
            (Operation::Delete, _, Some(target)) => handler.delete(ctx, target),
            _ => Err(SyncError::unexpected_shape(
                format!("{} change set", handler.kind()),
                format!("records for {}", op),
                format!("{:?}", change.kind),
            )),
        }
    }
}

/// Orders one type's changes into (operation, change) pairs.
fn plan<'c, 'a>(
    handler: &dyn RecordHandler,
    changes: &'c TypeChanges<'a>,
) -> Vec<(Operation, &'c Change<'a>)> {
    let rank = |change: &Change<'_>| change.record().map_or(0, |r| handler.apply_rank(r));

    let mut creates: Vec<&Change<'a>> = changes.of(ChangeKind::Create).collect();
    creates.sort_by_key(|c| rank(*c));
    let mut updates: Vec<&Change<'a>> = changes.of(ChangeKind::Update).collect();
    updates.sort_by_key(|c| rank(*c));
    let mut deletes: Vec<&Change<'a>> = changes.of(ChangeKind::Delete).collect();
    deletes.sort_by_key(|c| Reverse(rank(*c)));

    creates
        .into_iter()
        .map(|c| (Operation::Create, c))
        .chain(updates.into_iter().map(|c| (Operation::Update, c)))
        .chain(deletes.into_iter().map(|c| (Operation::Delete, c)))
        .collect()
}

fn failure_entry(kind: &str, op: Operation, change: &Change<'_>, err: &SyncError) -> RecordFailure {
    let attributes = change
        .record()
        .and_then(|r| serde_json::to_value(r.attrs()).ok())
        .unwrap_or_default();
    RecordFailure {
        kind: kind.to_string(),
        key: change.key.to_string(),
        operation: op,
        attributes,
        message: err.to_string(),
    }
}
