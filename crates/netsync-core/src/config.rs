//! Immutable run configuration passed explicitly into diff and reconcile.

use std::collections::BTreeSet;

/// A validated, dependency-safe order of top-level record types.
///
/// Only [`crate::HandlerRegistry::type_order`] constructs one, after
/// checking that every type is registered, appears once, and comes after
/// every type it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeOrder(Vec<&'static str>);

impl TypeOrder {
    pub(crate) fn from_validated(kinds: Vec<&'static str>) -> Self {
        Self(kinds)
    }

    /// Iterates the types in apply order.
    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().copied()
    }

    /// Returns the types as a slice.
    pub fn as_slice(&self) -> &[&'static str] {
        &self.0
    }

    /// Returns true if the type is part of this order.
    pub fn contains(&self, kind: &str) -> bool {
        self.0.iter().any(|k| *k == kind)
    }

    /// Returns the number of types.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no type is ordered.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Flags and ordering for one reconciliation run.
///
/// Built once before the run and shared by reference; nothing in the
/// engine mutates it.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Keep applying after a per-record failure instead of aborting.
    pub continue_on_failure: bool,
    /// Apply skip-unmatched-destination semantics to every type.
    pub skip_unmatched_destination: bool,
    /// Types that opt out of the global skip-unmatched-destination flag.
    pub unmatched_opt_out: BTreeSet<String>,
    /// Compute and report the diff without applying it.
    pub dry_run: bool,
    type_order: TypeOrder,
}

impl RunConfig {
    /// Creates a configuration with every flag off.
    pub fn new(type_order: TypeOrder) -> Self {
        Self {
            continue_on_failure: false,
            skip_unmatched_destination: false,
            unmatched_opt_out: BTreeSet::new(),
            dry_run: false,
            type_order,
        }
    }

    /// Sets continue-on-failure.
    pub fn with_continue_on_failure(mut self, enabled: bool) -> Self {
        self.continue_on_failure = enabled;
        self
    }

    /// Sets the global skip-unmatched-destination flag.
    pub fn with_skip_unmatched_destination(mut self, enabled: bool) -> Self {
        self.skip_unmatched_destination = enabled;
        self
    }

    /// Excludes a type from the global skip-unmatched-destination flag.
    pub fn with_unmatched_opt_out(mut self, kind: impl Into<String>) -> Self {
        self.unmatched_opt_out.insert(kind.into());
        self
    }

    /// Sets dry-run mode.
    pub fn with_dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Returns the validated type order.
    pub fn type_order(&self) -> &TypeOrder {
        &self.type_order
    }

    /// Returns true if target-only records of this type are kept regardless
    /// of their own flags.
    pub fn skips_unmatched(&self, kind: &str) -> bool {
        self.skip_unmatched_destination && !self.unmatched_opt_out.contains(kind)
    }
}
