//! Suspension classification for registered callables.
//!
//! The runtime needs to know, per callable, whether it may suspend and at
//! which call sites control may yield. Rather than a reflective global
//! registry, callables are registered explicitly into a [`SuspendGraph`]
//! (name, explicit marking, ordered callees) and classified as a whole.
//!
//! Classification policy:
//!
//! - A call site is a suspension point iff its callee is suspendable.
//! - A callable is suspendable iff it is explicitly marked so, or it contains
//!   at least one suspension point.
//! - Classification is a monotone fixpoint over the call graph, so cycles
//!   (mutual recursion) converge and adding suspendable callees can only
//!   promote callables, never demote them.
//! - Results are cached per callable and classification is idempotent.
//!
//! A callable that a previous `classify` pinned non-suspendable and that a
//! later requirement would promote is a fatal [`ClassificationError`]: the
//! runtime may already have relied on the old answer, so the conflict is
//! reported at setup instead of being silently absorbed.

use std::collections::HashMap;

use crate::error::ClassificationError;

/// Explicit suspendability marking supplied at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marking {
    /// The callable is declared suspendable regardless of its body.
    Suspendable,
    /// The callable is declared non-suspendable; promotion is a fatal error.
    NonSuspendable,
    /// Suspendability is derived from the call graph alone.
    Derived,
}

/// Opaque handle to a registered callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallableId(usize);

/// Per-callable classification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspensionDescriptor {
    suspendable: bool,
    call_sites: Vec<bool>,
}

impl SuspensionDescriptor {
    /// Whether the callable may suspend.
    #[must_use]
    pub fn is_suspendable(&self) -> bool {
        self.suspendable
    }

    /// Per call site, in registration order: whether that site may suspend.
    #[must_use]
    pub fn call_sites(&self) -> &[bool] {
        &self.call_sites
    }
}

#[derive(Debug)]
struct CallableRecord {
    name: String,
    marking: Marking,
    callees: Vec<CallableId>,
    /// Result of the last completed classification, if any.
    sealed: Option<bool>,
}

/// Call graph of registered callables with cached classification.
#[derive(Debug, Default)]
pub struct SuspendGraph {
    records: Vec<CallableRecord>,
    by_name: HashMap<String, CallableId>,
    descriptors: HashMap<CallableId, SuspensionDescriptor>,
}

impl SuspendGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callable with its marking and its callees in call-site
    /// order. Callees mentioned before their own registration are interned
    /// with `Marking::Derived` and no callees.
    ///
    /// Registering an already-known name updates its marking and callees and
    /// invalidates the descriptor cache.
    pub fn register(&mut self, name: &str, marking: Marking, callees: &[&str]) -> CallableId {
        let callee_ids: Vec<CallableId> = callees.iter().map(|c| self.intern(c)).collect();
        let id = self.intern(name);
        let record = &mut self.records[id.0];
        record.marking = marking;
        record.callees = callee_ids;
        self.descriptors.clear();
        id
    }

    fn intern(&mut self, name: &str) -> CallableId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = CallableId(self.records.len());
        self.records.push(CallableRecord {
            name: name.to_string(),
            marking: Marking::Derived,
            callees: Vec::new(),
            sealed: None,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Looks up a callable by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<CallableId> {
        self.by_name.get(name).copied()
    }

    /// Runs classification to fixpoint and caches descriptors.
    ///
    /// Idempotent: re-running without graph changes recomputes the same
    /// results. Reports a [`ClassificationError`] if the fixpoint would
    /// promote a callable explicitly marked non-suspendable, or one that an
    /// earlier classification already sealed as non-suspendable.
    pub fn classify(&mut self) -> Result<(), ClassificationError> {
        let n = self.records.len();
        let mut suspendable: Vec<bool> = self
            .records
            .iter()
            .map(|r| r.marking == Marking::Suspendable)
            .collect();

        // Monotone fixpoint: a callable becomes suspendable when any callee
        // is; nothing is ever cleared, so iteration terminates.
        let mut changed = true;
        while changed {
            changed = false;
            for i in 0..n {
                if suspendable[i] {
                    continue;
                }
                if self.records[i].callees.iter().any(|c| suspendable[c.0]) {
                    suspendable[i] = true;
                    changed = true;
                }
            }
        }

        for (i, record) in self.records.iter().enumerate() {
            if !suspendable[i] {
                continue;
            }
            if record.marking == Marking::NonSuspendable {
                return Err(ClassificationError {
                    callable: record.name.clone(),
                    detail: "marked non-suspendable but calls a suspendable callable".into(),
                });
            }
            if record.sealed == Some(false) {
                return Err(ClassificationError {
                    callable: record.name.clone(),
                    detail: "previously classified non-suspendable, now required suspendable"
                        .into(),
                });
            }
        }

        self.descriptors.clear();
        for (i, record) in self.records.iter_mut().enumerate() {
            record.sealed = Some(suspendable[i]);
            let call_sites = record.callees.iter().map(|c| suspendable[c.0]).collect();
            self.descriptors.insert(
                CallableId(i),
                SuspensionDescriptor {
                    suspendable: suspendable[i],
                    call_sites,
                },
            );
        }
        tracing::debug!(
            callables = n,
            suspendable = suspendable.iter().filter(|s| **s).count(),
            "suspension classification complete"
        );
        Ok(())
    }

    /// Returns the cached descriptor for a callable, if classified.
    #[must_use]
    pub fn descriptor(&self, id: CallableId) -> Option<&SuspensionDescriptor> {
        self.descriptors.get(&id)
    }

    /// Returns the cached descriptor for a callable by name.
    #[must_use]
    pub fn descriptor_by_name(&self, name: &str) -> Option<&SuspensionDescriptor> {
        self.lookup(name).and_then(|id| self.descriptor(id))
    }
}
