//! Shared state of one compilation unit.
//!
//! The [`CompilerContext`] owns every method graph of the unit together with the
//! read-only inputs (type system, target, policy) and the shared [`EventLog`]. Graphs
//! live in a [`DashMap`] so that workers compiling different methods in parallel only
//! contend for the brief moment of taking a graph out and putting it back.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    compiler::{engine::PhaseEngine, events::EventLog},
    config::{ConstraintProvider, PipelineOptions, TargetConfig},
    ir::{ControlFlowGraph, MethodId, TypeSystem},
    Error,
};

/// Inputs and results of compiling a set of methods.
pub struct CompilerContext {
    /// Immutable type and method registry.
    pub ts: Arc<TypeSystem>,
    /// Capabilities of the target.
    pub target: TargetConfig,
    /// Per-method policy.
    pub provider: Arc<dyn ConstraintProvider>,
    /// Transformations and diagnostics recorded by every method.
    pub events: EventLog,
    /// Method graphs, keyed by the method they implement.
    pub methods: DashMap<MethodId, ControlFlowGraph>,
    /// Methods whose compilation failed, with the reason.
    pub failures: DashMap<MethodId, Error>,
    /// Engine bounds and stopping point.
    pub options: PipelineOptions,
}

impl CompilerContext {
    /// Creates a context with no methods.
    #[must_use]
    pub fn new(
        ts: Arc<TypeSystem>,
        target: TargetConfig,
        provider: Arc<dyn ConstraintProvider>,
    ) -> Self {
        Self {
            ts,
            target,
            provider,
            events: EventLog::new(),
            methods: DashMap::new(),
            failures: DashMap::new(),
            options: PipelineOptions::default(),
        }
    }

    /// Replaces the engine options.
    #[must_use]
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    // ── Methods ─────────────────────────────────────────────────────────

    /// Adds (or replaces) the graph of a method.
    pub fn add_method(&self, cfg: ControlFlowGraph) {
        self.methods.insert(cfg.method(), cfg);
    }

    /// Ids of every method held, in ascending order.
    #[must_use]
    pub fn method_ids(&self) -> Vec<MethodId> {
        let mut ids: Vec<MethodId> = self.methods.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of methods held.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// A copy of the current graph of `method`.
    #[must_use]
    pub fn method_graph(&self, method: MethodId) -> Option<ControlFlowGraph> {
        self.methods.get(&method).map(|cfg| cfg.clone())
    }

    /// Removes and returns the graph of `method`.
    pub fn take_method(&self, method: MethodId) -> Option<ControlFlowGraph> {
        self.methods.remove(&method).map(|(_, cfg)| cfg)
    }

    // ── Failures ────────────────────────────────────────────────────────

    /// The error `method` failed with, if it did.
    #[must_use]
    pub fn failure(&self, method: MethodId) -> Option<Error> {
        self.failures.get(&method).map(|e| e.clone())
    }

    /// Returns `true` if any method failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Printable `Owner::Name` of a method.
    #[must_use]
    pub fn method_name(&self, method: MethodId) -> String {
        self.ts.method_name(method)
    }

    // ── Engine ──────────────────────────────────────────────────────────

    /// An engine bound to this context's inputs and event log.
    #[must_use]
    pub fn engine(&self) -> PhaseEngine<'_> {
        PhaseEngine::new(
            &self.ts,
            &self.target,
            self.provider.as_ref(),
            &self.events,
            self.options,
        )
    }
}
