//! What the pipeline did, as a flat list of events.
//!
//! Passes report each rewrite through [`NotificationContext::event`](super::NotificationContext::event),
//! which lands in the [`EventLog`] shared by every method compiled in parallel. The log
//! only grows, so workers append through `&self` without locking. Counters such as
//! [`DerivedStats`] are computed from the log afterwards instead of being kept alongside.
//!
//! # Example
//!
//! ```rust
//! use downlevel::compiler::{EventKind, EventLog};
//! use downlevel::ir::{MethodId, OpId};
//!
//! let log = EventLog::new();
//! log.record(EventKind::CheckRemoved)
//!     .at(MethodId::new(3), OpId::new(12))
//!     .message("null check on this");
//! log.info("closed-world assumption in effect");
//!
//! assert_eq!(log.count_kind(EventKind::CheckRemoved), 1);
//! assert_eq!(log.summary(), "1 check removed");
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use strum::{EnumIter, IntoEnumIterator};

use crate::{
    compiler::Phase,
    ir::{MethodId, OpId},
};

/// What an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum EventKind {
    /// A dispatched call was bound to a single target.
    CallDevirtualized,
    /// A dispatched call was lowered to a table load plus an indirect call.
    DispatchLowered,
    /// An implicit check became explicit control flow.
    CheckMaterialized,
    /// A check was proven redundant or disabled by policy.
    CheckRemoved,
    /// A block was split in two.
    BlockSplit,
    /// A conditional branch became unconditional.
    BranchCollapsed,
    /// An operator was replaced by a runtime helper call.
    HelperSubstituted,
    /// A floating point operator was replaced by a soft-float helper call.
    SoftFloatSubstituted,
    /// A wide operator was split into word-sized operators.
    OperatorScalarized,
    /// A call was bound to the calling convention.
    CallLowered,
    /// A retain or release was injected.
    RefCountInjected,
    /// A method wrapper call was injected.
    WrapperInjected,
    /// A configuration option was replaced by its override.
    OptionOverridden,
    /// An operator was removed.
    OperatorRemoved,
    /// A basic block was removed.
    BlockRemoved,

    /// A phase started on a method.
    PhaseStarted,
    /// A phase reached its fixed point on a method.
    PhaseCompleted,

    /// Something worth knowing.
    Info,
    /// Unexpected but recoverable.
    Warning,
    /// A method could not be lowered.
    Error,
}

impl EventKind {
    /// Short lowercase label, as used in summaries.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::CallDevirtualized => "call devirtualized",
            Self::DispatchLowered => "dispatch lowered",
            Self::CheckMaterialized => "check materialized",
            Self::CheckRemoved => "check removed",
            Self::BlockSplit => "block split",
            Self::BranchCollapsed => "branch collapsed",
            Self::HelperSubstituted => "helper substituted",
            Self::SoftFloatSubstituted => "soft-float substituted",
            Self::OperatorScalarized => "operator scalarized",
            Self::CallLowered => "call lowered",
            Self::RefCountInjected => "refcount injected",
            Self::WrapperInjected => "wrapper injected",
            Self::OptionOverridden => "option overridden",
            Self::OperatorRemoved => "operator removed",
            Self::BlockRemoved => "block removed",
            Self::PhaseStarted => "phase started",
            Self::PhaseCompleted => "phase completed",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Whether the event stands for a change to a graph.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        !self.is_diagnostic() && !self.is_progress()
    }

    /// Whether the event is a free-form info, warning or error.
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Info | Self::Warning | Self::Error)
    }

    fn is_progress(self) -> bool {
        matches!(self, Self::PhaseStarted | Self::PhaseCompleted)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One entry of the log.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Method being lowered, if any.
    pub method: Option<MethodId>,
    /// Operator the event is about, if any.
    pub location: Option<OpId>,
    /// Free text; the kind's description when nothing more specific was given.
    pub message: String,
    /// Phase that recorded the event.
    pub phase: Option<Phase>,
    /// Runtime helper involved, for substitutions, lowered calls and refcounting.
    pub helper: Option<&'static str>,
}

impl Event {
    fn diagnostic(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            method: None,
            location: None,
            message: message.into(),
            phase: None,
            helper: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.phase, self.method) {
            (Some(phase), Some(method)) => {
                write!(f, "[{}] {} {}: {}", self.kind, phase, method, self.message)
            }
            _ => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// Fills in an event; it is appended to the log when the builder goes out of scope.
///
/// Obtained from [`EventLog::record`].
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    event: Event,
    message_set: bool,
}

impl<'a> EventBuilder<'a> {
    /// Method and operator the event is about.
    pub fn at(mut self, method: MethodId, location: OpId) -> Self {
        self.event.method = Some(method);
        self.event.location = Some(location);
        self
    }

    /// Method the event is about, for events not tied to one operator.
    pub fn method(mut self, method: MethodId) -> Self {
        self.event.method = Some(method);
        self
    }

    /// Replaces the default message.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.event.message = msg.into();
        self.message_set = true;
        self
    }

    /// Phase that recorded the event.
    pub fn phase(mut self, phase: Phase) -> Self {
        self.event.phase = Some(phase);
        self
    }

    /// Runtime helper involved.
    pub fn helper(mut self, name: &'static str) -> Self {
        self.event.helper = Some(name);
        if !self.message_set {
            self.event.message = format!("{} ({name})", self.event.kind);
        }
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let event = std::mem::replace(&mut self.event, Event::diagnostic(EventKind::Info, ""));
        self.log.events.push(event);
    }
}

/// Append-only event list shared by concurrent workers.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let copy = Self::new();
        copy.merge(self);
        copy
    }
}

impl EventLog {
    /// An empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts an event of `kind`; see [`EventBuilder`].
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder {
            log: self,
            event: Event::diagnostic(kind, kind.description()),
            message_set: false,
        }
    }

    /// Records an [`EventKind::Info`].
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::diagnostic(EventKind::Info, message));
    }

    /// Records an [`EventKind::Warning`].
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::diagnostic(EventKind::Warning, message));
    }

    /// Records an [`EventKind::Error`].
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::diagnostic(EventKind::Error, message));
    }

    /// Copies every event of `other` into this log.
    pub fn merge(&self, other: &EventLog) {
        for event in other {
            self.events.push(event.clone());
        }
    }

    /// All events, in the order they were appended.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Whether an event of `kind` was recorded.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.iter().any(|e| e.kind == kind)
    }

    /// Number of events of `kind`.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.filter_kind(kind).count()
    }

    /// Events of `kind`.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Events recorded while lowering `method`.
    pub fn filter_method(&self, method: MethodId) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.method == Some(method))
    }

    /// Infos, warnings and errors.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_diagnostic())
    }

    /// Number of events per kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        self.iter().fold(HashMap::new(), |mut counts, e| {
            *counts.entry(e.kind).or_insert(0) += 1;
            counts
        })
    }

    /// Number of events of `kind` per runtime helper.
    #[must_use]
    pub fn count_by_helper(&self, kind: EventKind) -> HashMap<&'static str, usize> {
        self.filter_kind(kind)
            .filter_map(|e| e.helper)
            .fold(HashMap::new(), |mut counts, helper| {
                *counts.entry(helper).or_insert(0) += 1;
                counts
            })
    }

    /// Number of graph changes each phase made.
    #[must_use]
    pub fn transformations_by_phase(&self) -> HashMap<Phase, usize> {
        self.iter()
            .filter(|e| e.kind.is_transformation())
            .filter_map(|e| e.phase)
            .fold(HashMap::new(), |mut counts, phase| {
                *counts.entry(phase).or_insert(0) += 1;
                counts
            })
    }

    /// Number of distinct methods with at least one graph change.
    #[must_use]
    pub fn methods_affected(&self) -> usize {
        self.iter()
            .filter(|e| e.kind.is_transformation())
            .filter_map(|e| e.method)
            .collect::<HashSet<_>>()
            .len()
    }

    /// One line listing the graph changes per kind, in declaration order.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }
        let counts = self.count_by_kind();
        let changes: Vec<String> = EventKind::iter()
            .filter(EventKind::is_transformation)
            .filter_map(|kind| counts.get(&kind).map(|n| format!("{n} {kind}")))
            .collect();
        if changes.is_empty() {
            format!("{} events", self.len())
        } else {
            changes.join(", ")
        }
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = std::iter::Map<boxcar::Iter<'a, Event>, fn((usize, &'a Event)) -> &'a Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter().map(|(_, e)| e)
    }
}

/// Pipeline counters computed from an [`EventLog`].
#[derive(Debug, Clone, Default)]
pub struct DerivedStats {
    /// Methods with at least one graph change.
    pub methods_transformed: usize,
    /// Calls bound statically.
    pub calls_devirtualized: usize,
    /// Calls lowered to table dispatch.
    pub dispatches_lowered: usize,
    /// Checks turned into control flow.
    pub checks_materialized: usize,
    /// Checks removed.
    pub checks_removed: usize,
    /// Branches collapsed to jumps.
    pub branches_collapsed: usize,
    /// Integer and object-model helper substitutions.
    pub helpers_substituted: usize,
    /// Soft-float helper substitutions.
    pub soft_float_substituted: usize,
    /// Operators split into words.
    pub operators_scalarized: usize,
    /// Calls bound to the calling convention.
    pub calls_lowered: usize,
    /// Retains and releases injected, per helper name.
    pub refcount_by_helper: HashMap<&'static str, usize>,
    /// Operators removed.
    pub operators_removed: usize,
    /// Blocks removed.
    pub blocks_removed: usize,
    /// Warnings.
    pub warnings: usize,
    /// Errors, one per failed method.
    pub errors: usize,
    /// Wall-clock time of the run, if measured.
    pub total_time: Duration,
}

impl DerivedStats {
    /// Counts the events of `log`.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let n = |kind: EventKind| counts.get(&kind).copied().unwrap_or_default();

        Self {
            methods_transformed: log.methods_affected(),
            calls_devirtualized: n(EventKind::CallDevirtualized),
            dispatches_lowered: n(EventKind::DispatchLowered),
            checks_materialized: n(EventKind::CheckMaterialized),
            checks_removed: n(EventKind::CheckRemoved),
            branches_collapsed: n(EventKind::BranchCollapsed),
            helpers_substituted: n(EventKind::HelperSubstituted),
            soft_float_substituted: n(EventKind::SoftFloatSubstituted),
            operators_scalarized: n(EventKind::OperatorScalarized),
            calls_lowered: n(EventKind::CallLowered),
            refcount_by_helper: log.count_by_helper(EventKind::RefCountInjected),
            operators_removed: n(EventKind::OperatorRemoved),
            blocks_removed: n(EventKind::BlockRemoved),
            warnings: n(EventKind::Warning),
            errors: n(EventKind::Error),
            total_time: Duration::ZERO,
        }
    }

    /// Attaches the measured run time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }

    /// Retains and releases injected, over all helpers.
    #[must_use]
    pub fn refcount_injected(&self) -> usize {
        self.refcount_by_helper.values().sum()
    }

    /// Non-zero counters as one line, followed by the run time when measured.
    #[must_use]
    pub fn summary(&self) -> String {
        let counters = [
            (self.methods_transformed, "methods"),
            (self.calls_devirtualized, "devirtualized"),
            (self.dispatches_lowered, "dispatches lowered"),
            (self.checks_materialized, "checks materialized"),
            (self.checks_removed, "checks removed"),
            (self.branches_collapsed, "branches collapsed"),
            (self.helpers_substituted, "helper calls"),
            (self.soft_float_substituted, "soft-float calls"),
            (self.operators_scalarized, "scalarized"),
            (self.calls_lowered, "calls lowered"),
            (self.refcount_injected(), "refcount operations"),
            (self.operators_removed, "operators removed"),
            (self.blocks_removed, "blocks removed"),
            (self.errors, "errors"),
            (self.warnings, "warnings"),
        ];
        let parts: Vec<String> = counters
            .iter()
            .filter(|(count, _)| *count > 0)
            .map(|(count, label)| format!("{count} {label}"))
            .collect();

        let line = if parts.is_empty() {
            "nothing lowered".to_string()
        } else {
            parts.join(", ")
        };
        if self.total_time.is_zero() {
            line
        } else {
            format!("{line} in {:?}", self.total_time)
        }
    }
}

impl fmt::Display for DerivedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
