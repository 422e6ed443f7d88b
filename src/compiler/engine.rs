//! The phase engine: per-phase dispatch of rewrite handlers to a fixed point.
//!
//! For every phase the engine repeatedly scans the graph. A scan runs the phase's
//! pre-flow handlers, then visits a snapshot of the operators in block order and hands
//! each one to the handler registered for `(phase, operator tag)`. A scan that changed
//! anything is followed by another one; once a scan is quiet the post-flow handlers run,
//! and if they changed the graph the phase scans again. Handlers report what they did
//! through [`HandlerOutcome`].
//!
//! Termination rests on the rewrite rules: each rule deletes its operator or replaces it
//! with operators of a lower [`OperatorLevel`](crate::ir::OperatorLevel), and none
//! recreates a pattern it consumed. The scan budget in
//! [`PipelineOptions`](crate::config::PipelineOptions) turns a violation of that rule
//! into [`Error::FixpointNotReached`] instead of a hang.

use log::{debug, trace};

use crate::{
    compiler::{
        events::{EventBuilder, EventKind, EventLog},
        phase::Phase,
    },
    config::{CompilationConstraints, ConstraintProvider, PipelineOptions, TargetConfig},
    ir::{
        BuiltinType, ConstValue, Constant, ControlFlowGraph, Expression, MethodId, OpId, OpTag,
        Operator, OperatorLevel, TypeId, TypeSystem, VarId, WellKnownMethod,
    },
    passes::{
        calls, checks, configuration, deadcode, exceptions, helpers, highlevel, lowering,
        refcount, scalarize, softfloat, verify, wrappers,
    },
    Error, Result,
};

/// What a handler did to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Nothing changed.
    NoChange,
    /// The graph changed; the current scan continues.
    Modified,
    /// The graph changed in a way that invalidates the current scan.
    StopScan,
    /// Re-enter the pipeline at the given phase, which must not be later than the
    /// current one.
    RestartAtPhase(Phase),
}

/// Everything a handler may read or mutate.
pub struct NotificationContext<'a> {
    /// The graph being rewritten.
    pub cfg: &'a mut ControlFlowGraph,
    /// Type and well-known method registry.
    pub ts: &'a TypeSystem,
    /// Target description.
    pub target: &'a TargetConfig,
    /// Per-method policy.
    pub provider: &'a dyn ConstraintProvider,
    /// Constraints in effect for this method.
    pub constraints: CompilationConstraints,
    events: &'a EventLog,
    phase: Phase,
    current: Option<OpId>,
}

impl<'a> NotificationContext<'a> {
    /// The running phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The method being compiled.
    #[must_use]
    pub fn method(&self) -> MethodId {
        self.cfg.method()
    }

    /// The operator being visited.
    ///
    /// # Errors
    ///
    /// Returns an assertion error when called from a flow-graph handler.
    pub fn current(&self) -> Result<OpId> {
        match self.current {
            Some(op) => Ok(op),
            None => Err(Error::Assertion {
                message: format!("no current operator in a flow handler of {}", self.phase),
                file: file!(),
                line: line!(),
            }),
        }
    }

    /// The operator being visited.
    ///
    /// # Errors
    ///
    /// Returns an error when there is no current operator or it was deleted.
    pub fn operator(&self) -> Result<&Operator> {
        self.cfg.op(self.current()?)
    }

    /// Starts an event attributed to the method, the current operator and the phase.
    pub fn event(&self, kind: EventKind) -> EventBuilder<'a> {
        let builder = self.events.record(kind).phase(self.phase);
        match self.current {
            Some(op) => builder.at(self.cfg.method(), op),
            None => builder.method(self.cfg.method()),
        }
    }

    /// The shared event log.
    #[must_use]
    pub fn events(&self) -> &'a EventLog {
        self.events
    }

    /// Builds a direct call to a runtime helper.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingWellKnown`] if the runtime lacks the helper.
    pub fn helper_call(
        &self,
        wkm: WellKnownMethod,
        result: Option<VarId>,
        args: Vec<Expression>,
    ) -> Result<Operator> {
        Ok(Operator::call(self.ts.well_known_method(wkm)?, result, args))
    }

    /// The runtime type handle (vtable) of `ty` as an operand.
    #[must_use]
    pub fn type_handle(&self, ty: TypeId) -> Expression {
        Expression::Const(Constant {
            ty: BuiltinType::VTable.id(),
            value: ConstValue::TypeHandle(ty),
        })
    }
}

/// A per-operator rewrite rule.
pub type OperatorHandler = fn(&mut NotificationContext<'_>) -> Result<HandlerOutcome>;

/// A whole-graph rule run before or after the operator scan.
pub type FlowHandler = fn(&mut NotificationContext<'_>) -> Result<HandlerOutcome>;

/// The dispatch table: the rule for `tag` in `phase`, if any.
#[must_use]
pub fn operator_handler(phase: Phase, tag: OpTag) -> Option<OperatorHandler> {
    use OpTag as T;
    use Phase as P;

    let handler: OperatorHandler = match (phase, tag) {
        (P::ApplyConfiguration, T::Call) => configuration::apply_option_override,

        (P::HighLevelToMidLevel, T::Call) => highlevel::lower_call,
        (
            P::HighLevelToMidLevel,
            T::LoadField
            | T::StoreField
            | T::LoadFieldAddress
            | T::LoadElement
            | T::StoreElement
            | T::LoadElementAddress
            | T::LoadIndirect
            | T::StoreIndirect,
        ) => highlevel::make_checks_explicit,
        (P::HighLevelToMidLevel, T::NewObject | T::NewArray) => highlevel::lower_allocation,
        (P::HighLevelToMidLevel, T::CastClass | T::IsInstance) => highlevel::lower_type_test,

        (P::ReferenceCounting, T::Assign) => refcount::assignment,
        (P::ReferenceCounting, T::Call) => refcount::call,
        (P::ReferenceCounting, T::LoadField | T::LoadElement | T::LoadIndirect) => refcount::load,
        (P::ReferenceCounting, T::StoreField | T::StoreElement | T::StoreIndirect) => {
            refcount::store
        }

        (P::FromImplicitToExplicitExceptions, T::Binary) => exceptions::checked_binary,
        (P::FromImplicitToExplicitExceptions, T::SignExtend | T::ZeroExtend | T::Truncate) => {
            exceptions::checked_extension
        }
        (P::FromImplicitToExplicitExceptions, T::Convert) => exceptions::checked_conversion,
        (P::FromImplicitToExplicitExceptions, T::NullCheck) => exceptions::null_check,
        (P::FromImplicitToExplicitExceptions, T::BoundsCheck) => exceptions::bounds_check,
        (P::FromImplicitToExplicitExceptions, T::OverflowCheck) => exceptions::overflow_check,

        (P::ConvertUnsupportedOperatorsToMethodCalls, T::Binary) => helpers::binary,
        (P::ConvertUnsupportedOperatorsToMethodCalls, T::Unary) => softfloat::unary,
        (P::ConvertUnsupportedOperatorsToMethodCalls, T::Compare) => softfloat::compare,
        (P::ConvertUnsupportedOperatorsToMethodCalls, T::CompareAndSet) => {
            softfloat::compare_and_set
        }
        (P::ConvertUnsupportedOperatorsToMethodCalls, T::CompareBranch) => {
            softfloat::compare_branch
        }
        (P::ConvertUnsupportedOperatorsToMethodCalls, T::Convert) => softfloat::convert,

        (P::MidLevelToLowLevel, T::LoadField | T::StoreField | T::LoadFieldAddress) => {
            lowering::field_access
        }
        (P::MidLevelToLowLevel, T::LoadElement | T::StoreElement | T::LoadElementAddress) => {
            lowering::element_access
        }

        (P::ExpandAggregateTypes, T::Call) => calls::convention::lower_call,
        (P::ExpandAggregateTypes, T::Assign) => scalarize::assign,
        (P::ExpandAggregateTypes, T::PartialAssign) => scalarize::partial_assign,
        (P::ExpandAggregateTypes, T::Binary) => scalarize::binary,
        (P::ExpandAggregateTypes, T::LongBinary) => scalarize::long_binary,
        (P::ExpandAggregateTypes, T::Unary) => scalarize::unary,
        (P::ExpandAggregateTypes, T::Compare) => scalarize::compare,
        (P::ExpandAggregateTypes, T::CompareAndSet) => scalarize::compare_and_set,
        (P::ExpandAggregateTypes, T::CompareBranch) => scalarize::compare_branch,
        (P::ExpandAggregateTypes, T::BinaryBranch) => scalarize::binary_branch,
        (P::ExpandAggregateTypes, T::SignExtend | T::ZeroExtend | T::Truncate) => {
            scalarize::extension
        }
        (P::ExpandAggregateTypes, T::Convert) => scalarize::convert,
        (P::ExpandAggregateTypes, T::LoadIndirect) => scalarize::load_indirect,
        (P::ExpandAggregateTypes, T::StoreIndirect) => scalarize::store_indirect,
        (P::ExpandAggregateTypes, T::Phi) => scalarize::phi,
        (P::ExpandAggregateTypes, T::Switch) => scalarize::switch,
        (P::ExpandAggregateTypes, T::Return) => scalarize::ret,

        _ => return None,
    };
    Some(handler)
}

/// Flow handlers run at the start of every scan of `phase`.
#[must_use]
pub fn pre_flow_handlers(phase: Phase) -> &'static [FlowHandler] {
    match phase {
        Phase::ReferenceCounting => &[refcount::setup_frame],
        Phase::MidLevelToLowLevel => &[wrappers::inject],
        Phase::ExpandAggregateTypes => &[calls::convention::bind_method],
        Phase::Finalize => &[verify::verify],
        _ => &[],
    }
}

/// Flow handlers run once the operator scan of `phase` is quiet.
#[must_use]
pub fn post_flow_handlers(phase: Phase) -> &'static [FlowHandler] {
    match phase {
        Phase::RemoveRedundantChecks => &[checks::eliminate, deadcode::remove_dead_code],
        Phase::ExpandAggregateTypes => &[deadcode::leave_ssa, deadcode::remove_dead_code],
        Phase::Finalize => &[],
        _ => &[deadcode::remove_dead_code],
    }
}

/// Per-method statistics of an engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineReport {
    /// Scans performed, per phase execution in order.
    pub scans: Vec<(Phase, usize)>,
    /// Number of phase restarts.
    pub restarts: usize,
}

impl EngineReport {
    /// Scans over all phases.
    #[must_use]
    pub fn total_scans(&self) -> usize {
        self.scans.iter().map(|(_, n)| n).sum()
    }

    /// The largest number of scans any single phase needed.
    #[must_use]
    pub fn max_scans(&self) -> usize {
        self.scans.iter().map(|(_, n)| *n).max().unwrap_or(0)
    }
}

enum PhaseExit {
    Completed,
    Restart(Phase),
}

/// Drives the phases over one method.
pub struct PhaseEngine<'a> {
    ts: &'a TypeSystem,
    target: &'a TargetConfig,
    provider: &'a dyn ConstraintProvider,
    events: &'a EventLog,
    options: PipelineOptions,
}

impl<'a> PhaseEngine<'a> {
    /// Creates an engine over shared, read-only compilation state.
    #[must_use]
    pub fn new(
        ts: &'a TypeSystem,
        target: &'a TargetConfig,
        provider: &'a dyn ConstraintProvider,
        events: &'a EventLog,
        options: PipelineOptions,
    ) -> Self {
        Self {
            ts,
            target,
            provider,
            events,
            options,
        }
    }

    /// Runs every phase, up to `stop_after` if set.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a handler, a level violation, or
    /// [`Error::FixpointNotReached`] when a scan or restart budget is exhausted.
    pub fn run(&self, cfg: &mut ControlFlowGraph) -> Result<EngineReport> {
        self.run_from(cfg, Phase::first())
    }

    /// Runs the phases starting at `start`.
    ///
    /// # Errors
    ///
    /// See [`PhaseEngine::run`].
    pub fn run_from(&self, cfg: &mut ControlFlowGraph, start: Phase) -> Result<EngineReport> {
        let mut report = EngineReport::default();
        let mut phase = Some(start);

        while let Some(current) = phase {
            if self.options.stop_after.is_some_and(|last| current > last) {
                break;
            }

            let (exit, scans) = self.run_phase(cfg, current)?;
            report.scans.push((current, scans));

            match exit {
                PhaseExit::Completed => {
                    self.check_levels(cfg, current)?;
                    phase = current.next();
                }
                PhaseExit::Restart(target) => {
                    ir_assert!(
                        target <= current,
                        "phase {} requested a restart at the later phase {}",
                        current,
                        target
                    );
                    report.restarts += 1;
                    if report.restarts > self.options.max_restarts {
                        return Err(Error::FixpointNotReached {
                            phase: format!("{current} (restarts)"),
                            scans: report.restarts,
                        });
                    }
                    debug!("{}: restart at {} requested by {}", cfg.method(), target, current);
                    phase = Some(target);
                }
            }
        }

        Ok(report)
    }

    fn context<'c>(&'c self, cfg: &'c mut ControlFlowGraph, phase: Phase) -> NotificationContext<'c>
    where
        'a: 'c,
    {
        let constraints = self.provider.constraints(cfg.method());
        NotificationContext {
            cfg,
            ts: self.ts,
            target: self.target,
            provider: self.provider,
            constraints,
            events: self.events,
            phase,
            current: None,
        }
    }

    fn run_phase(&self, cfg: &mut ControlFlowGraph, phase: Phase) -> Result<(PhaseExit, usize)> {
        let method = cfg.method();
        debug!("{method}: entering {phase}");
        self.events
            .record(EventKind::PhaseStarted)
            .method(method)
            .phase(phase);

        let mut ctx = self.context(cfg, phase);
        let mut scans = 0;

        'scan: loop {
            scans += 1;
            if scans > self.options.max_scans_per_phase {
                return Err(Error::FixpointNotReached {
                    phase: phase.to_string(),
                    scans: scans - 1,
                });
            }
            trace!("{method}: {phase} scan {scans}");

            let mut changed = false;
            ctx.current = None;
            for handler in pre_flow_handlers(phase) {
                match handler(&mut ctx)? {
                    HandlerOutcome::NoChange => {}
                    HandlerOutcome::Modified => changed = true,
                    HandlerOutcome::StopScan => continue 'scan,
                    HandlerOutcome::RestartAtPhase(target) => {
                        return Ok((PhaseExit::Restart(target), scans))
                    }
                }
            }

            for id in ctx.cfg.ops_in_order() {
                let Some(op) = ctx.cfg.get_op(id) else {
                    continue;
                };
                let Some(handler) = operator_handler(phase, op.tag()) else {
                    continue;
                };
                ctx.current = Some(id);
                match handler(&mut ctx)? {
                    HandlerOutcome::NoChange => {}
                    HandlerOutcome::Modified => changed = true,
                    HandlerOutcome::StopScan => continue 'scan,
                    HandlerOutcome::RestartAtPhase(target) => {
                        return Ok((PhaseExit::Restart(target), scans))
                    }
                }
            }
            ctx.current = None;

            if changed {
                continue;
            }

            for handler in post_flow_handlers(phase) {
                match handler(&mut ctx)? {
                    HandlerOutcome::NoChange => {}
                    HandlerOutcome::Modified => changed = true,
                    HandlerOutcome::StopScan => continue 'scan,
                    HandlerOutcome::RestartAtPhase(target) => {
                        return Ok((PhaseExit::Restart(target), scans))
                    }
                }
            }

            if !changed {
                break;
            }
        }

        debug!("{method}: {phase} reached a fixed point after {scans} scans");
        self.events
            .record(EventKind::PhaseCompleted)
            .method(method)
            .phase(phase)
            .message(format!("{phase}: {scans} scans"));
        Ok((PhaseExit::Completed, scans))
    }

    /// Rejects operators left above the level `phase` allows.
    fn check_levels(&self, cfg: &ControlFlowGraph, phase: Phase) -> Result<()> {
        let max = phase.max_level();
        if max == OperatorLevel::HighLevel {
            return Ok(());
        }
        for (id, op) in cfg.operators() {
            let level = OperatorLevel::of(op, cfg, self.ts, self.target);
            if level > max {
                return Err(consistency_error!(
                    id,
                    "'{}' is still at level {} after {}, which allows at most {}",
                    op,
                    level,
                    phase,
                    max
                ));
            }
        }
        Ok(())
    }
}
