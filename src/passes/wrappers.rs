//! Runtime wrapper calls around a method body.
//!
//! Methods compiled with [`CompilationConstraints::METHOD_WRAPPERS`] call
//! `MethodWrapperPrologue` on entry and `MethodWrapperEpilogue` before returning. The
//! calls are added once; the pipeline then re-enters the mid-level phases so they are
//! lowered like any other call.
//!
//! [`CompilationConstraints::METHOD_WRAPPERS`]: crate::config::CompilationConstraints::METHOD_WRAPPERS

use crate::{
    compiler::{EventKind, HandlerOutcome, NotificationContext, Phase},
    config::CompilationConstraints,
    ir::{CfgProperties, WellKnownMethod},
    Result,
};

/// Inserts the wrapper calls and restarts the pipeline at the high-to-mid phase.
///
/// # Errors
///
/// Returns [`Error::MissingWellKnown`](crate::Error::MissingWellKnown) if the runtime
/// has no wrapper routines.
pub fn inject(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    if !ctx.constraints.contains(CompilationConstraints::METHOD_WRAPPERS)
        || ctx.cfg.properties().contains(CfgProperties::WRAPPERS_ADDED)
    {
        return Ok(HandlerOutcome::NoChange);
    }

    let prologue = ctx.helper_call(WellKnownMethod::MethodWrapperPrologue, None, Vec::new())?;
    let epilogue = ctx.helper_call(WellKnownMethod::MethodWrapperEpilogue, None, Vec::new())?;
    ctx.cfg.append_to_prologue(prologue)?;
    ctx.cfg.append_to_epilogue(epilogue)?;
    ctx.cfg.set_property(CfgProperties::WRAPPERS_ADDED);

    for wkm in [
        WellKnownMethod::MethodWrapperPrologue,
        WellKnownMethod::MethodWrapperEpilogue,
    ] {
        ctx.event(EventKind::WrapperInjected).helper(wkm.name());
    }
    Ok(HandlerOutcome::RestartAtPhase(Phase::HighLevelToMidLevel))
}
