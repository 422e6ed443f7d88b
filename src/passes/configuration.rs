//! Configuration option substitution.
//!
//! Methods flagged [`CONFIGURATION_OPTION`](crate::ir::MethodFlags::CONFIGURATION_OPTION)
//! read a build-time setting. When the [`ConstraintProvider`](crate::config::ConstraintProvider)
//! overrides the option, the call is replaced by the override so later phases see a
//! constant and can fold whatever depends on it.
//!
//! Options are looked up by `Owner.Name`:
//!
//! ```text
//! level = call Config::DebugLevel()      // override "Config.DebugLevel" = 2
//! level = 2
//! ```

use crate::{
    compiler::{EventKind, HandlerOutcome, NotificationContext},
    ir::{Constant, MethodFlags, OpKind, Operator, SubstitutionFlags},
    Result,
};

/// Replaces a call to an overridden configuration option by its constant.
///
/// # Errors
///
/// Returns an error if the current operator is not live.
pub fn apply_option_override(ctx: &mut NotificationContext<'_>) -> Result<HandlerOutcome> {
    let id = ctx.current()?;
    let op = ctx.operator()?;
    let OpKind::Call { method, .. } = op.kind else {
        return Ok(HandlerOutcome::NoChange);
    };
    let result = op.result();

    let md = ctx.ts.method(method);
    if !md.flags.contains(MethodFlags::CONFIGURATION_OPTION) {
        return Ok(HandlerOutcome::NoChange);
    }
    let key = format!("{}.{}", ctx.ts.ty(md.owner).name, md.name);
    let Some(value) = ctx.provider.option_override(&key) else {
        return Ok(HandlerOutcome::NoChange);
    };

    match result {
        Some(dst) => {
            let constant = Constant {
                ty: ctx.cfg.var_type(dst),
                value,
            };
            ctx.cfg.substitute(
                id,
                Operator::assign(dst, constant),
                SubstitutionFlags::COPY_DEBUG,
            )?;
        }
        None => ctx.cfg.delete(id)?,
    }

    ctx.event(EventKind::OptionOverridden)
        .message(format!("{key} = {value}"));
    Ok(HandlerOutcome::Modified)
}

#[cfg(test)]
mod tests {
    use crate::{
        compiler::{EventKind, Phase},
        config::{CompilationConfig, TargetConfig},
        ir::{CfgBuilder, ConstValue, Expression, MethodId, OpKind, OpTag},
        test::fixtures,
    };

    #[test]
    fn test_override_becomes_constant() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let level = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.call(fx.debug_level, Some(level), vec![]);
                    blk.ret(level);
                });
            })
            .unwrap();

        let config = CompilationConfig::new().with_option("Config.DebugLevel", ConstValue::Int(2));
        let events = fixtures::run_phase(
            &fx.ts,
            &mut cfg,
            &TargetConfig::new(),
            &config,
            Phase::ApplyConfiguration,
        )
        .unwrap();

        assert_eq!(fixtures::count(&cfg, OpTag::Call), 0);
        assert_eq!(events.count_kind(EventKind::OptionOverridden), 1);
        let assigned = cfg
            .operators()
            .find(|(_, op)| op.kind == OpKind::Assign && op.args[0].as_const().is_some())
            .map(|(_, op)| op.args[0]);
        assert_eq!(assigned, Some(Expression::int(fx.int, 2)));
    }

    #[test]
    fn test_without_override_call_stays() {
        let fx = fixtures::basic();
        let mut cfg = CfgBuilder::new(MethodId::new(0), Some(fx.int))
            .build_with(|f| {
                let level = f.temp(fx.int);
                let entry = f.entry();
                f.block(entry, |blk| {
                    blk.call(fx.debug_level, Some(level), vec![]);
                    blk.ret(level);
                });
            })
            .unwrap();

        let events = fixtures::run_phase(
            &fx.ts,
            &mut cfg,
            &TargetConfig::new(),
            &CompilationConfig::new(),
            Phase::ApplyConfiguration,
        )
        .unwrap();

        assert_eq!(fixtures::count(&cfg, OpTag::Call), 1);
        assert!(!events.has(EventKind::OptionOverridden));
    }
}
