//! Parallel driver running the phase engine over every method of a context.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Instant,
};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    compiler::{context::CompilerContext, engine::EngineReport, events::DerivedStats},
    ir::MethodId,
    Error, Result,
};

/// Outcome of compiling a whole context.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Methods that reached the end of the pipeline.
    pub compiled: usize,
    /// Methods that failed; their errors are kept in [`CompilerContext::failures`].
    pub failed: usize,
    /// Scans over all methods and phases.
    pub scans: usize,
    /// Statistics derived from the event log.
    pub stats: DerivedStats,
}

/// Runs the lowering pipeline over the methods of a [`CompilerContext`].
///
/// Methods are independent: each worker takes one graph out of the context, runs every
/// phase on it without holding any lock, and puts the result back. A failing method is
/// recorded in [`CompilerContext::failures`] and does not stop the others.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use downlevel::compiler::{CompilerContext, Pipeline};
/// use downlevel::config::{CompilationConfig, TargetConfig};
/// use downlevel::ir::TypeSystemBuilder;
///
/// let ts = Arc::new(TypeSystemBuilder::new().with_runtime_support().build());
/// let ctx = CompilerContext::new(ts, TargetConfig::new(), Arc::new(CompilationConfig::new()));
/// // ctx.add_method(...) for every method body
/// let report = Pipeline::compile_all(&ctx);
/// println!("{} compiled, {} failed", report.compiled, report.failed);
/// ```
pub struct Pipeline;

impl Pipeline {
    /// Compiles every method held by `ctx` in parallel.
    pub fn compile_all(ctx: &CompilerContext) -> PipelineReport {
        let start = Instant::now();
        let methods = ctx.method_ids();
        let compiled = AtomicUsize::new(0);
        let scans = AtomicUsize::new(0);

        info!("Lowering {} methods", methods.len());

        methods.par_iter().for_each(|&method| {
            match Self::compile_method(ctx, method) {
                Ok(report) => {
                    compiled.fetch_add(1, Ordering::Relaxed);
                    scans.fetch_add(report.total_scans(), Ordering::Relaxed);
                }
                Err(err) => {
                    warn!("{err}");
                    ctx.events.error(err.to_string());
                    ctx.failures.insert(method, err);
                }
            }
        });

        let report = PipelineReport {
            compiled: compiled.into_inner(),
            failed: ctx.failures.len(),
            scans: scans.into_inner(),
            stats: DerivedStats::from_log(&ctx.events).with_time(start.elapsed()),
        };
        info!(
            "Lowered {} methods ({} failed) in {:?}",
            report.compiled, report.failed, report.stats.total_time
        );
        report
    }

    /// Compiles one method of `ctx` and stores the rewritten graph back.
    ///
    /// On failure the graph is left out of the context, since a partially rewritten
    /// method must not reach code generation.
    ///
    /// # Errors
    ///
    /// Returns the engine error wrapped with the method name, or a feature error if the
    /// context holds no graph for `method`.
    pub fn compile_method(ctx: &CompilerContext, method: MethodId) -> Result<EngineReport> {
        // Take the graph out so no map lock is held while the engine runs
        let Some(mut cfg) = ctx.take_method(method) else {
            return Err(Error::FeatureNotSupported(format!(
                "no body registered for {}",
                ctx.method_name(method)
            )));
        };

        let report = ctx
            .engine()
            .run(&mut cfg)
            .map_err(|err| err.in_method(method, ctx.method_name(method)))?;

        debug!(
            "{}: {} scans, {} restarts",
            ctx.method_name(method),
            report.total_scans(),
            report.restarts
        );
        ctx.methods.insert(method, cfg);
        Ok(report)
    }
}
