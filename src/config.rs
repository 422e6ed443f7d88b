//! Target description and per-method compilation policy.
//!
//! [`TargetConfig`] describes what the processor can do natively and which memory
//! manager the image uses. [`ConstraintProvider`] answers per-method policy questions
//! (which checks are disabled, which owners are force-devirtualized, which configuration
//! options have an override). [`PipelineOptions`] bounds the phase engine.

use std::collections::{HashMap, HashSet};

use bitflags::bitflags;

use crate::{
    compiler::Phase,
    ir::{ConstValue, MethodId, TypeId},
};

/// How heap objects are reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryModel {
    /// Every reference store retains and releases; the reference counting phase runs.
    ReferenceCounting,
    /// A tracing collector owns reclamation; no retain/release code is emitted.
    #[default]
    Tracing,
}

/// How much of the program is visible to the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BuildMode {
    /// Types may be added after compilation; whole-program facts are unavailable.
    #[default]
    OpenWorld,
    /// Every type of the program is registered; whole-program facts are sound.
    ClosedWorld,
}

/// Capabilities of the target processor and runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetConfig {
    /// Floating point arithmetic is available in hardware.
    pub has_fpu: bool,
    /// 32-bit integer division is available in hardware.
    pub has_hardware_divide: bool,
    /// Heap reclamation strategy.
    pub memory_model: MemoryModel,
    /// World assumption for whole-program queries.
    pub build_mode: BuildMode,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetConfig {
    /// A Cortex-M0 class target: no FPU, no divider, tracing collector, open world.
    #[must_use]
    pub fn new() -> Self {
        Self {
            has_fpu: false,
            has_hardware_divide: false,
            memory_model: MemoryModel::Tracing,
            build_mode: BuildMode::OpenWorld,
        }
    }

    /// Sets FPU availability.
    #[must_use]
    pub fn with_fpu(mut self, has_fpu: bool) -> Self {
        self.has_fpu = has_fpu;
        self
    }

    /// Sets hardware divide availability.
    #[must_use]
    pub fn with_hardware_divide(mut self, has_divide: bool) -> Self {
        self.has_hardware_divide = has_divide;
        self
    }

    /// Sets the memory model.
    #[must_use]
    pub fn with_memory_model(mut self, model: MemoryModel) -> Self {
        self.memory_model = model;
        self
    }

    /// Sets the build mode.
    #[must_use]
    pub fn with_build_mode(mut self, mode: BuildMode) -> Self {
        self.build_mode = mode;
        self
    }

    /// Returns `true` if the reference counting phase applies.
    #[must_use]
    pub fn is_reference_counting(&self) -> bool {
        self.memory_model == MemoryModel::ReferenceCounting
    }
}

bitflags! {
    /// Compilation constraints in effect for a method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CompilationConstraints: u32 {
        /// Null checks are not emitted in this method.
        const NULL_CHECKS_OFF = 0x0001;
        /// Null checks are not emitted in this method or anything it inlines.
        const NULL_CHECKS_OFF_DEEP = 0x0002;
        /// Array bounds checks are not emitted.
        const BOUNDS_CHECKS_OFF = 0x0004;
        /// The method belongs to the memory manager and is not reference counted.
        const REFCOUNT_EXCLUDED = 0x0008;
        /// Runtime prologue/epilogue wrappers are injected.
        const METHOD_WRAPPERS = 0x0010;
    }
}

impl CompilationConstraints {
    /// Returns `true` if null checks are suppressed.
    #[must_use]
    pub fn null_checks_off(self) -> bool {
        self.intersects(Self::NULL_CHECKS_OFF | Self::NULL_CHECKS_OFF_DEEP)
    }

    /// Returns `true` if bounds checks are suppressed.
    #[must_use]
    pub fn bounds_checks_off(self) -> bool {
        self.contains(Self::BOUNDS_CHECKS_OFF)
    }
}

/// Per-method policy consulted by the passes.
///
/// Implementations must be safe to query from several compilation threads at once.
pub trait ConstraintProvider: Send + Sync {
    /// Constraints in effect while compiling `method`.
    fn constraints(&self, method: MethodId) -> CompilationConstraints;

    /// The type every virtual call on `owner` must bind to, if one is forced.
    fn forced_devirtualization(&self, owner: TypeId) -> Option<TypeId>;

    /// The constant that replaces the configuration option `name`, if overridden.
    fn option_override(&self, name: &str) -> Option<ConstValue>;
}

/// Table-driven [`ConstraintProvider`].
///
/// # Examples
///
/// ```rust
/// use downlevel::config::{CompilationConfig, CompilationConstraints, ConstraintProvider};
/// use downlevel::ir::{ConstValue, MethodId};
///
/// let config = CompilationConfig::new()
///     .with_default(CompilationConstraints::METHOD_WRAPPERS)
///     .with_method(MethodId::new(4), CompilationConstraints::BOUNDS_CHECKS_OFF)
///     .with_option("Debug.Level", ConstValue::Int(2));
///
/// assert!(config.constraints(MethodId::new(4)).bounds_checks_off());
/// assert!(config.constraints(MethodId::new(4)).contains(CompilationConstraints::METHOD_WRAPPERS));
/// assert_eq!(config.option_override("Debug.Level"), Some(ConstValue::Int(2)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CompilationConfig {
    defaults: CompilationConstraints,
    per_method: HashMap<MethodId, CompilationConstraints>,
    excluded_from_refcount: HashSet<MethodId>,
    forced: HashMap<TypeId, TypeId>,
    options: HashMap<String, ConstValue>,
}

impl CompilationConfig {
    /// An empty policy: every check enabled, no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Constraints applied to every method.
    #[must_use]
    pub fn with_default(mut self, constraints: CompilationConstraints) -> Self {
        self.defaults = constraints;
        self
    }

    /// Additional constraints for one method.
    #[must_use]
    pub fn with_method(mut self, method: MethodId, constraints: CompilationConstraints) -> Self {
        *self.per_method.entry(method).or_default() |= constraints;
        self
    }

    /// Excludes a memory manager method from reference counting.
    #[must_use]
    pub fn with_refcount_exclusion(mut self, method: MethodId) -> Self {
        self.excluded_from_refcount.insert(method);
        self
    }

    /// Forces virtual calls on `owner` to bind to `implementation`.
    #[must_use]
    pub fn with_forced_devirtualization(mut self, owner: TypeId, implementation: TypeId) -> Self {
        self.forced.insert(owner, implementation);
        self
    }

    /// Overrides the configuration option `name` with a constant.
    #[must_use]
    pub fn with_option(mut self, name: impl Into<String>, value: ConstValue) -> Self {
        self.options.insert(name.into(), value);
        self
    }
}

impl ConstraintProvider for CompilationConfig {
    fn constraints(&self, method: MethodId) -> CompilationConstraints {
        let mut constraints = self.defaults;
        if let Some(extra) = self.per_method.get(&method) {
            constraints |= *extra;
        }
        if self.excluded_from_refcount.contains(&method) {
            constraints |= CompilationConstraints::REFCOUNT_EXCLUDED;
        }
        constraints
    }

    fn forced_devirtualization(&self, owner: TypeId) -> Option<TypeId> {
        self.forced.get(&owner).copied()
    }

    fn option_override(&self, name: &str) -> Option<ConstValue> {
        self.options.get(name).copied()
    }
}

/// Bounds and stopping point of the phase engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Scans allowed per phase before [`crate::Error::FixpointNotReached`].
    pub max_scans_per_phase: usize,
    /// Phase restarts allowed per method.
    pub max_restarts: usize,
    /// Last phase to run; later phases are skipped.
    pub stop_after: Option<Phase>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::new(64, 8)
    }
}

impl PipelineOptions {
    /// Creates options with the given limits that run the whole pipeline.
    #[must_use]
    pub fn new(max_scans_per_phase: usize, max_restarts: usize) -> Self {
        Self {
            max_scans_per_phase,
            max_restarts,
            stop_after: None,
        }
    }

    /// Stops the pipeline after `phase`.
    #[must_use]
    pub fn stop_after(mut self, phase: Phase) -> Self {
        self.stop_after = Some(phase);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_merge() {
        let m = MethodId::new(1);
        let config = CompilationConfig::new()
            .with_default(CompilationConstraints::NULL_CHECKS_OFF)
            .with_method(m, CompilationConstraints::BOUNDS_CHECKS_OFF)
            .with_refcount_exclusion(m);

        let c = config.constraints(m);
        assert!(c.null_checks_off());
        assert!(c.bounds_checks_off());
        assert!(c.contains(CompilationConstraints::REFCOUNT_EXCLUDED));

        let other = config.constraints(MethodId::new(2));
        assert!(other.null_checks_off());
        assert!(!other.bounds_checks_off());
    }

    #[test]
    fn test_deep_null_checks_off() {
        assert!(CompilationConstraints::NULL_CHECKS_OFF_DEEP.null_checks_off());
        assert!(!CompilationConstraints::empty().null_checks_off());
    }

    #[test]
    fn test_forced_devirtualization() {
        let config =
            CompilationConfig::new().with_forced_devirtualization(TypeId::new(30), TypeId::new(31));
        assert_eq!(
            config.forced_devirtualization(TypeId::new(30)),
            Some(TypeId::new(31))
        );
        assert_eq!(config.forced_devirtualization(TypeId::new(31)), None);
    }

    #[test]
    fn test_target_defaults() {
        let target = TargetConfig::default();
        assert!(!target.has_fpu);
        assert!(!target.has_hardware_divide);
        assert!(!target.is_reference_counting());
        assert_eq!(target.build_mode, BuildMode::OpenWorld);
    }
}
