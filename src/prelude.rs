//! # downlevel Prelude
//!
//! The types needed to describe a program, build method graphs and run the pipeline
//! over them. Import this module to avoid spelling out the module of each type.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all downlevel operations
pub use crate::Error;

/// The result type used throughout downlevel
pub use crate::Result;

// ================================================================================================
// Configuration
// ================================================================================================

/// Target description, per-method constraints and engine limits
pub use crate::config::{
    BuildMode, CompilationConfig, CompilationConstraints, ConstraintProvider, MemoryModel,
    PipelineOptions, TargetConfig,
};

// ================================================================================================
// Type System
// ================================================================================================

/// Program description consumed by every pass
pub use crate::ir::{
    BuiltinType, FieldId, MethodFlags, MethodId, TypeFlags, TypeId, TypeSystem,
    TypeSystemBuilder, WellKnownMethod,
};

// ================================================================================================
// Graphs and Operators
// ================================================================================================

/// Method bodies and their construction
pub use crate::ir::{
    BlockId, CfgBuilder, ControlFlowGraph, Expression, OpId, OpKind, OpTag, Operator,
    OperatorLevel, VarId, VarKind,
};

/// Operator details
pub use crate::ir::{Alu, CallKind, CompareCondition, Comparison, ConditionCode, UnaryAlu};

// ================================================================================================
// Pipeline
// ================================================================================================

/// Driving the pipeline and reading its outcome
pub use crate::compiler::{
    CompilerContext, EngineReport, EventKind, EventLog, Phase, PhaseEngine, Pipeline,
    PipelineReport,
};
