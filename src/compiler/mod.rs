//! Phase engine and parallel driver of the lowering pipeline.
//!
//! This module sits between the graph substrate and the rewrite rules:
//!
//! - [`crate::ir`] - graphs, operators, the type system
//! - [`compiler`](self) - phase order, handler dispatch, fixpoint control, events
//! - [`crate::passes`] - the rewrite rules the engine dispatches to
//! - [`crate::analysis`] - nullness, array length and constraint facts
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Lowering Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  CompilerContext              Shared state of a unit             │
//! │    ├─ TypeSystem, target      (read-only, shared by workers)     │
//! │    ├─ Method graphs           (DashMap, take → run → reinsert)   │
//! │    └─ EventLog                (lock-free append)                 │
//! │                                                                  │
//! │  Pipeline                     Parallel per-method driver         │
//! │                                                                  │
//! │  PhaseEngine                  9 phases, each to a fixed point    │
//! │    ├─ pre-flow handlers       (once-per-method frame setup)      │
//! │    ├─ operator handlers       (phase × operator tag table)       │
//! │    ├─ post-flow handlers      (check elimination, dead code)     │
//! │    └─ level check             (no operator above phase bound)    │
//! │                                                                  │
//! │  EventLog                     Change tracking and diagnostics    │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod context;
mod engine;
mod events;
mod phase;
mod pipeline;

pub use context::CompilerContext;
pub use engine::{
    operator_handler, post_flow_handlers, pre_flow_handlers, EngineReport, FlowHandler,
    HandlerOutcome, NotificationContext, OperatorHandler, PhaseEngine,
};
pub use events::{DerivedStats, Event, EventBuilder, EventKind, EventLog};
pub use phase::Phase;
pub use pipeline::{Pipeline, PipelineReport};
