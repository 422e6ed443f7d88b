//! Call lowering.
//!
//! Calls go down in two steps. During `HighLevelToMidLevel` a dispatched call that
//! could not be devirtualized is rewritten by [`dispatch`] into a table lookup plus an
//! indirect call. During `ExpandAggregateTypes` [`convention`] binds every call and the
//! method itself to the register and stack layout of the target.

pub mod convention;
pub mod dispatch;
