// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]
#![deny(unsafe_code)]

//! # downlevel
//!
//! A lowering pipeline that rewrites methods of a managed, object-oriented,
//! garbage-collected or reference-counted IR into the flat, word-sized operators a
//! code generator for a 32-bit embedded target can emit directly.
//!
//! Each method is a [`ControlFlowGraph`](ir::ControlFlowGraph) of basic blocks holding
//! typed operators. A [`PhaseEngine`](compiler::PhaseEngine) drives nine ordered phases
//! over it; in each phase every operator is offered to the rewrite rule registered for
//! its kind, and the phase repeats until a full scan changes nothing.
//!
//! ## Features
//!
//! - **Checks made explicit** - null, bounds and overflow checks become fault branches
//! - **Redundant check removal** - nullness, fixed array lengths and difference constraints
//! - **Object model lowering** - fields, elements, allocation, casts and dispatch
//! - **Reference counting** - retain/release injection balanced on every path
//! - **Helper substitution** - integer division and soft-float calls per target
//! - **Scalarization** - 64-bit and struct values split into 32-bit words
//! - **Calling convention** - arguments and results bound to registers and stack slots
//! - **Parallel compilation** - independent methods lowered on a `rayon` pool
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use downlevel::prelude::*;
//!
//! let mut builder = TypeSystemBuilder::new().with_runtime_support();
//! let int = BuiltinType::Int32.id();
//! let program = builder.add_class("Program", None, TypeFlags::SEALED);
//! let div = builder.add_method(program, "Div", &[int, int], int, MethodFlags::STATIC);
//! let ts = builder.build();
//!
//! let cfg = CfgBuilder::for_method(&ts, div).build_with(|f| {
//!     let (a, b) = (f.arg(0), f.arg(1));
//!     let q = f.temp(int);
//!     let entry = f.entry();
//!     f.block(entry, |blk| {
//!         blk.binary(Alu::Div, q, a, b);
//!         blk.ret(q);
//!     });
//! })?;
//!
//! let ctx = CompilerContext::new(Arc::new(ts), TargetConfig::new(), Arc::new(CompilationConfig::new()));
//! ctx.add_method(cfg);
//! let report = Pipeline::compile_all(&ctx);
//! assert_eq!(report.failed, 0);
//! # Ok::<(), downlevel::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - graphs, operators, variables and the type system
//! - [`compiler`] - phases, the engine, the parallel driver and events
//! - [`passes`] - the rewrite rules
//! - [`analysis`] - nullness, array length and constraint facts
//! - [`config`] - target description and per-method constraints

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use downlevel::prelude::*;
///
/// let ts = Arc::new(TypeSystemBuilder::new().with_runtime_support().build());
/// let ctx = CompilerContext::new(ts, TargetConfig::new(), Arc::new(CompilationConfig::new()));
/// assert_eq!(ctx.method_count(), 0);
/// ```
pub mod prelude;

/// Graph substrate: control flow graphs, operators, variables and the type system.
pub mod ir;

/// Target description, per-method compilation constraints and pipeline limits.
pub mod config;

/// Phase engine, parallel driver and event log.
pub mod compiler;

/// Rewrite rules dispatched by the phase engine.
pub mod passes;

/// Value facts used by redundant check elimination.
pub mod analysis;

/// `downlevel` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `downlevel` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;
