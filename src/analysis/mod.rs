//! Value facts used by the redundant check elimination.
//!
//! Every analysis here works on one [`ControlFlowGraph`](crate::ir::ControlFlowGraph)
//! in SSA form and is recomputed from scratch when a pass needs it; graphs are small and
//! the passes edit them between queries.
//!
//! # Architecture
//!
//! - [`lattice`](Flat) - meet/join traits and the flat lattice
//! - [`NullnessAnalysis`] - which references are provably null or non-null
//! - [`FixedLengths`] - statically known array lengths
//! - [`insert_pis`] / [`remove_pis`] - branch facts as renamed variables
//! - [`ConstraintSystem`] - difference constraints proving bounds and comparisons
//!
//! # Usage
//!
//! ```rust,ignore
//! use downlevel::analysis::{insert_pis, remove_pis, ConstraintSystem, FixedLengths};
//!
//! insert_pis(&mut cfg)?;
//! let chains = cfg.dataflow();
//! let fixed = FixedLengths::compute(&cfg);
//! let mut system = ConstraintSystem::new(&cfg, &chains, &fixed);
//! let in_range = system.decide(cmp, &index, &length);
//! remove_pis(&mut cfg)?;
//! ```

mod constraints;
mod lattice;
mod length;
mod nullness;
mod pi;

pub use constraints::{ConstraintSystem, Node};
pub use lattice::{Flat, JoinSemiLattice, Lattice, MeetSemiLattice};
pub use length::FixedLengths;
pub use nullness::{Nullness, NullnessAnalysis};
pub use pi::{insert_pis, remove_pis};
