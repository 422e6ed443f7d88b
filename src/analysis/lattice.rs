//! Lattice traits for the optimistic value analyses.
//!
//! Every analysis of this module starts each variable at top ("not yet known"), lowers
//! values as definitions are visited, and stops when nothing changes. Convergence needs
//! a finite-height lattice and monotone transfer functions.
//!
//! # Lattice Theory Background
//!
//! - **Partial Order**: Elements can be compared (≤)
//! - **Meet (∧)**: Greatest lower bound of two elements
//! - **Join (∨)**: Least upper bound of two elements
//! - **Top (⊤)**: Greatest element (no information yet)
//! - **Bottom (⊥)**: Least element (conflicting information)

use std::fmt::Debug;

/// A meet semi-lattice with a meet (greatest lower bound) operation.
///
/// The meet combines the values flowing into a phi. It must be idempotent,
/// commutative and associative.
pub trait MeetSemiLattice: Clone + Debug + PartialEq {
    /// Computes the meet (greatest lower bound) of two lattice elements.
    #[must_use]
    fn meet(&self, other: &Self) -> Self;

    /// Returns `true` if this is the bottom element.
    ///
    /// Once bottom is reached, further meets cannot change the value.
    fn is_bottom(&self) -> bool;
}

/// A join semi-lattice with a join (least upper bound) operation.
pub trait JoinSemiLattice: Clone + Debug + PartialEq {
    /// Computes the join (least upper bound) of two lattice elements.
    #[must_use]
    fn join(&self, other: &Self) -> Self;

    /// Returns `true` if this is the top element.
    ///
    /// Top is the identity for meet: `x.meet(top) = x`.
    fn is_top(&self) -> bool;
}

/// A complete lattice with both meet and join operations.
pub trait Lattice: MeetSemiLattice + JoinSemiLattice {
    /// Returns the top (⊤) element of the lattice.
    fn top() -> Self;

    /// Returns the bottom (⊥) element of the lattice.
    fn bottom() -> Self;
}

/// The flat lattice over `T`: top, one level of incomparable values, bottom.
///
/// # Examples
///
/// ```rust
/// use downlevel::analysis::{Flat, MeetSemiLattice};
///
/// let eight = Flat::Value(8u32);
/// assert_eq!(eight.meet(&Flat::Top), eight);
/// assert_eq!(eight.meet(&Flat::Value(8)), eight);
/// assert_eq!(eight.meet(&Flat::Value(4)), Flat::Bottom);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Flat<T> {
    /// Not yet known
    #[default]
    Top,
    /// Exactly this value
    Value(T),
    /// Conflicting or unknowable
    Bottom,
}

impl<T: Copy> Flat<T> {
    /// The known value, if there is one.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        match self {
            Self::Value(v) => Some(*v),
            Self::Top | Self::Bottom => None,
        }
    }
}

impl<T: Clone + Debug + PartialEq> MeetSemiLattice for Flat<T> {
    fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Top, x) | (x, Self::Top) => x.clone(),
            (Self::Value(a), Self::Value(b)) if a == b => Self::Value(a.clone()),
            _ => Self::Bottom,
        }
    }

    fn is_bottom(&self) -> bool {
        matches!(self, Self::Bottom)
    }
}

impl<T: Clone + Debug + PartialEq> JoinSemiLattice for Flat<T> {
    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Bottom, x) | (x, Self::Bottom) => x.clone(),
            (Self::Value(a), Self::Value(b)) if a == b => Self::Value(a.clone()),
            _ => Self::Top,
        }
    }

    fn is_top(&self) -> bool {
        matches!(self, Self::Top)
    }
}

impl<T: Clone + Debug + PartialEq> Lattice for Flat<T> {
    fn top() -> Self {
        Self::Top
    }

    fn bottom() -> Self {
        Self::Bottom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_meet() {
        let a: Flat<u32> = Flat::Value(1);
        assert_eq!(a.meet(&a), a);
        assert_eq!(Flat::Top.meet(&a), a);
        assert!(a.meet(&Flat::Value(2)).is_bottom());
        assert!(Flat::<u32>::bottom().meet(&a).is_bottom());
    }

    #[test]
    fn test_flat_join() {
        let a: Flat<u32> = Flat::Value(1);
        assert_eq!(Flat::Bottom.join(&a), a);
        assert!(a.join(&Flat::Value(2)).is_top());
        assert_eq!(a.value(), Some(1));
        assert_eq!(Flat::<u32>::top().value(), None);
    }
}
