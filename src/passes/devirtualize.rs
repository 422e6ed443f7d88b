//! Static resolution of dispatched calls.
//!
//! A dispatched call can be bound at compile time when the receiver's static type
//! leaves exactly one possible implementation. The resolver tries, in order:
//!
//! 1. a devirtualization forced by the build configuration for the method's owner;
//! 2. a sealed or value-type receiver, whose own table entry is the only candidate;
//! 3. an implementation that is final or not overridable as seen from the receiver;
//! 4. in a closed-world build, the only instantiable type assignable to the receiver.
//!
//! Step 4 relies on the whole program being visible; the caller records that
//! assumption in the event log whenever it fires.

use strum::Display;

use crate::{
    config::{BuildMode, ConstraintProvider, TargetConfig},
    ir::{MethodId, TypeId, TypeSystem},
};

/// Why a dispatched call could be bound statically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Resolution {
    /// The configuration forces an implementation for the owner type
    Forced,
    /// The receiver type cannot have subtypes
    SealedReceiver,
    /// The implementation seen from the receiver cannot be overridden further
    FinalImplementation,
    /// Only one instantiable type is assignable to the receiver
    SingleImplementation,
}

/// A dispatched call resolved to one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Devirtualized {
    /// Method to call directly
    pub target: MethodId,
    /// Rule that justified the binding
    pub reason: Resolution,
}

/// Resolves a dispatched call of `method` on a receiver of static type `receiver`.
#[must_use]
pub fn resolve(
    ts: &TypeSystem,
    target: &TargetConfig,
    provider: &dyn ConstraintProvider,
    method: MethodId,
    receiver: TypeId,
) -> Option<Devirtualized> {
    let md = ts.method(method);
    let found = |reason, concrete| {
        ts.find_virtual_target(method, concrete)
            .map(|target| Devirtualized { target, reason })
    };

    if let Some(forced) = provider.forced_devirtualization(md.owner) {
        if let Some(hit) = found(Resolution::Forced, forced) {
            return Some(hit);
        }
    }

    if ts.is_sealed(receiver) || ts.is_value_type(receiver) {
        if let Some(hit) = found(Resolution::SealedReceiver, receiver) {
            return Some(hit);
        }
    }

    if !ts.is_interface(receiver) {
        if let Some(hit) = found(Resolution::FinalImplementation, receiver) {
            if !ts.method(hit.target).is_overridable() {
                return Some(hit);
            }
        }
    }

    if target.build_mode == BuildMode::ClosedWorld {
        let only = ts.single_concrete_implementation(receiver)?;
        return found(Resolution::SingleImplementation, only);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::CompilationConfig, test::fixtures};

    #[test]
    fn test_sealed_receiver() {
        let fx = fixtures::basic();
        let hit = resolve(
            &fx.ts,
            &TargetConfig::new(),
            &CompilationConfig::new(),
            fx.area,
            fx.square,
        );
        assert_eq!(
            hit,
            Some(Devirtualized {
                target: fx.square_area,
                reason: Resolution::SealedReceiver,
            })
        );
    }

    #[test]
    fn test_final_override() {
        let fx = fixtures::basic();
        let hit = resolve(
            &fx.ts,
            &TargetConfig::new(),
            &CompilationConfig::new(),
            fx.area,
            fx.circle,
        );
        assert_eq!(hit.map(|h| h.target), Some(fx.circle_area));
        assert_eq!(hit.map(|h| h.reason), Some(Resolution::FinalImplementation));
    }

    #[test]
    fn test_open_receiver_stays_dynamic() {
        let fx = fixtures::basic();
        let open = TargetConfig::new();
        assert_eq!(
            resolve(&fx.ts, &open, &CompilationConfig::new(), fx.area, fx.shape),
            None
        );
        // Two concrete shapes exist
        let closed = TargetConfig::new().with_build_mode(BuildMode::ClosedWorld);
        assert_eq!(
            resolve(&fx.ts, &closed, &CompilationConfig::new(), fx.area, fx.shape),
            None
        );
    }

    #[test]
    fn test_closed_world_interface() {
        let fx = fixtures::basic();
        let closed = TargetConfig::new().with_build_mode(BuildMode::ClosedWorld);
        let hit = resolve(&fx.ts, &closed, &CompilationConfig::new(), fx.run, fx.runnable);
        assert_eq!(
            hit,
            Some(Devirtualized {
                target: fx.runner_run,
                reason: Resolution::SingleImplementation,
            })
        );

        let open = TargetConfig::new();
        assert_eq!(
            resolve(&fx.ts, &open, &CompilationConfig::new(), fx.run, fx.runnable),
            None
        );
    }

    #[test]
    fn test_forced() {
        let fx = fixtures::basic();
        let config = CompilationConfig::new().with_forced_devirtualization(fx.shape, fx.square);
        let hit = resolve(&fx.ts, &TargetConfig::new(), &config, fx.area, fx.shape);
        assert_eq!(hit.map(|h| h.target), Some(fx.square_area));
        assert_eq!(hit.map(|h| h.reason), Some(Resolution::Forced));
    }
}
