//! The fixed phase order of the lowering pipeline.

use strum::{Display, EnumIter, IntoEnumIterator};

use crate::ir::OperatorLevel;

/// A step of the pipeline.
///
/// Phases run in declaration order. Each one bounds the [`OperatorLevel`] it may leave
/// behind, and the engine rejects a graph whose operators exceed that bound once the
/// phase has reached its fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
pub enum Phase {
    /// Configuration option calls become constants.
    ApplyConfiguration,
    /// Implicit checks become explicit check operators, allocation and type tests become
    /// runtime calls, dispatched calls are devirtualized or lowered to table loads.
    HighLevelToMidLevel,
    /// Retain/release injection for the reference counting memory model.
    ReferenceCounting,
    /// Check operators become branches to fault blocks.
    FromImplicitToExplicitExceptions,
    /// Operators the target cannot execute become helper calls.
    ConvertUnsupportedOperatorsToMethodCalls,
    /// Field and element accesses become indirect memory accesses.
    MidLevelToLowLevel,
    /// Branches proven by the null, length and constraint analyses are collapsed.
    RemoveRedundantChecks,
    /// Multi-word values are split into words and calls are bound to the convention.
    ExpandAggregateTypes,
    /// The graph is checked against the canonical low-level form.
    Finalize,
}

impl Phase {
    /// The first phase.
    #[must_use]
    pub fn first() -> Self {
        Self::ApplyConfiguration
    }

    /// The phase after this one.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::iter().skip_while(|p| *p != self).nth(1)
    }

    /// Highest level an operator may have once this phase completes.
    #[must_use]
    pub fn max_level(self) -> OperatorLevel {
        match self {
            Self::ApplyConfiguration => OperatorLevel::HighLevel,
            Self::HighLevelToMidLevel | Self::ReferenceCounting => OperatorLevel::ConcreteTypes,
            Self::FromImplicitToExplicitExceptions
            | Self::ConvertUnsupportedOperatorsToMethodCalls => {
                OperatorLevel::ConcreteTypesNoExceptions
            }
            Self::MidLevelToLowLevel | Self::RemoveRedundantChecks => OperatorLevel::ScalarValues,
            Self::ExpandAggregateTypes | Self::Finalize => OperatorLevel::Lowest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order() {
        assert_eq!(Phase::first(), Phase::ApplyConfiguration);
        assert_eq!(
            Phase::ReferenceCounting.next(),
            Some(Phase::FromImplicitToExplicitExceptions)
        );
        assert_eq!(Phase::Finalize.next(), None);
        assert!(Phase::HighLevelToMidLevel < Phase::ExpandAggregateTypes);
    }

    #[test]
    fn test_levels_never_rise() {
        let levels: Vec<_> = Phase::iter().map(Phase::max_level).collect();
        assert!(levels.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(Phase::Finalize.max_level(), OperatorLevel::Lowest);
    }
}
