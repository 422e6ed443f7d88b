use thiserror::Error;

use crate::ir::{MethodId, OpId};

/// Builds an [`Error::Consistency`] for an IR shape a rewrite rule does not cover.
///
/// The first argument is the offending operator (`Option<OpId>` or an `OpId`),
/// followed by a message or a format string with arguments.
///
/// ```rust, ignore
/// return Err(consistency_error!(op_id, "unexpected operator {} at phase {}", tag, phase));
/// ```
macro_rules! consistency_error {
    // Single string version
    ($op:expr, $msg:expr) => {
        crate::Error::Consistency {
            message: $msg.to_string(),
            operator: ::std::convert::Into::<Option<crate::ir::OpId>>::into($op),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($op:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::Consistency {
            message: format!($fmt, $($arg)*),
            operator: ::std::convert::Into::<Option<crate::ir::OpId>>::into($op),
            file: file!(),
            line: line!(),
        }
    };
}

/// Returns early with an [`Error::Assertion`] when an internal invariant does not hold.
///
/// ```rust, ignore
/// ir_assert!(words == 1, "result of {} does not fit in one register", op);
/// ```
macro_rules! ir_assert {
    ($cond:expr, $msg:expr) => {
        if !$cond {
            return Err(crate::Error::Assertion {
                message: $msg.to_string(),
                file: file!(),
                line: line!(),
            });
        }
    };

    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(crate::Error::Assertion {
                message: format!($fmt, $($arg)*),
                file: file!(),
                line: line!(),
            });
        }
    };
}

/// The generic Error type, which covers every failure the lowering pipeline can report.
///
/// None of these errors is recoverable for the method being compiled: the pipeline
/// either rewrites every operator a phase targets, or the method fails as a whole.
/// The outer driver reports the method together with the offending construct and
/// aborts code generation for the unit.
///
/// # Error Categories
///
/// ## Defects in the IR or in an earlier pass
/// - [`Error::Consistency`] - An IR shape that no rewrite rule covers
/// - [`Error::Assertion`] - An internal invariant was violated
/// - [`Error::FixpointNotReached`] - A phase kept changing the graph past its scan budget
///
/// ## Unsupported input
/// - [`Error::FeatureNotSupported`] - A construct this pipeline deliberately rejects
/// - [`Error::MissingWellKnown`] - The runtime does not provide a required helper
///
/// ## Context
/// - [`Error::Method`] - Any of the above, tagged with the method being compiled
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A compilation-consistency error.
    ///
    /// Raised when a pass meets an operator shape that its rules do not handle, such
    /// as mismatched operand widths or a 64-bit division that should already have been
    /// replaced by a helper call.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the inconsistency
    /// * `operator` - The offending operator, if one is known
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Consistency - {file}:{line}: {message}")]
    Consistency {
        /// The message to be printed for the Consistency error
        message: String,
        /// The operator that triggered the error
        operator: Option<OpId>,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An internal invariant check failed.
    ///
    /// Always a defect of the pipeline itself, never triggered by user input.
    #[error("Assertion failed - {file}:{line}: {message}")]
    Assertion {
        /// The message to be printed for the Assertion error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The input uses a construct that the pipeline does not support.
    #[error("Feature not supported - {0}")]
    FeatureNotSupported(String),

    /// A runtime helper method or field required by a rewrite is not registered.
    #[error("Missing well-known runtime entity - {0}")]
    MissingWellKnown(String),

    /// A phase did not reach a fixed point within its re-scan budget.
    #[error("Phase {phase} did not reach a fixed point after {scans} scans")]
    FixpointNotReached {
        /// Name of the phase
        phase: String,
        /// Number of scans performed
        scans: usize,
    },

    /// Wraps an error with the method whose compilation failed.
    #[error("{name}: {source}")]
    Method {
        /// The method being compiled
        method: MethodId,
        /// Printable method name
        name: String,
        /// The underlying error
        source: Box<Error>,
    },
}

impl Error {
    /// Returns the offending operator, if the error carries one.
    #[must_use]
    pub fn operator(&self) -> Option<OpId> {
        match self {
            Self::Consistency { operator, .. } => *operator,
            Self::Method { source, .. } => source.operator(),
            _ => None,
        }
    }

    /// Returns `true` for compilation-consistency errors, looking through method context.
    #[must_use]
    pub fn is_consistency(&self) -> bool {
        match self {
            Self::Consistency { .. } => true,
            Self::Method { source, .. } => source.is_consistency(),
            _ => false,
        }
    }

    /// Returns `true` for assertion failures, looking through method context.
    #[must_use]
    pub fn is_assertion(&self) -> bool {
        match self {
            Self::Assertion { .. } => true,
            Self::Method { source, .. } => source.is_assertion(),
            _ => false,
        }
    }

    /// Wraps this error with the method being compiled.
    #[must_use]
    pub fn in_method(self, method: MethodId, name: impl Into<String>) -> Self {
        match self {
            Self::Method { .. } => self,
            other => Self::Method {
                method,
                name: name.into(),
                source: Box::new(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fails_assert(value: u32) -> crate::Result<u32> {
        ir_assert!(value < 2, "value {} is too wide", value);
        Ok(value)
    }

    #[test]
    fn test_consistency_macro_records_operator() {
        let err = consistency_error!(OpId::new(7), "bad shape {}", 3);
        assert_eq!(err.operator(), Some(OpId::new(7)));
        assert!(err.is_consistency());
        assert!(err.to_string().contains("bad shape 3"));
    }

    #[test]
    fn test_consistency_macro_without_operator() {
        let err = consistency_error!(None, "no operator");
        assert_eq!(err.operator(), None);
    }

    #[test]
    fn test_assert_macro() {
        assert_eq!(fails_assert(1), Ok(1));
        let err = fails_assert(5).unwrap_err();
        assert!(err.is_assertion());
        assert!(err.to_string().contains("too wide"));
    }

    #[test]
    fn test_method_context_is_transparent() {
        let err = consistency_error!(OpId::new(1), "x").in_method(MethodId::new(3), "Foo::Bar");
        assert!(err.is_consistency());
        assert_eq!(err.operator(), Some(OpId::new(1)));
        assert!(err.to_string().starts_with("Foo::Bar"));
    }
}
