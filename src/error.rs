//! Error types for the jcvmc compiler

use crate::compiler::ir::SourceLoc;
use std::fmt;
use thiserror::Error;

/// A single semantic problem found while walking declarations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Where the problem is, when known
    pub loc: Option<SourceLoc>,
    /// Description
    pub message: String,
}

impl Diagnostic {
    /// Diagnostic with an optional location
    pub fn new(loc: Option<SourceLoc>, message: impl Into<String>) -> Self {
        Self {
            loc,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_located(f, self.loc.as_ref(), "error", &self.message)
    }
}

/// Every semantic error collected during one allocation walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one problem
    pub fn push(&mut self, loc: Option<SourceLoc>, message: impl Into<String>) {
        self.0.push(Diagnostic::new(loc, message));
    }

    /// Nothing recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of problems
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate in discovery order
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    /// `Ok(())` when empty, otherwise the whole batch as one error
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Semantic(self))
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diag) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", diag)?;
        }
        Ok(())
    }
}

/// Non-fatal finding returned alongside compiled code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Statement location, when known
    pub loc: Option<SourceLoc>,
    /// Description
    pub message: String,
}

impl Warning {
    /// Warning with an optional location
    pub fn new(loc: Option<SourceLoc>, message: impl Into<String>) -> Self {
        Self {
            loc,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_located(f, self.loc.as_ref(), "warning", &self.message)
    }
}

/// `file:line: kind: msg`, `line N: kind: msg` or `kind: msg`
fn write_located(
    f: &mut fmt::Formatter<'_>,
    loc: Option<&SourceLoc>,
    kind: &str,
    message: &str,
) -> fmt::Result {
    match loc {
        Some(loc) => write!(f, "{}: {}: {}", loc, kind, message),
        None => write!(f, "{}: {}", kind, message),
    }
}

/// jcvmc compiler errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Batch errors
    /// Semantic errors collected over a whole declaration walk
    ///
    /// **Triggered by:** unsupported types, shadowing, size mismatches,
    /// missing initializers, oversized arrays or memory classes
    /// **Example:** `unsigned short x;` together with `short a[0];` reports both
    #[error("{0}")]
    Semantic(Diagnostics),

    // Fail-fast generation errors
    /// Call to a function that is neither defined nor a known intrinsic
    #[error("Undefined function: {name}")]
    UndefinedFunction {
        /// Callee name
        name: String,
    },

    /// Reference to a name with no storage assigned
    #[error("Undefined variable: {name}")]
    UndefinedVariable {
        /// Variable name
        name: String,
    },

    /// Call with the wrong number of arguments
    #[error("Function '{function}' expects {expected} arguments, got {got}")]
    ArityMismatch {
        /// Callee
        function: String,
        /// Declared parameter count
        expected: usize,
        /// Supplied argument count
        got: usize,
    },

    /// Access to a field the struct does not declare
    #[error("Unknown field '{field}' on '{base}'")]
    UnknownField {
        /// Struct or struct array name
        base: String,
        /// Requested field
        field: String,
    },

    /// `++`/`--` applied to something that is not assignable
    #[error("Invalid increment/decrement target: {0}")]
    InvalidIncrementTarget(String),

    /// Comparison whose outcome is known at compile time
    ///
    /// **Triggered by:** comparing two constants, or a byte/short against a
    /// constant outside its range
    /// **Example:** `if (b == 200)` with `byte b` is always false
    #[error("{0}")]
    TautologicalComparison(String),

    /// Wide (64-bit) value that lowering could not narrow
    #[error("{0}")]
    UnsupportedWideInteger(String),

    /// Operand or target of the wrong type
    #[error("Type error: expected {expected}, got {got}")]
    TypeError {
        /// Expected type
        expected: String,
        /// Actual type
        got: String,
    },

    /// Any other code generation failure
    #[error("Codegen error: {0}")]
    Codegen(String),

    /// A control flow merge reached with two different stack depths
    #[error("Stack depth mismatch at instruction {index}: {expected} vs {found}")]
    StackDepthMismatch {
        /// Instruction index of the merge point
        index: usize,
        /// Depth recorded first
        expected: i32,
        /// Depth arriving later
        found: i32,
    },

    /// Generated code failed a structural check
    #[error("Verification failed: {0}")]
    Verification(String),

    // Boundary errors
    /// Malformed external input (descriptors, JSON configuration)
    #[error("Parse error in {context}: {message}")]
    Parse {
        /// What was being parsed
        context: String,
        /// What went wrong
        message: String,
    },

    /// Target configuration that cannot be honoured
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Which stage of error handling an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Collected across a whole walk and reported together
    Batch,
    /// Aborts generation of the current function immediately
    FailFast,
    /// Malformed external input
    Parse,
    /// Bad target configuration
    Configuration,
}

impl Error {
    /// Create a codegen error with a message
    pub fn codegen(msg: impl Into<String>) -> Self {
        Error::Codegen(msg.into())
    }

    /// Create a type error
    pub fn type_error(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::TypeError {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Classify the error
    pub fn classify(&self) -> ErrorClass {
        match self {
            Error::Semantic(_) => ErrorClass::Batch,
            Error::Parse { .. } => ErrorClass::Parse,
            Error::Config(_) => ErrorClass::Configuration,
            _ => ErrorClass::FailFast,
        }
    }
}

/// Result type for jcvmc operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_formats() {
        let with_file = Warning::new(Some(SourceLoc::new("main.c", 12)), "sign extension");
        assert_eq!(with_file.to_string(), "main.c:12: warning: sign extension");
        let line_only = Warning::new(Some(SourceLoc::line(7)), "x");
        assert_eq!(line_only.to_string(), "line 7: warning: x");
        assert_eq!(Warning::new(None, "y").to_string(), "warning: y");
    }

    #[test]
    fn test_batch_display_lists_everything() {
        let mut diags = Diagnostics::new();
        diags.push(None, "first");
        diags.push(Some(SourceLoc::new("a.c", 3)), "second");
        let err = diags.into_result().unwrap_err();
        assert_eq!(err.classify(), ErrorClass::Batch);
        assert_eq!(err.to_string(), "error: first\na.c:3: error: second");
    }

    #[test]
    fn test_classify() {
        assert_eq!(Error::codegen("x").classify(), ErrorClass::FailFast);
        assert_eq!(Error::Config("x".into()).classify(), ErrorClass::Configuration);
        assert!(Diagnostics::new().into_result().is_ok());
    }
}
