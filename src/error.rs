use thiserror::Error;

macro_rules! unreachable_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Unreachable {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Unreachable {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Construction errors (`TypeMismatch`, `ScopeViolation`, `NodeInUse`) are surfaced to the
/// caller and leave the graph unchanged. Conversion errors (`IrreducibleCfg`,
/// `UnsupportedOperation`) abort the current bridge operation. `Unreachable` indicates a
/// violated internal invariant; a pass that observes it must be restarted on a fresh graph.
///
/// Normalization cannot fail by construction: a rewrite that does not apply reports `false`
/// instead of returning an error.
#[derive(Error, Debug)]
pub enum Error {
    /// An input was wired to an origin of an incompatible type.
    ///
    /// Every input must carry exactly the type of its origin. The error reports both
    /// sides in their diagnostic display form.
    #[error("Type mismatch - expected '{expected}', found '{found}'")]
    TypeMismatch {
        /// The type the port expects
        expected: String,
        /// The type the origin produces
        found: String,
    },

    /// An output was referenced outside its region without a routing variable.
    ///
    /// Values cross region boundaries only through the entry/exit/loop/context
    /// variable mechanisms of structural nodes.
    #[error("Origin referenced outside its region without a routing variable")]
    ScopeViolation,

    /// A node was removed while its outputs still have users.
    ///
    /// Divert the users to another origin first, then remove the node.
    #[error("Cannot remove a node whose outputs still have users")]
    NodeInUse,

    /// The structural analysis could not reduce the source control flow graph.
    ///
    /// Conversion requires reducible control flow with tail-controlled loops;
    /// anything else must be restructured by the front end first.
    #[error("Control flow graph is irreducible")]
    IrreducibleCfg,

    /// Intake encountered a construct the core does not model.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// An internal invariant was violated.
    ///
    /// The current pass is aborted; the graph must be considered stale.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated invariant
    /// * `file` - Source file where the violation was detected
    /// * `line` - Source line where the violation was detected
    #[error("Unreachable - {file}:{line}: {message}")]
    Unreachable {
        /// The message to be printed for the invariant violation
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },
}
