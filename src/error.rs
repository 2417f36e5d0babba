//! Error types for the Basil IL toolchain

use thiserror::Error;

use crate::support::source::SourceLoc;

/// Toolchain errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Malformed IL text. Parsing aborts; no partial module is returned.
    ///
    /// **Triggered by:** unknown opcode, wrong arity, type mismatch,
    /// dangling label, non-SSA redefinition
    #[error("parse error at {file}:{line}:{col}: {message}")]
    Parse {
        /// File the offending token came from
        file: String,
        /// Line of the offending token (1-indexed)
        line: u32,
        /// Column of the offending token (1-indexed)
        col: u32,
        /// Error description
        message: String,
    },

    /// Structural, SSA, or type violation found by the verifier.
    ///
    /// Carries the number of accumulated diagnostics; the full report is
    /// returned alongside by [`crate::verify::verify_module`].
    #[error("module failed verification with {count} error(s)")]
    Verify {
        /// Number of diagnostics in the report
        count: usize,
    },

    /// The builder refused an ill-formed construction request
    #[error("builder error: {0}")]
    Build(String),

    /// Runtime fault that terminated execution
    #[error("trap: {kind} (fn=@{func} blk={block} ip=#{ip})")]
    Trap {
        /// What faulted
        kind: TrapKind,
        /// Function the fault occurred in
        func: String,
        /// Block label
        block: String,
        /// Instruction index within the block
        ip: usize,
        /// Source location when known
        loc: SourceLoc,
    },

    /// Host bridge failure (unregistered extern, signature mismatch)
    #[error("host error: {0}")]
    Host(String),

    /// A pass or the VM violated one of its own invariants.
    /// Never recovered from; the driver aborts with a nonzero exit.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    /// Filesystem failure surfaced by the driver
    #[error("io error: {path}: {message}")]
    Io {
        /// Path involved
        path: String,
        /// OS error text
        message: String,
    },
}

/// Runtime fault kinds recognized by the VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    /// Integer division or remainder by zero
    DivideByZero,
    /// `sdiv`/`srem` overflow: `INT64_MIN / -1`
    IntegerOverflow,
    /// Load or store through a null pointer
    NullPointer,
    /// Typed load/store not naturally aligned
    Misaligned,
    /// Load or store outside any mapped region
    OutOfBounds,
    /// Explicit `trap` instruction reached
    Explicit,
    /// Frame stack space or call depth exhausted
    StackExhausted,
}

impl std::fmt::Display for TrapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TrapKind::DivideByZero => "divide by zero",
            TrapKind::IntegerOverflow => "integer overflow",
            TrapKind::NullPointer => "null pointer access",
            TrapKind::Misaligned => "misaligned access",
            TrapKind::OutOfBounds => "out-of-bounds access",
            TrapKind::Explicit => "explicit trap",
            TrapKind::StackExhausted => "stack exhausted",
        };
        f.write_str(text)
    }
}

impl Error {
    /// Create a parse error pinned to a token location
    pub fn parse(file: impl Into<String>, line: u32, col: u32, message: impl Into<String>) -> Self {
        Error::Parse {
            file: file.into(),
            line,
            col,
            message: message.into(),
        }
    }

    /// Create a builder error with a message
    pub fn build(msg: impl Into<String>) -> Self {
        Error::Build(msg.into())
    }

    /// Create an internal invariant error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Wrap an IO failure with the path it happened on
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Result type for toolchain operations
pub type Result<T> = std::result::Result<T, Error>;
