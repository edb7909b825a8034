//! Error types shared by every stage: input adaptation, draw assembly, engine calls and
//! diagnostics.

use thiserror::Error;

/// Errors raised by slimp.
///
/// None of these are retried. A failed sampling or diagnostics call surfaces exactly one of them
/// to the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// A writer callback payload does not match the column span owned by the writer.
    #[error("Shape mismatch ({what}): expected {expected} got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A writer was asked to write past the last draw of its chain.
    #[error("Draw out of range on chain {chain}: draw {draw} requested, chain holds {capacity}")]
    DrawOutOfRange {
        chain: usize,
        draw: usize,
        capacity: usize,
    },

    /// Stored dimensions of a variable differ from the declared ones.
    #[error("{stage}: variable {name} has dimensions {actual:?}, declared as {expected:?}")]
    DimensionMismatch {
        stage: String,
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Variable is not present in the requested namespace.
    #[error("Unknown {namespace} variable: {name}")]
    UnknownName {
        namespace: &'static str,
        name: String,
    },

    /// Element type tag of foreign data is not a supported numeric type.
    #[error("Unsupported element type: {0}")]
    UnsupportedType(String),

    /// Integer value does not fit the engine's integer type.
    #[error("Integer overflow in variable {name}: {value} does not fit in i32")]
    IntegerOverflow { name: String, value: String },

    /// The sampling engine returned a nonzero status.
    #[error("Error while sampling: engine returned {0}")]
    EngineFailure(i32),

    /// No model registered under this name.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Degenerate input shape.
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
