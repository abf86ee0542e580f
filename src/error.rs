use std::error::Error;
use std::fmt::{Display, Formatter};

/// The category of shape inference error. See [`InferError::kind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InferErrorKind {
    /// An operand or attribute is malformed or out of range, eg. a matrix
    /// operand that is not 2D, or an unrecognized reduction mode.
    InvalidArgument,

    /// Operand shapes violate the operator's contract, eg. operands of a
    /// rank-matched operator have different ranks.
    PreconditionNotMet,

    /// The operator is recognized, but has no inference rule.
    Unimplemented,
}

impl Display for InferErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let desc = match self {
            Self::InvalidArgument => "invalid argument",
            Self::PreconditionNotMet => "precondition not met",
            Self::Unimplemented => "unimplemented",
        };
        write!(f, "{}", desc)
    }
}

/// Error returned when an inference rule fails.
///
/// A failed rule writes no results. Constraints recorded before the failure
/// are left in the context.
#[derive(Clone, Debug, PartialEq)]
pub struct InferError {
    kind: InferErrorKind,
    message: String,

    /// Name of the operator that failed, once known.
    op_name: Option<String>,

    /// Position of the operation in the list passed to the pass driver.
    op_index: Option<usize>,
}

impl InferError {
    pub fn new(kind: InferErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            op_name: None,
            op_index: None,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(InferErrorKind::InvalidArgument, message)
    }

    pub fn precondition_not_met(message: impl Into<String>) -> Self {
        Self::new(InferErrorKind::PreconditionNotMet, message)
    }

    /// Create an error for an operator which has no inference rule.
    pub fn unimplemented(op_name: &str) -> Self {
        Self::new(
            InferErrorKind::Unimplemented,
            format!("symbolic shape inference for \"{}\" is not implemented", op_name),
        )
        .with_op_name(op_name)
    }

    /// Return the general category of error.
    pub fn kind(&self) -> InferErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Name of the operator that failed, if known.
    pub fn op_name(&self) -> Option<&str> {
        self.op_name.as_deref()
    }

    /// Index of the failing operation within a pass, if the error was
    /// returned by [`InferPass`](crate::InferPass).
    pub fn op_index(&self) -> Option<usize> {
        self.op_index
    }

    pub(crate) fn with_op_name(mut self, name: &str) -> Self {
        if self.op_name.is_none() {
            self.op_name = Some(name.to_string());
        }
        self
    }

    pub(crate) fn with_op_index(mut self, index: usize) -> Self {
        self.op_index = Some(index);
        self
    }
}

impl Display for InferError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (&self.op_name, self.op_index) {
            (Some(name), Some(index)) => write!(f, "operator \"{}\" (#{}) failed: ", name, index)?,
            (Some(name), None) => write!(f, "operator \"{}\" failed: ", name)?,
            (None, Some(index)) => write!(f, "operator #{} failed: ", index)?,
            (None, None) => {}
        }
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl Error for InferError {}
