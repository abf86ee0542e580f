//! Minimal view of a host IR operation, as read by inference rules.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::error::InferError;

/// Identifies a value (an operation result or graph input) in the host IR.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);

impl ValueId {
    pub fn from_u32(id: u32) -> ValueId {
        ValueId(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Value of an operation attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Attribute>),
}

impl Attribute {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
            Self::List(_) => "list",
        }
    }
}

impl From<bool> for Attribute {
    fn from(val: bool) -> Self {
        Self::Bool(val)
    }
}

impl From<i64> for Attribute {
    fn from(val: i64) -> Self {
        Self::Int(val)
    }
}

impl From<&str> for Attribute {
    fn from(val: &str) -> Self {
        Self::Str(val.to_string())
    }
}

impl From<String> for Attribute {
    fn from(val: String) -> Self {
        Self::Str(val)
    }
}

impl From<Vec<i64>> for Attribute {
    fn from(val: Vec<i64>) -> Self {
        Self::List(val.into_iter().map(Attribute::Int).collect())
    }
}

impl<const N: usize> From<[i64; N]> for Attribute {
    fn from(val: [i64; N]) -> Self {
        Self::List(val.into_iter().map(Attribute::Int).collect())
    }
}

/// An operation in the host IR.
///
/// Inference rules treat operations as read-only. Optional operands which
/// were not supplied are represented as `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    name: String,
    operands: Vec<Option<ValueId>>,
    results: Vec<ValueId>,
    attrs: FxHashMap<String, Attribute>,
}

impl Operation {
    /// Create an operation with the given name and no operands, results or
    /// attributes.
    ///
    /// The name may include a dialect prefix, eg. `"pd_op.matmul"`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            operands: Vec::new(),
            results: Vec::new(),
            attrs: FxHashMap::default(),
        }
    }

    pub fn with_operands(mut self, operands: impl IntoIterator<Item = Option<ValueId>>) -> Self {
        self.operands = operands.into_iter().collect();
        self
    }

    pub fn with_results(mut self, results: impl IntoIterator<Item = ValueId>) -> Self {
        self.results = results.into_iter().collect();
        self
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<Attribute>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_operands(&self) -> usize {
        self.operands.len()
    }

    pub fn operands(&self) -> &[Option<ValueId>] {
        &self.operands
    }

    /// Return the value of an optional operand.
    ///
    /// Returns `None` if the index is out of range or the operand was not
    /// supplied.
    pub fn operand_opt(&self, index: usize) -> Option<ValueId> {
        self.operands.get(index).copied().flatten()
    }

    /// Return the value of a required operand.
    pub fn operand(&self, index: usize) -> Result<ValueId, InferError> {
        self.operand_opt(index).ok_or_else(|| {
            InferError::invalid_argument(format!(
                "operand {} of \"{}\" is missing",
                index, self.name
            ))
        })
    }

    pub fn num_results(&self) -> usize {
        self.results.len()
    }

    pub fn results(&self) -> &[ValueId] {
        &self.results
    }

    /// Return the value of the index'th result.
    pub fn result(&self, index: usize) -> Result<ValueId, InferError> {
        self.results.get(index).copied().ok_or_else(|| {
            InferError::invalid_argument(format!(
                "\"{}\" has no result {}",
                self.name, index
            ))
        })
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    fn require_attr(&self, name: &str) -> Result<&Attribute, InferError> {
        self.attr(name).ok_or_else(|| {
            InferError::invalid_argument(format!("required attribute \"{}\" is missing", name))
        })
    }

    fn type_error(name: &str, expected: &str, actual: &Attribute) -> InferError {
        InferError::invalid_argument(format!(
            "attribute \"{}\" should be {} but is {}",
            name,
            expected,
            actual.type_name()
        ))
    }

    pub fn attr_bool(&self, name: &str) -> Result<bool, InferError> {
        match self.require_attr(name)? {
            Attribute::Bool(val) => Ok(*val),
            other => Err(Self::type_error(name, "bool", other)),
        }
    }

    pub fn attr_int(&self, name: &str) -> Result<i64, InferError> {
        match self.require_attr(name)? {
            Attribute::Int(val) => Ok(*val),
            other => Err(Self::type_error(name, "int", other)),
        }
    }

    pub fn attr_str(&self, name: &str) -> Result<&str, InferError> {
        match self.require_attr(name)? {
            Attribute::Str(val) => Ok(val),
            other => Err(Self::type_error(name, "string", other)),
        }
    }

    /// Get an attribute holding a list of integers.
    pub fn attr_ints(&self, name: &str) -> Result<Vec<i64>, InferError> {
        match self.require_attr(name)? {
            Attribute::List(items) => items
                .iter()
                .map(|item| match item {
                    Attribute::Int(val) => Ok(*val),
                    other => Err(Self::type_error(name, "list of int", other)),
                })
                .collect(),
            other => Err(Self::type_error(name, "list of int", other)),
        }
    }

    /// Get an optional bool attribute, using `default` if it is missing.
    pub fn attr_bool_or(&self, name: &str, default: bool) -> Result<bool, InferError> {
        if self.has_attr(name) {
            self.attr_bool(name)
        } else {
            Ok(default)
        }
    }

    pub fn attr_int_or(&self, name: &str, default: i64) -> Result<i64, InferError> {
        if self.has_attr(name) {
            self.attr_int(name)
        } else {
            Ok(default)
        }
    }

    pub fn attr_str_or<'a>(&'a self, name: &str, default: &'a str) -> Result<&'a str, InferError> {
        if self.has_attr(name) {
            self.attr_str(name)
        } else {
            Ok(default)
        }
    }

    pub fn attr_ints_or(&self, name: &str, default: &[i64]) -> Result<Vec<i64>, InferError> {
        if self.has_attr(name) {
            self.attr_ints(name)
        } else {
            Ok(default.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Attribute, Operation, ValueId};
    use crate::error::InferErrorKind;

    fn value(id: u32) -> ValueId {
        ValueId::from_u32(id)
    }

    #[test]
    fn test_operands_and_results() {
        let op = Operation::new("swiglu")
            .with_operands([Some(value(1)), None])
            .with_results([value(2)]);

        assert_eq!(op.num_operands(), 2);
        assert_eq!(op.operand(0), Ok(value(1)));
        assert_eq!(op.operand_opt(1), None);
        assert_eq!(op.operand_opt(5), None);
        assert_eq!(
            op.operand(1).err().map(|e| e.kind()),
            Some(InferErrorKind::InvalidArgument)
        );
        assert_eq!(op.result(0), Ok(value(2)));
        assert!(op.result(1).is_err());
    }

    #[test]
    fn test_typed_attrs() {
        let op = Operation::new("conv2d")
            .with_attr("strides", [2, 2])
            .with_attr("data_format", "NCHW")
            .with_attr("transpose_x", true)
            .with_attr("axis", -1);

        assert_eq!(op.attr_ints("strides"), Ok(vec![2, 2]));
        assert_eq!(op.attr_str("data_format"), Ok("NCHW"));
        assert_eq!(op.attr_bool("transpose_x"), Ok(true));
        assert_eq!(op.attr_int("axis"), Ok(-1));
        assert_eq!(op.attr_bool_or("transpose_y", false), Ok(false));
        assert_eq!(op.attr_int_or("axis", 0), Ok(-1));
        assert_eq!(op.attr_ints_or("dilations", &[1, 1]), Ok(vec![1, 1]));
        assert_eq!(op.attr_str_or("padding_algorithm", "EXPLICIT"), Ok("EXPLICIT"));
    }

    #[test]
    fn test_attr_errors() {
        let op = Operation::new("kldiv_loss")
            .with_attr("reduction", 3)
            .with_attr("mixed", Attribute::List(vec![Attribute::Int(1), Attribute::Bool(true)]));

        for err in [
            op.attr_str("reduction").err(),
            op.attr_str("missing").err(),
            op.attr_ints("mixed").err(),
            op.attr_bool_or("reduction", true).err(),
        ] {
            assert_eq!(err.map(|e| e.kind()), Some(InferErrorKind::InvalidArgument));
        }
    }
}
