//! Symbolic shapes, optionally paired with symbolic element values.

use std::fmt;

use crate::sym_expr::DimExpr;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Repr {
    Tensor {
        shape: Vec<DimExpr>,
        data: Option<Vec<DimExpr>>,
    },
    Null,
}

/// Symbolic shape of an IR value, plus its element values when they are known.
///
/// Most values only have a known shape. Integer tensors that describe shapes,
/// sizes or axes (eg. the output of a `shape` op) additionally carry their
/// elements as symbolic expressions, so that rules consuming them can see
/// through to the dimensions they describe.
///
/// ```
/// use symshape::{DimExpr, ShapeOrData};
///
/// // A matrix with `rows` rows and 3 columns, with unknown contents.
/// let matrix = ShapeOrData::from_shape(vec!["rows".into(), 3.into()]);
/// assert_eq!(matrix.rank(), Some(2));
/// assert_eq!(matrix.data(), None);
///
/// // The shape of the matrix, as a 1D tensor with known contents.
/// let shape = ShapeOrData::from_data(matrix.shape().to_vec());
/// assert_eq!(shape.shape(), [DimExpr::from(2)]);
/// assert_eq!(shape.data_or_shape(), matrix.shape());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShapeOrData(Repr);

impl ShapeOrData {
    /// Create a value with the given shape and unknown contents.
    pub fn from_shape(shape: Vec<DimExpr>) -> Self {
        Self(Repr::Tensor { shape, data: None })
    }

    /// Create a value with the given shape and element values.
    pub fn with_data(shape: Vec<DimExpr>, data: Vec<DimExpr>) -> Self {
        Self(Repr::Tensor {
            shape,
            data: Some(data),
        })
    }

    /// Create a 1D value whose elements are `data`.
    pub fn from_data(data: Vec<DimExpr>) -> Self {
        let len = DimExpr::Value(data.len() as i64);
        Self::with_data(vec![len], data)
    }

    /// Create a value about which nothing is known.
    pub fn null() -> Self {
        Self(Repr::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.0, Repr::Null)
    }

    /// Return the shape, or an empty slice if this value is null.
    pub fn shape(&self) -> &[DimExpr] {
        match &self.0 {
            Repr::Tensor { shape, .. } => shape,
            Repr::Null => &[],
        }
    }

    /// Return the element values, if known.
    pub fn data(&self) -> Option<&[DimExpr]> {
        match &self.0 {
            Repr::Tensor { data, .. } => data.as_deref(),
            Repr::Null => None,
        }
    }

    /// Return the element values if known, or the shape otherwise.
    pub fn data_or_shape(&self) -> &[DimExpr] {
        self.data().unwrap_or(self.shape())
    }

    /// Return the number of dimensions, or `None` if this value is null.
    pub fn rank(&self) -> Option<usize> {
        match &self.0 {
            Repr::Tensor { shape, .. } => Some(shape.len()),
            Repr::Null => None,
        }
    }

    /// Return the element values as integers, if they are all known
    /// constants.
    pub fn to_constant(&self) -> Option<Vec<i64>> {
        self.data()?.iter().map(DimExpr::as_value).collect()
    }

    /// Simplify the expressions in the shape and data.
    ///
    /// See [`DimExpr::simplify`].
    pub fn simplify(self) -> Self {
        match self.0 {
            Repr::Tensor { shape, data } => Self(Repr::Tensor {
                shape: shape.iter().map(DimExpr::simplify).collect(),
                data: data.map(|data| data.iter().map(DimExpr::simplify).collect()),
            }),
            Repr::Null => self,
        }
    }
}

impl fmt::Display for ShapeOrData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_list(f: &mut fmt::Formatter<'_>, items: &[DimExpr]) -> fmt::Result {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", item)?;
            }
            write!(f, "]")
        }

        match &self.0 {
            Repr::Tensor { shape, data } => {
                write!(f, "shape")?;
                write_list(f, shape)?;
                if let Some(data) = data {
                    write!(f, " data")?;
                    write_list(f, data)?;
                }
                Ok(())
            }
            Repr::Null => write!(f, "null"),
        }
    }
}

#[cfg(test)]
pub(crate) use tests::{sym_data, sym_elems, sym_shape};
