//! Symbolic shape inference rules for individual operators.
//!
//! Each rule reads the [`ShapeOrData`] of the operands it needs from an
//! [`InferContext`], records constraints between operand dimensions and
//! writes the [`ShapeOrData`] of each result. Rules validate operand ranks and
//! attributes before recording anything, so a rule that fails on malformed
//! input leaves the context untouched.

use smallvec::SmallVec;

use crate::error::{InferError, InferErrorKind};
use crate::infer_context::InferContext;
use crate::operation::{Operation, ValueId};
use crate::shape_or_data::ShapeOrData;
use crate::sym_expr::DimExpr;

mod conv;
mod elementwise;
mod gather;
mod linalg;
mod loss;
mod misc;

pub use conv::Conv;
pub use elementwise::{
    Allclose, Atan2, Binary, BinaryKind, BoxClip, EqualAll, FillDiagonalTensor, PassThrough,
    ShapeOp, Swiglu, Unary,
};
pub use gather::{Gather, GatherNd, IndexSelectStrided, MaskedSelect, TakeAlongAxis, TopPSampling};
pub use linalg::{Embedding, Kron, Matmul, Mv};
pub use loss::{BceLoss, Cross, HuberLoss, KldivLoss, MarginCrossEntropy};
pub use misc::{CtcAlign, ExpandAs, Reduce, ReduceAs, SegmentPool, TdmChild, YoloBox};

/// Infer the shapes of an operation's results from the shapes of its
/// operands.
pub trait InferSymbolicShape {
    /// Read operand shapes from `ctx`, record constraints and write the
    /// shape of each result of `op`.
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError>;
}

/// Rule for operators that are recognized but have no inference rule.
pub struct Unimplemented;

impl InferSymbolicShape for Unimplemented {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        _ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        Err(InferError::unimplemented(op.name()))
    }
}

/// Axis indices for a typical tensor rank.
pub(crate) type AxisList = SmallVec<[usize; 4]>;

/// Resolve an index given as a value in `[-len, len-1]` to a positive index in
/// `[0, len)`, or return None if the index is out of bounds.
fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len.min(i64::MAX as usize) as i64;
    if index < -len || index >= len {
        return None;
    }

    if index >= 0 {
        Some(index as usize)
    } else {
        Some((len + index) as usize)
    }
}

/// Resolve an axis given as a value in `[-ndim, ndim-1]` to the zero-based
/// dimension of a tensor with `ndim` dimensions.
///
/// Negative axis values count backwards from the last dimension.
pub(crate) fn resolve_axis(ndim: usize, axis: i64) -> Result<usize, InferError> {
    resolve_index(ndim, axis).ok_or_else(|| {
        InferError::invalid_argument(format!(
            "axis {} is out of range for a tensor of rank {}",
            axis, ndim
        ))
    })
}

/// Resolve a sequence of axes values in `[-ndim, ndim-1]` to zero-based dimension
/// indexes in a tensor with `ndim` dimensions.
///
/// The result is sorted and contains no duplicates.
pub(crate) fn resolve_axes(ndim: usize, axes: &[i64]) -> Result<AxisList, InferError> {
    let mut resolved: AxisList = axes
        .iter()
        .map(|&axis| resolve_axis(ndim, axis))
        .collect::<Result<_, _>>()?;
    resolved.sort();
    resolved.dedup();
    Ok(resolved)
}

/// Return the recorded value of operand `index`.
///
/// Fails with `InvalidArgument` if the operand is missing or nothing is known
/// about it.
pub(crate) fn operand_value(
    op: &Operation,
    ctx: &InferContext,
    index: usize,
) -> Result<ShapeOrData, InferError> {
    let value = ctx.shape_or_data(op.operand(index)?)?;
    if value.is_null() {
        return Err(InferError::invalid_argument(format!(
            "shape of operand {} is unknown",
            index
        )));
    }
    Ok(value.clone())
}

/// Return the shape of operand `index`.
pub(crate) fn operand_shape(
    op: &Operation,
    ctx: &InferContext,
    index: usize,
) -> Result<Vec<DimExpr>, InferError> {
    operand_value(op, ctx, index).map(|value| value.shape().to_vec())
}

/// Return the size of dimension `index` in `shape`, failing with
/// `InvalidArgument` if it is out of range.
pub(crate) fn dim(shape: &[DimExpr], index: usize, what: &str) -> Result<DimExpr, InferError> {
    shape.get(index).cloned().ok_or_else(|| {
        InferError::invalid_argument(format!(
            "{} has rank {} but dimension {} is required",
            what,
            shape.len(),
            index
        ))
    })
}

/// Return the size of the last dimension in `shape`.
pub(crate) fn last_dim(shape: &[DimExpr], what: &str) -> Result<DimExpr, InferError> {
    shape.last().cloned().ok_or_else(|| {
        InferError::invalid_argument(format!("{} must have rank >= 1", what))
    })
}

/// Check that `shape` has rank `ndim`.
pub(crate) fn check_rank(shape: &[DimExpr], ndim: usize, what: &str) -> Result<(), InferError> {
    if shape.len() != ndim {
        return Err(InferError::invalid_argument(format!(
            "rank of {} should be {} but is {}",
            what,
            ndim,
            shape.len()
        )));
    }
    Ok(())
}

/// Check that two operand shapes have the same rank.
///
/// The error kind differs between operators, so it is chosen by the caller.
pub(crate) fn check_same_rank(
    lhs: &[DimExpr],
    rhs: &[DimExpr],
    kind: InferErrorKind,
    names: (&str, &str),
) -> Result<(), InferError> {
    if lhs.len() != rhs.len() {
        return Err(InferError::new(
            kind,
            format!(
                "{} and {} must have the same rank but got {} vs {}",
                names.0,
                names.1,
                lhs.len(),
                rhs.len()
            ),
        ));
    }
    Ok(())
}

/// Record an `Equal` constraint between each pair of corresponding
/// dimensions in `lhs` and `rhs`.
pub(crate) fn add_equal_per_axis(ctx: &mut InferContext, lhs: &[DimExpr], rhs: &[DimExpr]) {
    for (a, b) in lhs.iter().zip(rhs) {
        ctx.add_equal_cstr(a.clone(), b.clone());
    }
}

/// Pair the dimensions of two shapes aligned from the trailing axis.
///
/// Leading dimensions of the longer shape, which have no counterpart in the
/// shorter shape, are skipped.
pub(crate) fn align_trailing<'a>(
    lhs: &'a [DimExpr],
    rhs: &'a [DimExpr],
) -> impl Iterator<Item = (&'a DimExpr, &'a DimExpr)> {
    let lhs_skip = lhs.len().saturating_sub(rhs.len());
    let rhs_skip = rhs.len().saturating_sub(lhs.len());
    lhs[lhs_skip..].iter().zip(&rhs[rhs_skip..])
}

/// Compute the broadcast of two shapes, following numpy broadcasting rules.
///
/// A `Broadcastable` constraint is recorded for each aligned pair of
/// dimensions where neither side is the constant 1. Fails with
/// `PreconditionNotMet` if two aligned dimensions are different constants,
/// neither of which is 1. Constraints are only recorded once the whole shape
/// has been checked.
pub(crate) fn broadcast_shapes(
    ctx: &mut InferContext,
    lhs: &[DimExpr],
    rhs: &[DimExpr],
) -> Result<Vec<DimExpr>, InferError> {
    let out_ndim = lhs.len().max(rhs.len());
    let lhs_pad = out_ndim - lhs.len();
    let rhs_pad = out_ndim - rhs.len();
    let one = DimExpr::Value(1);

    let lhs_iter = std::iter::repeat_n(&one, lhs_pad).chain(lhs);
    let rhs_iter = std::iter::repeat_n(&one, rhs_pad).chain(rhs);

    let mut out_shape = Vec::with_capacity(out_ndim);
    let mut pending = Vec::new();
    for (a, b) in lhs_iter.zip(rhs_iter) {
        match (a, b) {
            (DimExpr::Value(x), DimExpr::Value(y)) if x != y && *x != 1 && *y != 1 => {
                return Err(InferError::precondition_not_met(format!(
                    "dimensions {} and {} cannot be broadcast together",
                    x, y
                )));
            }
            (DimExpr::Value(1), _) | (_, DimExpr::Value(1)) => {}
            _ => pending.push((a.clone(), b.clone())),
        }
        out_shape.push(a.broadcast(b));
    }

    for (a, b) in pending {
        ctx.add_broadcastable_cstr(a, b);
    }
    Ok(out_shape)
}

/// Return the product of `dims`, or 1 if empty.
pub(crate) fn product(dims: &[DimExpr]) -> DimExpr {
    dims.iter()
        .cloned()
        .reduce(|prod, dim| prod * dim)
        .unwrap_or(DimExpr::Value(1))
}

/// Return the result IDs of `op`, failing if it has fewer than `count`.
pub(crate) fn results<const N: usize>(op: &Operation) -> Result<[ValueId; N], InferError> {
    let mut ids = [ValueId::from_u32(0); N];
    for (i, id) in ids.iter_mut().enumerate() {
        *id = op.result(i)?;
    }
    Ok(ids)
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::InferSymbolicShape;
    use crate::env::InferConfig;
    use crate::error::InferError;
    use crate::infer_context::InferContext;
    use crate::operation::{Operation, ValueId};
    use crate::shape_or_data::ShapeOrData;

    /// Operation name, operands and results wired up against a fresh
    /// context, for testing a single rule.
    pub struct RuleTest {
        pub op: Operation,
        pub ctx: InferContext,
        num_results: u32,
    }

    impl RuleTest {
        /// Create an operation whose operands have the given shapes. Operand
        /// `i` has value ID `i + 1`. `None` entries are absent operands.
        pub fn new(name: &str, operands: Vec<Option<ShapeOrData>>, num_results: u32) -> Self {
            Self::with_config(name, operands, num_results, InferConfig::default())
        }

        /// Create a test whose context uses the given configuration.
        pub fn with_config(
            name: &str,
            operands: Vec<Option<ShapeOrData>>,
            num_results: u32,
            config: InferConfig,
        ) -> Self {
            let mut ctx = InferContext::with_config(config);
            let mut ids = Vec::new();
            for (i, operand) in operands.into_iter().enumerate() {
                let id = ValueId::from_u32(i as u32 + 1);
                match operand {
                    Some(value) => {
                        ctx.set_shape_or_data(id, value).unwrap();
                        ids.push(Some(id));
                    }
                    None => ids.push(None),
                }
            }
            let results = (0..num_results).map(|i| ValueId::from_u32(100 + i));
            let op = Operation::new(name).with_operands(ids).with_results(results);
            Self {
                op,
                ctx,
                num_results,
            }
        }

        /// Create a test where every operand is present.
        pub fn with_operands(name: &str, operands: Vec<ShapeOrData>, num_results: u32) -> Self {
            Self::new(name, operands.into_iter().map(Some).collect(), num_results)
        }

        pub fn attr(mut self, name: &str, value: impl Into<crate::operation::Attribute>) -> Self {
            self.op = self.op.with_attr(name, value);
            self
        }

        pub fn run(&mut self, rule: &dyn InferSymbolicShape) -> Result<(), InferError> {
            rule.infer_symbolic_shape(&self.op, &mut self.ctx)
        }

        /// Return the shape recorded for result `index`.
        pub fn result(&self, index: u32) -> ShapeOrData {
            assert!(index < self.num_results);
            self.ctx
                .shape_or_data(ValueId::from_u32(100 + index))
                .unwrap()
                .clone()
        }

        pub fn has_result(&self, index: u32) -> bool {
            self.ctx.contains(ValueId::from_u32(100 + index))
        }

        pub fn num_equal(&self) -> usize {
            self.ctx.constraints().equalities().count()
        }

        pub fn num_broadcastable(&self) -> usize {
            self.ctx.constraints().broadcastables().count()
        }
    }
}

#[cfg(test)]
mod tests {
    use symshape_testing::TestCases;

    use super::{InferSymbolicShape, Unimplemented, broadcast_shapes, resolve_axes, resolve_axis};
    use super::test_util::RuleTest;
    use crate::error::InferErrorKind;
    use crate::infer_context::InferContext;
    use crate::shape_or_data::sym_elems;
    use crate::sym_expr::DimExpr;

    #[test]
    fn test_resolve_axis() {
        assert_eq!(resolve_axis(3, 0).ok(), Some(0));
        assert_eq!(resolve_axis(3, -1).ok(), Some(2));
        assert!(resolve_axis(3, 3).is_err());
        assert!(resolve_axis(3, -4).is_err());
        assert!(resolve_axis(0, 0).is_err());

        assert_eq!(resolve_axes(4, &[-1, 1, 3]).ok().map(|a| a.to_vec()), Some(vec![1, 3]));
    }

    #[test]
    fn test_broadcast_shapes() {
        #[derive(Debug)]
        struct Case {
            lhs: Vec<DimExpr>,
            rhs: Vec<DimExpr>,
            expected: Vec<DimExpr>,
            broadcastable: usize,
        }

        let cases = [
            Case {
                lhs: sym_elems!("batch"),
                rhs: sym_elems!("batch"),
                expected: sym_elems!("batch"),
                broadcastable: 1,
            },
            Case {
                lhs: sym_elems!(1, 5),
                rhs: sym_elems!(4, 1),
                expected: sym_elems!(4, 5),
                broadcastable: 0,
            },
            Case {
                lhs: sym_elems!(1, "bar"),
                rhs: sym_elems!("foo", 1),
                expected: sym_elems!("foo", "bar"),
                broadcastable: 0,
            },
            Case {
                lhs: sym_elems!("seq", 16),
                rhs: sym_elems!(16),
                expected: sym_elems!("seq", 16),
                broadcastable: 1,
            },
            Case {
                lhs: sym_elems!("foo"),
                rhs: sym_elems!("bar"),
                expected: vec![DimExpr::from("foo").broadcast(&DimExpr::from("bar"))],
                broadcastable: 1,
            },
        ];

        cases.test_each(|case| {
            let mut ctx = InferContext::new();
            let shape = broadcast_shapes(&mut ctx, &case.lhs, &case.rhs).unwrap();
            assert_eq!(shape, case.expected);
            assert_eq!(ctx.constraints().broadcastables().count(), case.broadcastable);
        });
    }

    #[test]
    fn test_broadcast_shapes_incompatible() {
        let mut ctx = InferContext::new();
        let err = broadcast_shapes(&mut ctx, &sym_elems!("n", 5), &sym_elems!("n", 3))
            .err()
            .unwrap();
        assert_eq!(err.kind(), InferErrorKind::PreconditionNotMet);
        assert!(ctx.constraints().is_empty());
    }

    #[test]
    fn test_unimplemented() {
        let mut test = RuleTest::with_operands("bincount", vec![], 1);
        let err = test.run(&Unimplemented).err().unwrap();
        assert_eq!(err.kind(), InferErrorKind::Unimplemented);
        assert_eq!(err.op_name(), Some("bincount"));
        assert!(!test.has_result(0));

        let mut ctx = InferContext::new();
        assert!(
            Unimplemented
                .infer_symbolic_shape(&test.op, &mut ctx)
                .is_err()
        );
    }
}
