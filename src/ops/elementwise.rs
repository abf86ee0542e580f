//! Elementwise operators, comparisons and pass-through rules.

use crate::error::{InferError, InferErrorKind};
use crate::infer_context::InferContext;
use crate::operation::Operation;
use crate::ops::{
    InferSymbolicShape, add_equal_per_axis, broadcast_shapes, check_rank, check_same_rank,
    last_dim, operand_shape, operand_value, results,
};
use crate::shape_or_data::ShapeOrData;
use crate::sym_expr::DimExpr;

/// AllClose operator. Both operands must have the same shape and the result
/// is a scalar.
pub struct Allclose;

impl InferSymbolicShape for Allclose {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_shape(op, ctx, 0)?;
        let y = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;
        check_same_rank(&x, &y, InferErrorKind::PreconditionNotMet, ("x", "y"))?;

        add_equal_per_axis(ctx, &x, &y);
        ctx.set_shape_or_data(out, ShapeOrData::from_shape(Vec::new()))
    }
}

/// Atan2 operator, and other binary operators whose operands must have the
/// same shape as the result (eg. Binomial).
pub struct Atan2;

impl InferSymbolicShape for Atan2 {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_shape(op, ctx, 0)?;
        let y = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;
        check_same_rank(&x, &y, InferErrorKind::PreconditionNotMet, ("x", "y"))?;

        add_equal_per_axis(ctx, &x, &y);
        ctx.set_shape_or_data(out, ShapeOrData::from_shape(x))
    }
}

/// EqualAll operator. Produces a scalar indicating whether two tensors are
/// equal.
pub struct EqualAll;

impl InferSymbolicShape for EqualAll {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_shape(op, ctx, 0)?;
        let y = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;
        if x.len() < y.len() {
            return Err(InferError::invalid_argument(format!(
                "rank of y ({}) should not be greater than rank of x ({})",
                y.len(),
                x.len()
            )));
        }
        ctx.set_shape_or_data(out, ShapeOrData::from_shape(Vec::new()))
    }
}

/// BoxClip operator.
///
/// Boxes have 4 coordinates in the last dimension of the input and the image
/// info is a `[batch, 3]` matrix.
pub struct BoxClip;

impl InferSymbolicShape for BoxClip {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let input = operand_shape(op, ctx, 0)?;
        let im_info = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;
        let box_size = last_dim(&input, "input")?;
        check_rank(&im_info, 2, "im_info")?;

        ctx.add_equal_cstr(box_size, DimExpr::Value(4));
        ctx.add_equal_cstr(im_info[1].clone(), DimExpr::Value(3));
        ctx.set_shape_or_data(out, ShapeOrData::from_shape(input))
    }
}

/// SwiGLU operator.
///
/// With two operands, both halves are given separately and must have the
/// same shape. With one operand, the halves are concatenated along the last
/// axis, so the output's last dimension is half that of the input.
pub struct Swiglu;

impl InferSymbolicShape for Swiglu {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_value(op, ctx, 0)?;
        let [out] = results(op)?;

        if op.operand_opt(1).is_some() {
            let y = operand_shape(op, ctx, 1)?;
            check_same_rank(x.shape(), &y, InferErrorKind::PreconditionNotMet, ("x", "y"))?;
            add_equal_per_axis(ctx, x.shape(), &y);
            ctx.set_shape_or_data(out, x)
        } else {
            let mut shape = x.shape().to_vec();
            let last = last_dim(&shape, "x")?;
            let ndim = shape.len();
            shape[ndim - 1] = last / DimExpr::Value(2);
            ctx.set_shape_or_data(out, ShapeOrData::from_shape(shape))
        }
    }
}

/// Rule for operators whose result is identical to one of their operands,
/// including its data (eg. IsClose, SearchSorted and IndexSample, whose
/// output has the shape of their second operand).
pub struct PassThrough {
    pub operand: usize,
}

impl InferSymbolicShape for PassThrough {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let value = ctx.shape_or_data(op.operand(self.operand)?)?.clone();
        let [out] = results(op)?;
        ctx.set_shape_or_data(out, value)
    }
}

/// FillDiagonalTensor operator.
pub struct FillDiagonalTensor;

impl InferSymbolicShape for FillDiagonalTensor {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_shape(op, ctx, 0)?;
        let [out] = results(op)?;
        ctx.set_shape_or_data(out, ShapeOrData::from_shape(x))
    }
}

/// Shape inference for unary operators.
///
/// The output has the same shape as the first operand. If `keep_data` is
/// true (eg. for Assign and Cast), the operand's data is also propagated.
pub struct Unary {
    pub keep_data: bool,
}

impl InferSymbolicShape for Unary {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_value(op, ctx, 0)?;
        let [out] = results(op)?;
        let value = if self.keep_data {
            x
        } else {
            ShapeOrData::from_shape(x.shape().to_vec())
        };
        ctx.set_shape_or_data(out, value)
    }
}

/// Shape operator.
///
/// Returns the shape of the input as a 1D tensor. This is the usual source of
/// values whose data is known.
pub struct ShapeOp;

impl InferSymbolicShape for ShapeOp {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_shape(op, ctx, 0)?;
        let [out] = results(op)?;
        ctx.set_shape_or_data(out, ShapeOrData::from_data(x))
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BinaryKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
}

impl BinaryKind {
    fn apply(self, x: &DimExpr, y: &DimExpr) -> DimExpr {
        match self {
            Self::Add => x.clone() + y.clone(),
            Self::Subtract => x.clone() - y.clone(),
            Self::Multiply => x.clone() * y.clone(),
            Self::Divide => x.clone() / y.clone(),
            Self::Maximum => x.max(y),
            Self::Minimum => x.min(y),
        }
    }
}

/// Perform a binary operation on the symbolic _data_ of two values or return
/// None if either value has no data or their lengths are incompatible.
fn symbolic_binary_op(
    lhs: &ShapeOrData,
    rhs: &ShapeOrData,
    kind: BinaryKind,
) -> Option<Vec<DimExpr>> {
    let lhs_data = lhs.data()?;
    let rhs_data = rhs.data()?;
    let bin_op = |(x, y)| kind.apply(x, y);

    let data = match (lhs_data.len(), rhs_data.len()) {
        (1, _) => lhs_data.iter().cycle().zip(rhs_data).map(bin_op).collect(),
        (_, 1) => lhs_data.iter().zip(rhs_data.iter().cycle()).map(bin_op).collect(),
        (x, y) if x == y => lhs_data.iter().zip(rhs_data).map(bin_op).collect(),
        _ => return None,
    };
    Some(data)
}

/// Broadcasting binary operators (Add, Subtract etc.)
///
/// The output shape is the broadcast of the operand shapes. When both
/// operands carry data, the output's data is computed elementwise.
pub struct Binary(pub BinaryKind);

impl InferSymbolicShape for Binary {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let lhs = operand_value(op, ctx, 0)?;
        let rhs = operand_value(op, ctx, 1)?;
        let [out] = results(op)?;

        let data = symbolic_binary_op(&lhs, &rhs, self.0);
        let shape = broadcast_shapes(ctx, lhs.shape(), rhs.shape())?;
        let value = match data {
            Some(data) => ShapeOrData::with_data(shape, data),
            None => ShapeOrData::from_shape(shape),
        };
        ctx.set_shape_or_data(out, value)
    }
}
