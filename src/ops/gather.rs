//! Operators that select elements of a tensor using indices or masks.

use crate::error::InferError;
use crate::infer_context::InferContext;
use crate::operation::Operation;
use crate::ops::{
    InferSymbolicShape, align_trailing, dim, last_dim, operand_shape, operand_value, product,
    resolve_axis, results,
};
use crate::shape_or_data::ShapeOrData;
use crate::sym_expr::DimExpr;

/// Read the gather axis from the `axis` attribute, or from the data of the
/// third operand if the attribute is absent.
fn gather_axis(op: &Operation, ctx: &InferContext) -> Result<i64, InferError> {
    if op.has_attr("axis") {
        return op.attr_int("axis");
    }
    let Some(axis_id) = op.operand_opt(2) else {
        return Err(InferError::invalid_argument(
            "gather requires an \"axis\" attribute or axis operand",
        ));
    };
    ctx.shape_or_data(axis_id)?
        .data()
        .and_then(|data| data.first())
        .and_then(|axis| axis.as_value())
        .ok_or_else(|| InferError::invalid_argument("gather axis must be a known constant"))
}

/// Gather operator.
///
/// Replaces the gathered axis of the input with the number of elements in
/// the index tensor. A scalar index removes the axis instead.
pub struct Gather;

impl InferSymbolicShape for Gather {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let input = operand_value(op, ctx, 0)?;
        let index = operand_value(op, ctx, 1)?;
        let [out] = results(op)?;
        let axis = gather_axis(op, ctx)?;

        let input_dims = input.data_or_shape();
        let index_dims = index.data_or_shape();
        let axis = resolve_axis(input_dims.len(), axis)?;

        let mut out_shape: Vec<DimExpr> = input_dims[..axis].to_vec();
        if index_dims.is_empty() {
            if input_dims.len() == 1 {
                out_shape = vec![DimExpr::Value(0)];
            } else {
                out_shape.extend_from_slice(&input_dims[axis + 1..]);
            }
        } else {
            out_shape.push(product(index.shape()));
            out_shape.extend_from_slice(&input_dims[axis + 1..]);
        }

        ctx.set_shape_or_data(out, ShapeOrData::from_shape(out_shape))
    }
}

/// GatherND operator.
///
/// The output shape is `index.shape[:-1] + x.shape[index.shape[-1]:]`, which
/// requires the last dimension of the index to be known.
pub struct GatherNd;

impl InferSymbolicShape for GatherNd {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_shape(op, ctx, 0)?;
        let mut index = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;

        let index_size = last_dim(&index, "index")?;
        let Some(index_size) = index_size.as_value() else {
            return Err(InferError::invalid_argument(format!(
                "last dim of gather_nd index must be a known constant but is {}",
                index_size
            )));
        };
        let start = usize::try_from(index_size)
            .ok()
            .filter(|&start| start <= x.len())
            .ok_or_else(|| {
                InferError::invalid_argument(format!(
                    "last dim of gather_nd index ({}) exceeds input rank ({})",
                    index_size,
                    x.len()
                ))
            })?;

        index.pop();
        index.extend_from_slice(&x[start..]);
        ctx.set_shape_or_data(out, ShapeOrData::from_shape(index))
    }
}

/// TakeAlongAxis operator.
///
/// The output has the shape of the input, except along `axis`, where it has
/// the size of the indices.
pub struct TakeAlongAxis;

impl InferSymbolicShape for TakeAlongAxis {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let arr = operand_value(op, ctx, 0)?;
        let indices = operand_value(op, ctx, 1)?;
        let [out] = results(op)?;
        let axis = op.attr_int("axis")?;

        let mut out_shape = arr.data_or_shape().to_vec();
        let axis = resolve_axis(out_shape.len(), axis)?;
        out_shape[axis] = dim(indices.data_or_shape(), axis, "indices")?;

        ctx.set_shape_or_data(out, ShapeOrData::from_shape(out_shape))
    }
}

/// IndexSelectStrided operator. Removes the `dim` axis from the input.
pub struct IndexSelectStrided;

impl InferSymbolicShape for IndexSelectStrided {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let mut shape = operand_shape(op, ctx, 0)?;
        let [out] = results(op)?;
        let axis = resolve_axis(shape.len(), op.attr_int("dim")?)?;

        shape.remove(axis);
        ctx.set_shape_or_data(out, ShapeOrData::from_shape(shape))
    }
}

/// MaskedSelect operator.
///
/// The output is a 1D tensor whose length depends on the mask's contents,
/// so it is represented by a new symbol.
pub struct MaskedSelect;

impl InferSymbolicShape for MaskedSelect {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_shape(op, ctx, 0)?;
        let mask = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;

        for (a, b) in align_trailing(&x, &mask) {
            ctx.add_broadcastable_cstr(a.clone(), b.clone());
        }
        let len = ctx.next_sym_name();
        ctx.set_shape_or_data(out, ShapeOrData::from_shape(vec![len]))
    }
}

/// TopPSampling operator.
///
/// Every result (sampled values, ids and any optional outputs) has shape
/// `[batch, 1]`.
pub struct TopPSampling;

impl InferSymbolicShape for TopPSampling {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_value(op, ctx, 0)?;
        let batch = dim(x.data_or_shape(), 0, "x")?;

        let shape = ShapeOrData::from_shape(vec![batch, DimExpr::Value(1)]);
        ctx.set_all(op.results().iter().map(|&id| (id, shape.clone())))
    }
}
