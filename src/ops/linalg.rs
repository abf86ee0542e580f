use std::cmp::Ordering;

use crate::error::InferError;
use crate::infer_context::InferContext;
use crate::operation::Operation;
use crate::ops::{InferSymbolicShape, check_rank, dim, operand_shape, results};
use crate::shape_or_data::ShapeOrData;
use crate::sym_expr::DimExpr;

/// MatMul operator.
///
/// Operands are stacks of matrices with shapes `[*batch, M, K]` and
/// `[*batch, K, N]`, either of which may be transposed (swapping the last two
/// axes) via the `transpose_x` and `transpose_y` attributes. A 1D LHS is
/// treated as a `[1, K]` matrix and a 1D RHS as a `[K, 1]` matrix, with the
/// inserted axis removed from the output.
pub struct Matmul;

impl InferSymbolicShape for Matmul {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let mut x = operand_shape(op, ctx, 0)?;
        let mut y = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;
        let transpose_x = op.attr_bool_or("transpose_x", false)?;
        let transpose_y = op.attr_bool_or("transpose_y", false)?;

        if x.is_empty() || y.is_empty() {
            return Err(InferError::invalid_argument(
                "matmul operands must have rank >= 1",
            ));
        }

        let x_promoted = x.len() == 1;
        if x_promoted {
            x.insert(0, DimExpr::Value(1));
        }
        let y_promoted = y.len() == 1;
        if y_promoted {
            y.push(DimExpr::Value(1));
        }

        let x_ndim = x.len();
        let y_ndim = y.len();
        let x_batch = &x[..x_ndim - 2];
        let y_batch = &y[..y_ndim - 2];

        // If one operand has more batch dims, the output takes all of them.
        // Otherwise batch dims are broadcast pairwise.
        let mut out_shape = match x_ndim.cmp(&y_ndim) {
            Ordering::Greater => x_batch.to_vec(),
            Ordering::Less => y_batch.to_vec(),
            Ordering::Equal => {
                let mut batch = Vec::with_capacity(x_batch.len());
                for (a, b) in x_batch.iter().zip(y_batch) {
                    batch.push(a.broadcast(b));
                    ctx.add_broadcastable_cstr(a.clone(), b.clone());
                }
                batch
            }
        };

        let m = if transpose_x { &x[x_ndim - 1] } else { &x[x_ndim - 2] };
        let n = if transpose_y { &y[y_ndim - 2] } else { &y[y_ndim - 1] };
        if !x_promoted {
            out_shape.push(m.clone());
        }
        if !y_promoted {
            out_shape.push(n.clone());
        }

        if x_ndim == y_ndim {
            let x_k = if transpose_x { &x[x_ndim - 2] } else { &x[x_ndim - 1] };
            let y_k = if transpose_y { &y[y_ndim - 1] } else { &y[y_ndim - 2] };
            ctx.add_equal_cstr(x_k.clone(), y_k.clone());
            for (a, b) in x_batch.iter().zip(y_batch) {
                ctx.add_equal_cstr(a.clone(), b.clone());
            }
        }

        ctx.set_shape_or_data(out, ShapeOrData::from_shape(out_shape))
    }
}

/// Matrix-vector product.
pub struct Mv;

impl InferSymbolicShape for Mv {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_shape(op, ctx, 0)?;
        let vec = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;
        check_rank(&x, 2, "x")?;
        check_rank(&vec, 1, "vec")?;

        ctx.add_equal_cstr(x[1].clone(), vec[0].clone());
        ctx.set_shape_or_data(out, ShapeOrData::from_shape(vec![x[0].clone()]))
    }
}

/// Kronecker product.
///
/// Shapes are aligned from the last axis. Each output dim is the product of
/// the corresponding input dims, or the dim of the longer input where the
/// shorter input has no corresponding axis.
pub struct Kron;

impl InferSymbolicShape for Kron {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_shape(op, ctx, 0)?;
        let y = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;

        let out_ndim = x.len().max(y.len());
        let x_pad = out_ndim - x.len();
        let y_pad = out_ndim - y.len();
        let shape = (0..out_ndim)
            .map(|i| {
                let x_dim = i.checked_sub(x_pad).map(|i| &x[i]);
                let y_dim = i.checked_sub(y_pad).map(|i| &y[i]);
                match (x_dim, y_dim) {
                    (Some(a), Some(b)) => a.clone() * b.clone(),
                    (Some(dim), None) | (None, Some(dim)) => dim.clone(),
                    (None, None) => DimExpr::Value(1),
                }
            })
            .collect();

        ctx.set_shape_or_data(out, ShapeOrData::from_shape(shape))
    }
}

/// Embedding lookup.
///
/// Looks up a row of the `[vocab, dim]` weight table for each index in `x`.
pub struct Embedding;

impl InferSymbolicShape for Embedding {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let mut shape = operand_shape(op, ctx, 0)?;
        let weight = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;
        let embed_dim = dim(&weight, 1, "weight")?;

        shape.push(embed_dim);
        ctx.set_shape_or_data(out, ShapeOrData::from_shape(shape))
    }
}
