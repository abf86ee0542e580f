use crate::error::InferError;
use crate::infer_context::InferContext;
use crate::operation::{Attribute, Operation};
use crate::ops::{
    InferSymbolicShape, check_rank, dim, operand_shape, operand_value, resolve_axes, results,
};
use crate::shape_or_data::ShapeOrData;
use crate::sym_expr::DimExpr;

/// ReduceAs operator.
///
/// The output is the recorded value of the target operand, copied as is even
/// if nothing is known about it.
pub struct ReduceAs;

impl InferSymbolicShape for ReduceAs {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let target = ctx.shape_or_data(op.operand(1)?)?.clone();
        let [out] = results(op)?;
        ctx.set_shape_or_data(out, target)
    }
}

/// ExpandAs operator.
///
/// The output has the shape of the optional second operand if it is known,
/// or the `target_shape` attribute otherwise.
pub struct ExpandAs;

impl InferSymbolicShape for ExpandAs {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let [out] = results(op)?;

        let target = match op.operand_opt(1) {
            Some(id) => ctx.shape_or_data(id)?.clone(),
            None => ShapeOrData::null(),
        };
        let shape = if !target.is_null() {
            target.shape().to_vec()
        } else {
            op.attr_ints("target_shape")?
                .into_iter()
                .map(DimExpr::Value)
                .collect()
        };
        ctx.set_shape_or_data(out, ShapeOrData::from_shape(shape))
    }
}

/// CTCAlign operator.
///
/// Produces the aligned sequences, with the shape and data of the input, and
/// their lengths, with shape `[batch, 1]`.
pub struct CtcAlign;

impl InferSymbolicShape for CtcAlign {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let input = operand_value(op, ctx, 0)?;
        let [out, out_len] = results(op)?;
        let batch = dim(input.shape(), 0, "input")?;

        let len_shape = ShapeOrData::from_shape(vec![batch, DimExpr::Value(1)]);
        ctx.set_all([(out, input), (out_len, len_shape)])
    }
}

/// SegmentPool operator.
///
/// Pools rows of `x` which share a segment ID. The number of segments is one
/// more than the largest ID if the IDs are known, or a new symbol
/// otherwise. IDs are not assumed to be sorted. With `"MEAN"` pooling, a
/// second result holds the size of each segment.
pub struct SegmentPool;

impl InferSymbolicShape for SegmentPool {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_shape(op, ctx, 0)?;
        let ids = operand_value(op, ctx, 1)?;
        let pool_type = op.attr_str_or("pooltype", "SUM")?;
        let [out] = results(op)?;
        let summed_ids = if pool_type == "MEAN" {
            Some(op.result(1)?)
        } else {
            None
        };
        if x.is_empty() {
            return Err(InferError::invalid_argument("x must have rank >= 1"));
        }

        let max_id = ids
            .data()
            .and_then(|data| data.iter().cloned().reduce(|max, id| max.max(&id)));
        let num_segments = match max_id {
            Some(max_id) => max_id + DimExpr::Value(1),
            None => ctx.next_sym_name(),
        };

        let mut out_shape = vec![num_segments.clone()];
        out_shape.extend_from_slice(&x[1..]);
        let mut entries = vec![(out, ShapeOrData::from_shape(out_shape))];
        if let Some(summed_ids) = summed_ids {
            let summed_shape = vec![num_segments, DimExpr::Value(1)];
            entries.push((summed_ids, ShapeOrData::from_shape(summed_shape)));
        }
        ctx.set_all(entries)
    }
}

/// TdmChild operator.
///
/// Looks up the children of each node of a tree. Both the child IDs and the
/// leaf mask have shape `x.shape + [child_nums]`.
pub struct TdmChild;

impl InferSymbolicShape for TdmChild {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let mut shape = operand_shape(op, ctx, 0)?;
        let [child, leaf_mask] = results(op)?;
        let child_nums = op.attr_int("child_nums")?;

        shape.push(DimExpr::Value(child_nums));
        let shape = ShapeOrData::from_shape(shape);
        ctx.set_all([(child, shape.clone()), (leaf_mask, shape)])
    }
}

/// YOLOBox operator.
///
/// Decodes a `[N, C, H, W]` feature map into `H * W * anchors` boxes per
/// image. Produces the boxes, with 4 coordinates each, and the score of each
/// class for each box.
pub struct YoloBox;

impl InferSymbolicShape for YoloBox {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_shape(op, ctx, 0)?;
        let [boxes, scores] = results(op)?;
        let anchors = op.attr_ints("anchors")?;
        let class_num = op.attr_int("class_num")?;
        check_rank(&x, 4, "x")?;

        let anchor_num = (anchors.len() / 2) as i64;
        let box_num = x[2].clone() * x[3].clone() * DimExpr::Value(anchor_num);
        let boxes_shape = vec![x[0].clone(), box_num.clone(), DimExpr::Value(4)];
        let scores_shape = vec![x[0].clone(), box_num, DimExpr::Value(class_num)];
        ctx.set_all([
            (boxes, ShapeOrData::from_shape(boxes_shape)),
            (scores, ShapeOrData::from_shape(scores_shape)),
        ])
    }
}

/// Reduction operators (Sum, Mean, Max, Min, Prod).
///
/// Reduces over the axes in the `axis` attribute, or all axes if it is
/// empty or absent. Reduced axes are removed, or kept with size 1 if
/// `keepdim` is true.
pub struct Reduce;

impl Reduce {
    fn axes_attr(op: &Operation) -> Result<Vec<i64>, InferError> {
        match op.attr("axis") {
            None => Ok(Vec::new()),
            Some(Attribute::Int(axis)) => Ok(vec![*axis]),
            Some(_) => op.attr_ints("axis"),
        }
    }
}

impl InferSymbolicShape for Reduce {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_shape(op, ctx, 0)?;
        let [out] = results(op)?;
        let keep_dims = op.attr_bool_or("keepdim", false)?;
        let axes = Self::axes_attr(op)?;

        let reduced = resolve_axes(x.len(), &axes)?;
        let shape = x
            .into_iter()
            .enumerate()
            .filter_map(|(i, size)| {
                let is_reduced = reduced.is_empty() || reduced.contains(&i);
                match (is_reduced, keep_dims) {
                    (false, _) => Some(size),
                    (true, true) => Some(DimExpr::Value(1)),
                    (true, false) => None,
                }
            })
            .collect();

        ctx.set_shape_or_data(out, ShapeOrData::from_shape(shape))
    }
}
