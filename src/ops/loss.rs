//! Loss functions and other operators which relate two tensors of the same
//! rank axis by axis.

use crate::error::{InferError, InferErrorKind};
use crate::infer_context::InferContext;
use crate::operation::Operation;
use crate::ops::{
    InferSymbolicShape, add_equal_per_axis, check_same_rank, operand_shape, operand_value,
    resolve_axis, results,
};
use crate::shape_or_data::ShapeOrData;
use crate::sym_expr::DimExpr;

/// BCELoss operator. The output has the same shape as the input.
pub struct BceLoss;

impl InferSymbolicShape for BceLoss {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let input = operand_value(op, ctx, 0)?;
        let label = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;
        check_same_rank(
            input.shape(),
            &label,
            InferErrorKind::InvalidArgument,
            ("input", "label"),
        )?;

        add_equal_per_axis(ctx, input.shape(), &label);
        ctx.set_shape_or_data(out, input)
    }
}

/// Value of the `axis` attribute of [`Cross`] which means "use the first
/// axis of size 3".
const CROSS_AXIS_UNSET: i64 = 9;

/// Cross product operator.
///
/// Both inputs must have the same shape. If an axis is given, its size must
/// be 3 in both inputs.
pub struct Cross;

impl InferSymbolicShape for Cross {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_value(op, ctx, 0)?;
        let y = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;
        let axis = op.attr_int_or("axis", CROSS_AXIS_UNSET)?;
        check_same_rank(x.shape(), &y, InferErrorKind::InvalidArgument, ("x", "y"))?;
        let axis = if axis != CROSS_AXIS_UNSET {
            Some(resolve_axis(y.len(), axis)?)
        } else {
            None
        };

        add_equal_per_axis(ctx, x.shape(), &y);
        if let Some(axis) = axis {
            ctx.add_equal_cstr(x.shape()[axis].clone(), DimExpr::Value(3));
            ctx.add_equal_cstr(y[axis].clone(), DimExpr::Value(3));
        }
        ctx.set_shape_or_data(out, x)
    }
}

/// HuberLoss operator.
///
/// Produces the loss and the residual, both with the shape of the label.
pub struct HuberLoss;

impl InferSymbolicShape for HuberLoss {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let input = operand_shape(op, ctx, 0)?;
        let label = operand_shape(op, ctx, 1)?;
        let [out, residual] = results(op)?;
        check_same_rank(
            &input,
            &label,
            InferErrorKind::InvalidArgument,
            ("input", "label"),
        )?;

        add_equal_per_axis(ctx, &input, &label);
        let shape = ShapeOrData::from_shape(label);
        ctx.set_all([(out, shape.clone()), (residual, shape)])
    }
}

/// Reduction applied to the per-element loss.
#[derive(Copy, Clone, Debug, PartialEq)]
enum Reduction {
    None,
    Mean,
    Sum,
    BatchMean,
}

impl Reduction {
    fn parse(name: &str) -> Result<Self, InferError> {
        match name {
            "none" => Ok(Self::None),
            "mean" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            "batchmean" => Ok(Self::BatchMean),
            _ => Err(InferError::invalid_argument(format!(
                "reduction should be one of \"none\", \"mean\", \"sum\" or \"batchmean\" but is \"{}\"",
                name
            ))),
        }
    }
}

/// KLDivLoss operator.
///
/// The output is a scalar unless the reduction is `"none"`, in which case it
/// has the shape of the input.
pub struct KldivLoss;

impl InferSymbolicShape for KldivLoss {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let x = operand_shape(op, ctx, 0)?;
        let label = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;
        let reduction = Reduction::parse(op.attr_str_or("reduction", "mean")?)?;
        check_same_rank(&x, &label, InferErrorKind::InvalidArgument, ("x", "label"))?;

        add_equal_per_axis(ctx, &x, &label);
        let shape = match reduction {
            Reduction::None => x,
            Reduction::Mean | Reduction::Sum | Reduction::BatchMean => Vec::new(),
        };
        ctx.set_shape_or_data(out, ShapeOrData::from_shape(shape))
    }
}

/// MarginCrossEntropy operator.
///
/// Labels hold one class index per row of `logits`. The first result is the
/// softmax with the shape of `logits`, the second is the loss with the class
/// axis reduced to 1.
pub struct MarginCrossEntropy;

impl InferSymbolicShape for MarginCrossEntropy {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let logits = operand_shape(op, ctx, 0)?;
        let label = operand_shape(op, ctx, 1)?;
        let [softmax, loss] = results(op)?;

        let Some(class_axis) = logits.len().checked_sub(1) else {
            return Err(InferError::invalid_argument("logits must have rank >= 1"));
        };
        if label.len() != logits.len() && label.len() != class_axis {
            return Err(InferError::invalid_argument(format!(
                "label should have rank {} or {} but has rank {}",
                logits.len(),
                class_axis,
                label.len()
            )));
        }

        add_equal_per_axis(ctx, &logits[..class_axis], &label);
        if label.len() > 1
            && let Some(label_classes) = label.get(class_axis)
        {
            ctx.add_equal_cstr(label_classes.clone(), DimExpr::Value(1));
        }

        let mut loss_shape = logits.clone();
        loss_shape[class_axis] = DimExpr::Value(1);
        ctx.set_all([
            (softmax, ShapeOrData::from_shape(logits)),
            (loss, ShapeOrData::from_shape(loss_shape)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use symshape_testing::TestCases;

    use super::{BceLoss, Cross, HuberLoss, KldivLoss, MarginCrossEntropy};
    use crate::error::InferErrorKind;
    use crate::ops::InferSymbolicShape;
    use crate::ops::test_util::RuleTest;
    use crate::shape_or_data::{ShapeOrData, sym_data, sym_shape};

    #[test]
    fn test_rank_mismatch() {
        #[derive(Debug)]
        struct Case {
            name: &'static str,
            num_results: u32,
        }

        let cases = [
            Case {
                name: "bce_loss",
                num_results: 1,
            },
            Case {
                name: "cross",
                num_results: 1,
            },
            Case {
                name: "huber_loss",
                num_results: 2,
            },
            Case {
                name: "kldiv_loss",
                num_results: 1,
            },
        ];

        cases.test_each(|case| {
            let rule: &dyn InferSymbolicShape = match case.name {
                "bce_loss" => &BceLoss,
                "cross" => &Cross,
                "huber_loss" => &HuberLoss,
                _ => &KldivLoss,
            };
            let mut test = RuleTest::with_operands(
                case.name,
                vec![sym_shape!("n", 3), sym_shape!("n", 3, 1)],
                case.num_results,
            );
            let err = test.run(rule).err().unwrap();
            assert_eq!(err.kind(), InferErrorKind::InvalidArgument);
            assert!(test.ctx.constraints().is_empty());
            assert!(!test.has_result(0));
        });
    }

    #[test]
    fn test_bce_loss() {
        let input = sym_data!("a", "b");
        let mut test = RuleTest::with_operands("bce_loss", vec![input.clone(), sym_shape!("k")], 1);
        test.run(&BceLoss).unwrap();
        assert_eq!(test.result(0), input);
        assert_eq!(test.num_equal(), 1);
    }

    #[test]
    fn test_cross() {
        // Without an axis, only the per-axis constraints are added.
        let mut test =
            RuleTest::with_operands("cross", vec![sym_shape!("n", 3), sym_shape!("m", 3)], 1);
        test.run(&Cross).unwrap();
        assert_eq!(test.result(0), sym_shape!("n", 3));
        assert_eq!(test.num_equal(), 2);

        let mut test = RuleTest::with_operands(
            "cross",
            vec![sym_shape!("a", "n"), sym_shape!("b", "m")],
            1,
        )
        .attr("axis", -1);
        test.run(&Cross).unwrap();
        let printed: Vec<_> = test.ctx.constraints().iter().map(|c| c.to_string()).collect();
        assert_eq!(printed, ["a == b", "n == m", "n == 3", "m == 3"]);

        let mut test =
            RuleTest::with_operands("cross", vec![sym_shape!("n", 3), sym_shape!("n", 3)], 1)
                .attr("axis", 2);
        let err = test.run(&Cross).err().unwrap();
        assert_eq!(err.kind(), InferErrorKind::InvalidArgument);
        assert!(test.ctx.constraints().is_empty());
    }

    #[test]
    fn test_huber_loss() {
        let mut test = RuleTest::with_operands(
            "huber_loss",
            vec![sym_shape!("batch", 1), sym_shape!("n", 1)],
            2,
        );
        test.run(&HuberLoss).unwrap();
        assert_eq!(test.result(0), sym_shape!("n", 1));
        assert_eq!(test.result(1), sym_shape!("n", 1));
        assert_eq!(test.num_equal(), 2);
    }

    #[test]
    fn test_kldiv_loss() {
        #[derive(Debug)]
        struct Case {
            reduction: &'static str,
            expected: Result<ShapeOrData, InferErrorKind>,
        }

        let cases = [
            Case {
                reduction: "none",
                expected: Ok(sym_shape!("batch", 10)),
            },
            Case {
                reduction: "mean",
                expected: Ok(sym_shape!()),
            },
            Case {
                reduction: "sum",
                expected: Ok(sym_shape!()),
            },
            Case {
                reduction: "batchmean",
                expected: Ok(sym_shape!()),
            },
            Case {
                reduction: "median",
                expected: Err(InferErrorKind::InvalidArgument),
            },
        ];

        cases.test_each(|case| {
            let mut test = RuleTest::with_operands(
                "kldiv_loss",
                vec![sym_shape!("batch", 10), sym_shape!("batch", 10)],
                1,
            )
            .attr("reduction", case.reduction);
            match (test.run(&KldivLoss), &case.expected) {
                (Ok(()), Ok(expected)) => {
                    assert_eq!(&test.result(0), expected);
                    assert_eq!(test.num_equal(), 2);
                }
                (Err(err), Err(kind)) => {
                    assert_eq!(err.kind(), *kind);
                    assert!(test.ctx.constraints().is_empty());
                }
                (actual, expected) => panic!("expected {:?} but got {:?}", expected, actual),
            }
        });
    }

    #[test]
    fn test_margin_cross_entropy() {
        let mut test = RuleTest::with_operands(
            "margin_cross_entropy",
            vec![sym_shape!("batch", "classes"), sym_shape!("n", "k")],
            2,
        );
        test.run(&MarginCrossEntropy).unwrap();
        assert_eq!(test.result(0), sym_shape!("batch", "classes"));
        assert_eq!(test.result(1), sym_shape!("batch", 1));
        let printed: Vec<_> = test.ctx.constraints().iter().map(|c| c.to_string()).collect();
        assert_eq!(printed, ["batch == n", "k == 1"]);

        // Label without the trailing unit axis.
        let mut test = RuleTest::with_operands(
            "margin_cross_entropy",
            vec![sym_shape!("batch", "classes"), sym_shape!("n")],
            2,
        );
        test.run(&MarginCrossEntropy).unwrap();
        assert_eq!(test.result(1), sym_shape!("batch", 1));
        assert_eq!(test.num_equal(), 1);

        let mut test = RuleTest::with_operands(
            "margin_cross_entropy",
            vec![sym_shape!("batch", "classes"), sym_data!(1, 2, 3)],
            2,
        );
        test.run(&MarginCrossEntropy).unwrap();

        let mut test = RuleTest::with_operands(
            "margin_cross_entropy",
            vec![sym_shape!("batch", "classes"), sym_shape!(1, 2, 3)],
            2,
        );
        let err = test.run(&MarginCrossEntropy).err().unwrap();
        assert_eq!(err.kind(), InferErrorKind::InvalidArgument);
    }
}
