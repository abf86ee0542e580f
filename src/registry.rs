//! Mapping from operator names to inference rules.

use crate::error::InferError;
use crate::infer_context::InferContext;
use crate::operation::Operation;
use crate::ops::{
    Allclose, Atan2, BceLoss, Binary, BinaryKind, BoxClip, Conv, Cross, CtcAlign, Embedding,
    EqualAll, ExpandAs, FillDiagonalTensor, Gather, GatherNd, HuberLoss, IndexSelectStrided,
    InferSymbolicShape, KldivLoss, Kron, MarginCrossEntropy, MaskedSelect, Matmul, Mv,
    PassThrough, Reduce, ReduceAs, SegmentPool, ShapeOp, Swiglu, TakeAlongAxis, TdmChild,
    TopPSampling, Unary, Unimplemented, YoloBox,
};

/// Define the [`OpKind`] enum from a list of `Variant => "name": rule`
/// entries.
macro_rules! op_kinds {
    ($($variant:ident => $name:literal : $rule:expr,)*) => {
        /// Operators which have a symbolic shape inference rule.
        ///
        /// Some kinds are recognized but have no rule, in which case
        /// inference fails with
        /// [`InferErrorKind::Unimplemented`](crate::InferErrorKind::Unimplemented).
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub enum OpKind {
            $($variant),*
        }

        impl OpKind {
            /// All operator kinds, in declaration order.
            pub const ALL: &'static [OpKind] = &[$(OpKind::$variant),*];

            /// Return the operator name, without a dialect prefix.
            pub fn name(self) -> &'static str {
                match self {
                    $(OpKind::$variant => $name,)*
                }
            }

            /// Return the rule that infers this operator's result shapes.
            pub fn rule(self) -> &'static dyn InferSymbolicShape {
                match self {
                    $(OpKind::$variant => &$rule,)*
                }
            }

            fn from_base_name(name: &str) -> Option<OpKind> {
                match name {
                    $($name => Some(OpKind::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

op_kinds! {
    // Rank-matched binary operators
    Allclose => "allclose": Allclose,
    Atan2 => "atan2": Atan2,
    Binomial => "binomial": Atan2,
    BceLoss => "bce_loss": BceLoss,
    BoxClip => "box_clip": BoxClip,
    Cross => "cross": Cross,
    EqualAll => "equal_all": EqualAll,
    HuberLoss => "huber_loss": HuberLoss,
    KldivLoss => "kldiv_loss": KldivLoss,
    MarginCrossEntropy => "margin_cross_entropy": MarginCrossEntropy,
    Swiglu => "swiglu": Swiglu,

    // Operators whose result is their second operand
    AccuracyCheck => "accuracy_check": PassThrough { operand: 1 },
    IndexSample => "index_sample": PassThrough { operand: 1 },
    IsClose => "isclose": PassThrough { operand: 1 },
    SearchSorted => "searchsorted": PassThrough { operand: 1 },

    FillDiagonalTensor => "fill_diagonal_tensor": FillDiagonalTensor,

    // Broadcasting binary operators
    Add => "add": Binary(BinaryKind::Add),
    Subtract => "subtract": Binary(BinaryKind::Subtract),
    Multiply => "multiply": Binary(BinaryKind::Multiply),
    Divide => "divide": Binary(BinaryKind::Divide),
    Maximum => "maximum": Binary(BinaryKind::Maximum),
    Minimum => "minimum": Binary(BinaryKind::Minimum),

    // Unary operators
    Abs => "abs": Unary { keep_data: false },
    Exp => "exp": Unary { keep_data: false },
    Relu => "relu": Unary { keep_data: false },
    Scale => "scale": Unary { keep_data: false },
    Sigmoid => "sigmoid": Unary { keep_data: false },
    Sqrt => "sqrt": Unary { keep_data: false },
    Tanh => "tanh": Unary { keep_data: false },
    Assign => "assign": Unary { keep_data: true },
    Cast => "cast": Unary { keep_data: true },

    Shape => "shape": ShapeOp,

    // Linear algebra
    Embedding => "embedding": Embedding,
    Kron => "kron": Kron,
    Matmul => "matmul": Matmul,
    Mv => "mv": Mv,

    Conv2d => "conv2d": Conv,
    Conv3d => "conv3d": Conv,

    // Indexing
    Gather => "gather": Gather,
    GatherNd => "gather_nd": GatherNd,
    IndexSelectStrided => "index_select_strided": IndexSelectStrided,
    MaskedSelect => "masked_select": MaskedSelect,
    TakeAlongAxis => "take_along_axis": TakeAlongAxis,
    TopPSampling => "top_p_sampling": TopPSampling,

    // Reductions
    Max => "max": Reduce,
    Mean => "mean": Reduce,
    Min => "min": Reduce,
    Prod => "prod": Reduce,
    Sum => "sum": Reduce,
    ReduceAs => "reduce_as": ReduceAs,

    CtcAlign => "ctc_align": CtcAlign,
    ExpandAs => "expand_as": ExpandAs,
    SegmentPool => "segment_pool": SegmentPool,
    TdmChild => "tdm_child": TdmChild,
    YoloBox => "yolo_box": YoloBox,

    // Operators without a rule
    Bincount => "bincount": Unimplemented,
    Bmm => "bmm": Unimplemented,
    CholeskySolve => "cholesky_solve": Unimplemented,
    Dot => "dot": Unimplemented,
    FusedSoftmaxMask => "fused_softmax_mask": Unimplemented,
    GridSample => "grid_sample": Unimplemented,
    Histogram => "histogram": Unimplemented,
    Lstsq => "lstsq": Unimplemented,
    MatrixRankTol => "matrix_rank_tol": Unimplemented,
    PullBoxSparse => "pull_box_sparse": Unimplemented,
    PullGpupsSparse => "pull_gpups_sparse": Unimplemented,
    PullSparseV2 => "pull_sparse_v2": Unimplemented,
    SequenceMask => "sequence_mask": Unimplemented,
    SparseWeightEmbedding => "sparse_weight_embedding": Unimplemented,
    Unpool => "unpool": Unimplemented,
}

impl OpKind {
    /// Look up an operator by name.
    ///
    /// The name may have a dialect prefix (eg. `"pd_op.matmul"`) and a
    /// trailing underscore marking an in-place variant (eg. `"bce_loss_"`).
    pub fn from_name(name: &str) -> Option<OpKind> {
        let base_name = match name.rsplit_once('.') {
            Some((_dialect, base_name)) => base_name,
            None => name,
        };
        Self::from_base_name(base_name)
            .or_else(|| base_name.strip_suffix('_').and_then(Self::from_base_name))
    }
}

/// Infer the result shapes of `op` and record them in `ctx`.
///
/// This is the single entry point for running inference on an operation.
/// Errors are annotated with the operation's name. Unknown operators fail
/// with [`InferErrorKind::Unimplemented`](crate::InferErrorKind::Unimplemented).
pub fn infer_symbolic_shape(op: &Operation, ctx: &mut InferContext) -> Result<(), InferError> {
    let Some(kind) = OpKind::from_name(op.name()) else {
        return Err(InferError::unimplemented(op.name()));
    };
    kind.rule()
        .infer_symbolic_shape(op, ctx)
        .map_err(|err| err.with_op_name(op.name()))
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashMap;
    use symshape_testing::TestCases;

    use super::{OpKind, infer_symbolic_shape};
    use crate::constraints::Constraint;
    use crate::error::InferErrorKind;
    use crate::infer_context::InferContext;
    use crate::operation::{Operation, ValueId};
    use crate::shape_or_data::{ShapeOrData, sym_shape};

    #[test]
    fn test_from_name() {
        #[derive(Debug)]
        struct Case {
            name: &'static str,
            expected: Option<OpKind>,
        }

        let cases = [
            Case {
                name: "matmul",
                expected: Some(OpKind::Matmul),
            },
            Case {
                name: "pd_op.matmul",
                expected: Some(OpKind::Matmul),
            },
            Case {
                name: "pd_op.bce_loss_",
                expected: Some(OpKind::BceLoss),
            },
            Case {
                name: "binomial_",
                expected: Some(OpKind::Binomial),
            },
            Case {
                name: "cinn_op.conv3d",
                expected: Some(OpKind::Conv3d),
            },
            Case {
                name: "not_an_op",
                expected: None,
            },
            Case {
                name: "",
                expected: None,
            },
        ];

        cases.test_each(|case| {
            assert_eq!(OpKind::from_name(case.name), case.expected);
        })
    }

    #[test]
    fn test_names_round_trip() {
        for &kind in OpKind::ALL {
            assert_eq!(OpKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_unimplemented_ops() {
        let stubs = [
            OpKind::Bincount,
            OpKind::Bmm,
            OpKind::SparseWeightEmbedding,
            OpKind::Unpool,
        ];
        for kind in stubs {
            let op = Operation::new(kind.name());
            let mut ctx = InferContext::new();
            let err = kind.rule().infer_symbolic_shape(&op, &mut ctx).err().unwrap();
            assert_eq!(err.kind(), InferErrorKind::Unimplemented);
        }

        let op = Operation::new("pd_op.lstsq").with_results([ValueId::from_u32(1)]);
        let mut ctx = InferContext::new();
        let err = infer_symbolic_shape(&op, &mut ctx).err().unwrap();
        assert_eq!(err.kind(), InferErrorKind::Unimplemented);
        assert_eq!(err.op_name(), Some("pd_op.lstsq"));
        assert!(!ctx.contains(ValueId::from_u32(1)));

        let op = Operation::new("pd_op.frobnicate");
        let err = infer_symbolic_shape(&op, &mut ctx).err().unwrap();
        assert_eq!(err.kind(), InferErrorKind::Unimplemented);
        assert_eq!(err.op_name(), Some("pd_op.frobnicate"));
    }

    #[test]
    fn test_errors_are_annotated() {
        let mut ctx = InferContext::new();
        ctx.set_shape_or_data(ValueId::from_u32(1), sym_shape!("m")).unwrap();
        ctx.set_shape_or_data(ValueId::from_u32(2), sym_shape!("k")).unwrap();
        let op = Operation::new("pd_op.mv")
            .with_operands([Some(ValueId::from_u32(1)), Some(ValueId::from_u32(2))])
            .with_results([ValueId::from_u32(3)]);

        let err = infer_symbolic_shape(&op, &mut ctx).err().unwrap();
        assert_eq!(err.kind(), InferErrorKind::InvalidArgument);
        assert_eq!(err.op_name(), Some("pd_op.mv"));
    }

    #[test]
    fn test_idempotence() {
        #[derive(Debug)]
        struct Case {
            name: &'static str,
            operands: Vec<ShapeOrData>,
            num_results: u32,
        }

        let cases = [
            Case {
                name: "pd_op.matmul",
                operands: vec![sym_shape!("batch", "m", "k"), sym_shape!("batch", "k", "n")],
                num_results: 1,
            },
            Case {
                name: "pd_op.add",
                operands: vec![sym_shape!("batch", 1, 16), sym_shape!("seq", 16)],
                num_results: 1,
            },
            Case {
                name: "pd_op.conv2d",
                operands: vec![sym_shape!("n", 3, "h", "w"), sym_shape!(8, 3, 3, 3)],
                num_results: 1,
            },
            Case {
                name: "pd_op.huber_loss",
                operands: vec![sym_shape!("n", 1), sym_shape!("n", 1)],
                num_results: 2,
            },
            Case {
                name: "pd_op.gather",
                operands: vec![sym_shape!(10, 20), sym_shape!("k")],
                num_results: 1,
            },
        ];

        cases.test_each(|case| {
            let mut ctx = InferContext::new();
            let mut operands = Vec::new();
            for (i, value) in case.operands.iter().enumerate() {
                let id = ValueId::from_u32(i as u32 + 1);
                ctx.set_shape_or_data(id, value.clone()).unwrap();
                operands.push(Some(id));
            }
            let results: Vec<_> = (0..case.num_results)
                .map(|i| ValueId::from_u32(100 + i))
                .collect();
            let op = Operation::new(case.name)
                .with_operands(operands)
                .with_results(results.clone())
                .with_attr("axis", 0);

            let snapshot = |ctx: &InferContext| {
                let values: FxHashMap<ValueId, ShapeOrData> = ctx
                    .values()
                    .map(|(id, value)| (id, value.clone()))
                    .collect();
                let constraints: Vec<Constraint> = ctx.constraints().iter().cloned().collect();
                (values, constraints)
            };

            infer_symbolic_shape(&op, &mut ctx).unwrap();
            let (first_values, first_constraints) = snapshot(&ctx);
            assert!(results.iter().all(|&id| first_values.contains_key(&id)));

            infer_symbolic_shape(&op, &mut ctx).unwrap();
            let (second_values, second_constraints) = snapshot(&ctx);
            assert_eq!(first_values, second_values);
            assert_eq!(first_constraints, second_constraints);
        })
    }
}
