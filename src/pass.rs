//! Drivers which run inference rules over a list of operations.

use log::{debug, warn};
use rayon::prelude::*;

use crate::error::InferError;
use crate::infer_context::InferContext;
use crate::operation::{Operation, ValueId};
use crate::registry::infer_symbolic_shape;
use crate::shape_or_data::ShapeOrData;

/// Independent subgraph which can be inferred in parallel with others.
#[derive(Clone, Debug, Default)]
pub struct Shard {
    /// Shapes of the values consumed by the shard which are not produced by
    /// any of its operations.
    pub inputs: Vec<(ValueId, ShapeOrData)>,

    /// Operations in topological order.
    pub ops: Vec<Operation>,
}

impl Shard {
    pub fn new(inputs: Vec<(ValueId, ShapeOrData)>, ops: Vec<Operation>) -> Self {
        Shard { inputs, ops }
    }
}

/// Runs symbolic shape inference over the operations of a graph.
///
/// The caller is responsible for ordering operations so that each operand is
/// inferred (or seeded) before it is used.
pub struct InferPass;

impl InferPass {
    /// Infer the results of each operation in `ops`, in order.
    ///
    /// Stops at the first failure. The returned error records the failing
    /// operation's position in `ops` and its name. Results of operations
    /// before the failure remain in `ctx`.
    pub fn run(ops: &[Operation], ctx: &mut InferContext) -> Result<(), InferError> {
        for (i, op) in ops.iter().enumerate() {
            debug!("inferring shapes for #{} {}", i, op.name());
            if let Err(err) = infer_symbolic_shape(op, ctx) {
                let err = err.with_op_name(op.name()).with_op_index(i);
                warn!("{}", err);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Infer the results of several independent subgraphs in parallel.
    ///
    /// Each run reserves a symbol prefix from `ctx` (eg. `S0_`), and each
    /// shard runs in a child context whose fresh symbols extend it with the
    /// shard index (eg. `S0_2_0`). Symbols minted by different shards, or by
    /// different runs on the same context, therefore never collide. A child
    /// sees the shard's inputs and any operand already recorded in `ctx`.
    ///
    /// If every shard succeeds, values and constraints are merged into `ctx`
    /// in shard order, so a value written by several shards takes the last
    /// shard's result. Otherwise `ctx` is left unchanged, apart from the
    /// reserved prefix, and the error from the lowest-numbered failing shard
    /// is returned, with the operation index relative to that shard.
    pub fn run_sharded(shards: &[Shard], ctx: &mut InferContext) -> Result<(), InferError> {
        let run_prefix = ctx.child_symbol_prefix();
        let parent: &InferContext = ctx;
        let results: Vec<Result<InferContext, InferError>> = shards
            .par_iter()
            .enumerate()
            .map(|(i, shard)| {
                let prefix = format!("{}{}_", run_prefix, i);
                let mut child = child_context(parent, prefix, shard)?;
                debug!("running shard {} with {} ops", i, shard.ops.len());
                Self::run(&shard.ops, &mut child)?;
                Ok(child)
            })
            .collect();

        let children = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        ctx.merge(children)
    }
}

/// Create the context for a shard, seeded with its inputs.
fn child_context(
    parent: &InferContext,
    prefix: String,
    shard: &Shard,
) -> Result<InferContext, InferError> {
    let mut child = InferContext::with_symbol_prefix(prefix, parent.config().clone());

    child.set_all(shard.inputs.iter().cloned())?;

    // Operands which come from outside the shard.
    for op in &shard.ops {
        for id in op.operands().iter().flatten() {
            if !child.contains(*id)
                && let Ok(data) = parent.shape_or_data(*id)
            {
                child.set_shape_or_data(*id, data.clone())?;
            }
        }
    }

    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::{InferPass, Shard};
    use crate::constraints::Constraint;
    use crate::error::InferErrorKind;
    use crate::infer_context::InferContext;
    use crate::operation::{Operation, ValueId};
    use crate::shape_or_data::{ShapeOrData, sym_shape};
    use crate::sym_expr::DimExpr;

    fn id(n: u32) -> ValueId {
        ValueId::from_u32(n)
    }

    fn binary(name: &str, lhs: u32, rhs: u32, out: u32) -> Operation {
        Operation::new(name)
            .with_operands([Some(id(lhs)), Some(id(rhs))])
            .with_results([id(out)])
    }

    #[test]
    fn test_run() {
        let mut ctx = InferContext::new();
        ctx.set_shape_or_data(id(1), sym_shape!("batch", "m", "k")).unwrap();
        ctx.set_shape_or_data(id(2), sym_shape!("batch", "k", "n")).unwrap();
        ctx.set_shape_or_data(id(3), sym_shape!("n")).unwrap();

        let ops = [
            binary("pd_op.matmul", 1, 2, 4),
            binary("pd_op.add", 4, 3, 5),
            Operation::new("pd_op.relu")
                .with_operands([Some(id(5))])
                .with_results([id(6)]),
        ];
        InferPass::run(&ops, &mut ctx).unwrap();

        assert_eq!(ctx.shape_or_data(id(6)).unwrap(), &sym_shape!("batch", "m", "n"));
        assert!(
            ctx.constraints()
                .contains(&Constraint::Equal(DimExpr::from("k"), DimExpr::from("k")))
        );
    }

    #[test]
    fn test_run_stops_at_first_failure() {
        let mut ctx = InferContext::new();
        ctx.set_shape_or_data(id(1), sym_shape!("m", "k")).unwrap();
        ctx.set_shape_or_data(id(2), sym_shape!("k")).unwrap();

        let ops = [
            binary("pd_op.mv", 1, 2, 3),
            // Operand 4 has no recorded shape.
            binary("pd_op.mv", 1, 4, 5),
            binary("pd_op.mv", 1, 2, 6),
        ];
        let err = InferPass::run(&ops, &mut ctx).err().unwrap();

        assert_eq!(err.kind(), InferErrorKind::InvalidArgument);
        assert_eq!(err.op_index(), Some(1));
        assert_eq!(err.op_name(), Some("pd_op.mv"));
        assert!(err.to_string().starts_with("operator \"pd_op.mv\" (#1) failed"));

        assert!(ctx.contains(id(3)));
        assert!(!ctx.contains(id(5)));
        assert!(!ctx.contains(id(6)));
    }

    #[test]
    fn test_run_sharded() {
        let mut ctx = InferContext::new();
        ctx.set_shape_or_data(id(1), sym_shape!("n", 4)).unwrap();

        let shards = [
            Shard::new(
                vec![(id(10), sym_shape!(10, "d"))],
                vec![
                    Operation::new("pd_op.masked_select")
                        .with_operands([Some(id(10)), Some(id(1))])
                        .with_results([id(11)]),
                ],
            ),
            Shard::new(
                vec![(id(20), ShapeOrData::from_data(vec![DimExpr::from(2)]))],
                vec![
                    Operation::new("pd_op.gather_nd")
                        .with_operands([Some(id(1)), Some(id(20))])
                        .with_results([id(21)]),
                    Operation::new("pd_op.masked_select")
                        .with_operands([Some(id(1)), Some(id(1))])
                        .with_results([id(22)]),
                ],
            ),
        ];
        InferPass::run_sharded(&shards, &mut ctx).unwrap();

        // Symbols minted by different shards do not collide.
        assert_eq!(ctx.shape_or_data(id(11)).unwrap(), &sym_shape!("S0_0_0"));
        assert_eq!(ctx.shape_or_data(id(22)).unwrap(), &sym_shape!("S0_1_0"));
        assert!(ctx.contains(id(10)));
        assert!(ctx.contains(id(21)));
        assert!(
            ctx.constraints()
                .contains(&Constraint::Broadcastable(DimExpr::from(10), DimExpr::from("n")))
        );
    }

    #[test]
    fn test_run_sharded_twice() {
        let mut ctx = InferContext::new();
        ctx.set_shape_or_data(id(1), sym_shape!("n")).unwrap();

        let masked_select = |out| {
            Shard::new(
                vec![],
                vec![
                    Operation::new("pd_op.masked_select")
                        .with_operands([Some(id(1)), Some(id(1))])
                        .with_results([id(out)]),
                ],
            )
        };
        InferPass::run_sharded(&[masked_select(10)], &mut ctx).unwrap();
        InferPass::run_sharded(&[masked_select(20)], &mut ctx).unwrap();
        let first = ctx.shape_or_data(id(10)).unwrap().shape()[0].clone();
        let second = ctx.shape_or_data(id(20)).unwrap().shape()[0].clone();
        assert_eq!(first, DimExpr::from("S0_0_0"));
        assert_eq!(second, DimExpr::from("S1_0_0"));

        // Symbols minted directly by the context are distinct as well.
        assert_eq!(ctx.next_sym_name(), DimExpr::from("S2"));
    }

    #[test]
    fn test_run_sharded_same_result() {
        let relu = |input, out| {
            Operation::new("pd_op.relu")
                .with_operands([Some(id(input))])
                .with_results([id(out)])
        };

        // Shards writing the same value are merged in shard order.
        let mut ctx = InferContext::new();
        let shards = [
            Shard::new(vec![(id(1), sym_shape!("n", 4))], vec![relu(1, 50)]),
            Shard::new(vec![(id(2), sym_shape!("m", 4))], vec![relu(2, 50)]),
        ];
        InferPass::run_sharded(&shards, &mut ctx).unwrap();
        assert_eq!(ctx.shape_or_data(id(50)).unwrap(), &sym_shape!("m", 4));

        // Results of different ranks conflict and nothing is merged.
        let mut ctx = InferContext::new();
        let shards = [
            Shard::new(vec![(id(1), sym_shape!("n", 4))], vec![relu(1, 50)]),
            Shard::new(vec![(id(2), sym_shape!("m"))], vec![relu(2, 50)]),
        ];
        let err = InferPass::run_sharded(&shards, &mut ctx).err().unwrap();
        assert_eq!(err.kind(), InferErrorKind::PreconditionNotMet);
        assert!(!ctx.contains(id(50)));
        assert!(!ctx.contains(id(1)));
    }

    #[test]
    fn test_run_sharded_failure_leaves_context_unchanged() {
        let mut ctx = InferContext::new();
        ctx.set_shape_or_data(id(1), sym_shape!("m", "k")).unwrap();

        let shards = [
            Shard::new(
                vec![(id(10), sym_shape!("k"))],
                vec![binary("pd_op.mv", 1, 10, 11)],
            ),
            Shard::new(
                vec![(id(20), sym_shape!("k", 2))],
                vec![binary("pd_op.mv", 1, 20, 21)],
            ),
            Shard::new(vec![], vec![binary("pd_op.mv", 1, 30, 31)]),
        ];
        let err = InferPass::run_sharded(&shards, &mut ctx).err().unwrap();

        assert_eq!(err.kind(), InferErrorKind::InvalidArgument);
        assert_eq!(err.op_index(), Some(0));
        assert!(!ctx.contains(id(11)));
        assert!(!ctx.contains(id(10)));
        assert!(ctx.constraints().is_empty());
    }
}
