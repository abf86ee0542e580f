use std::borrow::Cow;

use log::trace;
use rustc_hash::FxHashMap;

use crate::constraints::{Constraint, ConstraintSet};
use crate::env::InferConfig;
use crate::error::InferError;
use crate::operation::ValueId;
use crate::shape_or_data::ShapeOrData;
use crate::sym_expr::DimExpr;
use crate::sym_gen::SymbolGen;

/// Mutable state of one shape inference pass.
///
/// The context maps IR values to their inferred [`ShapeOrData`], mints fresh
/// symbols for dimensions which are unknown until runtime and accumulates the
/// constraints recorded by inference rules.
///
/// A context is created by the caller at the start of a pass and passed by
/// exclusive reference to each rule. Contexts are never shared between
/// passes, so each pass gets its own symbol namespace.
#[derive(Clone, Debug, Default)]
pub struct InferContext {
    values: FxHashMap<ValueId, ShapeOrData>,
    sym_gen: SymbolGen,
    constraints: ConstraintSet,
    config: InferConfig,
}

impl InferContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: InferConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Create a context which mints symbols named `<prefix><n>`.
    pub fn with_symbol_prefix(prefix: impl Into<Cow<'static, str>>, config: InferConfig) -> Self {
        Self {
            sym_gen: SymbolGen::with_prefix(prefix.into()),
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &InferConfig {
        &self.config
    }

    /// Return the recorded shape and data of `value`.
    pub fn shape_or_data(&self, value: ValueId) -> Result<&ShapeOrData, InferError> {
        self.values.get(&value).ok_or_else(|| {
            InferError::invalid_argument(format!("no shape has been recorded for value {}", value))
        })
    }

    /// Return true if a shape has been recorded for `value`.
    pub fn contains(&self, value: ValueId) -> bool {
        self.values.contains_key(&value)
    }

    /// Check that recording `data` for `value` would not change the rank
    /// already recorded for it.
    pub fn check_rank(&self, value: ValueId, data: &ShapeOrData) -> Result<(), InferError> {
        let prev_rank = self.values.get(&value).and_then(|prev| prev.rank());
        match (prev_rank, data.rank()) {
            (Some(prev), Some(new)) if prev != new => Err(InferError::precondition_not_met(
                format!(
                    "value {} was recorded with rank {} but is now inferred with rank {}",
                    value, prev, new
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Record the shape and data of `value`, replacing any previous entry.
    ///
    /// Fails with `PreconditionNotMet` if `value` already has an entry of a
    /// different rank.
    pub fn set_shape_or_data(
        &mut self,
        value: ValueId,
        data: ShapeOrData,
    ) -> Result<(), InferError> {
        self.check_rank(value, &data)?;
        let data = if self.config.simplify_results {
            data.simplify()
        } else {
            data
        };
        self.values.insert(value, data);
        Ok(())
    }

    /// Record the shapes of several values.
    ///
    /// All entries are checked, against recorded values and against each
    /// other, before any are written, so on failure no value is updated. If
    /// a value appears more than once the last entry wins.
    pub fn set_all(
        &mut self,
        entries: impl IntoIterator<Item = (ValueId, ShapeOrData)>,
    ) -> Result<(), InferError> {
        let entries: Vec<_> = entries.into_iter().collect();
        let mut staged: FxHashMap<ValueId, usize> = FxHashMap::default();
        for (value, data) in &entries {
            self.check_rank(*value, data)?;
            if let Some(rank) = data.rank()
                && let Some(prev) = staged.insert(*value, rank)
                && prev != rank
            {
                return Err(InferError::precondition_not_met(format!(
                    "value {} is given with rank {} and rank {}",
                    value, prev, rank
                )));
            }
        }
        for (value, data) in entries {
            self.set_shape_or_data(value, data)?;
        }
        Ok(())
    }

    /// Record that `a` and `b` have the same runtime value.
    pub fn add_equal_cstr(&mut self, a: DimExpr, b: DimExpr) {
        self.add_constraint(Constraint::Equal(a, b));
    }

    /// Record that `a` and `b` are equal or one of them is 1.
    pub fn add_broadcastable_cstr(&mut self, a: DimExpr, b: DimExpr) {
        self.add_constraint(Constraint::Broadcastable(a, b));
    }

    fn add_constraint(&mut self, constraint: Constraint) {
        if self.constraints.insert(constraint.clone()) {
            trace!("constraint {}", constraint);
        }
    }

    /// Mint a fresh symbol for a dimension that is unknown until runtime.
    ///
    /// Each call returns a symbol which has not been returned before by this
    /// context.
    pub fn next_sym_name(&mut self) -> DimExpr {
        let sym = self.sym_gen.gen_positive();
        trace!("new symbol {}", sym);
        sym
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Iterate over all recorded values and their shapes, in no particular
    /// order.
    pub fn values(&self) -> impl Iterator<Item = (ValueId, &ShapeOrData)> {
        self.values.iter().map(|(id, data)| (*id, data))
    }

    /// Return a symbol prefix for a child context which is distinct from the
    /// prefixes returned by previous calls and from this context's symbols.
    pub(crate) fn child_symbol_prefix(&mut self) -> String {
        self.sym_gen.child_prefix()
    }

    /// Move the values and constraints recorded in `others` into this
    /// context, in order.
    ///
    /// Values are checked against ranks already recorded here and against
    /// each other. On failure this context is left unchanged.
    pub(crate) fn merge(
        &mut self,
        others: impl IntoIterator<Item = InferContext>,
    ) -> Result<(), InferError> {
        let mut values = Vec::new();
        let mut constraints = Vec::new();
        for other in others {
            values.extend(other.values);
            constraints.push(other.constraints);
        }
        self.set_all(values)?;
        for other in constraints {
            self.constraints.extend(other);
        }
        Ok(())
    }
}
