//! Symbolic shape inference for tensor operation graphs.
//!
//! # About symbolic shape inference
//!
//! Graph compilers need to know the shapes of the tensors flowing through a
//! program before it runs, but many dimensions depend on inputs which are
//! only known at runtime, such as the batch size or sequence length of a
//! language model. Symbolic shape inference represents these dimensions as
//! integer expressions over named symbols, and propagates them through the
//! graph one operation at a time.
//!
//! As an example, multiplying a `["batch", "m", "k"]` matrix by a
//! `["batch", "k", "n"]` matrix yields a `["batch", "m", "n"]` result. It
//! also tells us that the two `"k"` dimensions must be equal at runtime.
//! Facts like this are recorded as [constraints](Constraint) which later
//! passes can use to simplify shape expressions.
//!
//! # Crate overview
//!
//! - [`DimExpr`] is a symbolic integer expression and [`ShapeOrData`] is the
//!   shape of a value, optionally with its contents when it holds a small
//!   integer vector (eg. the output of a `shape` operator).
//! - [`InferContext`] holds the inferred shapes of values, the constraints
//!   recorded so far and a generator for fresh symbols.
//! - The [`InferSymbolicShape`] trait is implemented by per-operator rules in
//!   [`ops`]. [`OpKind`] maps operator names to rules and
//!   [`infer_symbolic_shape`] is the entry point for a single operation.
//! - [`InferPass`] runs inference over a list of operations, optionally
//!   sharded across threads.
//!
//! Rules are configured through [`InferConfig`], which can be read from the
//! environment.

mod constraints;
mod env;
mod error;
mod infer_context;
mod operation;
pub mod ops;
mod pass;
mod registry;
mod shape_or_data;
mod sym_expr;
mod sym_gen;

pub use constraints::{Constraint, ConstraintSet};
pub use env::InferConfig;
pub use error::{InferError, InferErrorKind};
pub use infer_context::InferContext;
pub use operation::{Attribute, Operation, ValueId};
pub use ops::InferSymbolicShape;
pub use pass::{InferPass, Shard};
pub use registry::{OpKind, infer_symbolic_shape};
pub use shape_or_data::ShapeOrData;
pub use sym_expr::{DimExpr, Symbol};
pub use sym_gen::SymbolGen;
