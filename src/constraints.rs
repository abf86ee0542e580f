//! Constraints between symbolic dimensions.

use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHashSet;

use crate::sym_expr::DimExpr;

/// A fact about two expressions that must hold at runtime for the graph to be
/// well-formed.
///
/// Both kinds of constraint are symmetric: `Equal(a, b)` and `Equal(b, a)`
/// compare and hash as the same constraint.
#[derive(Clone, Debug)]
pub enum Constraint {
    /// The two expressions have the same value.
    Equal(DimExpr, DimExpr),
    /// The two expressions are equal, or one of them is 1.
    Broadcastable(DimExpr, DimExpr),
}

impl Constraint {
    /// Return the two expressions related by this constraint.
    pub fn operands(&self) -> (&DimExpr, &DimExpr) {
        match self {
            Self::Equal(a, b) | Self::Broadcastable(a, b) => (a, b),
        }
    }

    /// Return true if the constraint holds regardless of the values of any
    /// symbols, because both sides are the same expression.
    pub fn is_trivial(&self) -> bool {
        let (a, b) = self.operands();
        a == b
    }

    fn tag(&self) -> u8 {
        match self {
            Self::Equal(..) => 0,
            Self::Broadcastable(..) => 1,
        }
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Constraint) -> bool {
        let (a, b) = self.operands();
        let (c, d) = other.operands();
        self.tag() == other.tag() && ((a == c && b == d) || (a == d && b == c))
    }
}

impl Eq for Constraint {}

impl Hash for Constraint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let (a, b) = self.operands();
        let hash_one = |expr: &DimExpr| {
            let mut hasher = rustc_hash::FxHasher::default();
            expr.hash(&mut hasher);
            hasher.finish()
        };
        self.tag().hash(state);
        // Order-independent combination of the operand hashes.
        hash_one(a).wrapping_add(hash_one(b)).hash(state);
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal(a, b) => write!(f, "{} == {}", a, b),
            Self::Broadcastable(a, b) => write!(f, "broadcastable({}, {})", a, b),
        }
    }
}

/// Deduplicating set of constraints.
///
/// Iteration yields constraints in the order they were first added.
/// Constraints are never removed.
#[derive(Clone, Debug, Default)]
pub struct ConstraintSet {
    order: Vec<Constraint>,
    seen: FxHashSet<Constraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constraint to the set.
    ///
    /// Returns false if an equivalent constraint was already present.
    pub fn insert(&mut self, constraint: Constraint) -> bool {
        if self.seen.contains(&constraint) {
            return false;
        }
        self.seen.insert(constraint.clone());
        self.order.push(constraint);
        true
    }

    pub fn contains(&self, constraint: &Constraint) -> bool {
        self.seen.contains(constraint)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Constraint> {
        self.order.iter()
    }

    /// Iterate over `Equal` constraints.
    pub fn equalities(&self) -> impl Iterator<Item = (&DimExpr, &DimExpr)> {
        self.order.iter().filter_map(|c| match c {
            Constraint::Equal(a, b) => Some((a, b)),
            Constraint::Broadcastable(..) => None,
        })
    }

    /// Iterate over `Broadcastable` constraints.
    pub fn broadcastables(&self) -> impl Iterator<Item = (&DimExpr, &DimExpr)> {
        self.order.iter().filter_map(|c| match c {
            Constraint::Broadcastable(a, b) => Some((a, b)),
            Constraint::Equal(..) => None,
        })
    }

    /// Add all constraints from `other` which are not already present,
    /// preserving the order in which `other` recorded them.
    pub fn extend(&mut self, other: ConstraintSet) {
        for constraint in other.order {
            self.insert(constraint);
        }
    }
}

impl<'a> IntoIterator for &'a ConstraintSet {
    type Item = &'a Constraint;
    type IntoIter = std::slice::Iter<'a, Constraint>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.iter()
    }
}
