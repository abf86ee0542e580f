//! Symbolic expressions representing tensor dimensions and element values.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};
use std::sync::Arc;

use rustc_hash::FxHasher;

/// A named variable.
///
/// The variable may carry assumptions about its value, such as being >= 0.
///
/// Two symbols are equal if they have the same name.
#[derive(Clone)]
pub struct Symbol {
    pub name: String,

    // True if this value is assumed to be >= 0.
    pub positive: bool,
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Symbol) -> bool {
        self.name == other.name
    }
}

impl Eq for Symbol {}

/// Symbolic expression representing an integer value.
///
/// Expressions can be known integer values, named symbols or composite
/// expressions. Expressions built from constants only are folded as they are
/// constructed, so `DimExpr::from(3) * DimExpr::from(4)` is `Value(12)`.
/// Expressions involving symbols are kept as written until
/// [`simplify`](DimExpr::simplify) is called.
#[derive(Clone)]
pub enum DimExpr {
    /// Element with a known integer value.
    Value(i64),
    /// Symbolic value
    Var(Arc<Symbol>),
    /// Addition of two symbolic values
    Add(Arc<DimExpr>, Arc<DimExpr>),
    /// Subtraction of two symbolic values
    Sub(Arc<DimExpr>, Arc<DimExpr>),
    /// Multiplication of two symbolic values
    Mul(Arc<DimExpr>, Arc<DimExpr>),
    /// Flooring division of first expression by second.
    Div(Arc<DimExpr>, Arc<DimExpr>),
    /// Maximum of two symbolic values
    Max(Arc<DimExpr>, Arc<DimExpr>),
    /// Minimum of two symbolic values
    Min(Arc<DimExpr>, Arc<DimExpr>),
    /// Broadcast two symbolic values.
    ///
    /// This behaves like `Max`, except it implies that both expressions are
    /// positive and either equal or 1.
    Broadcast(Arc<DimExpr>, Arc<DimExpr>),
    /// Negation of a value
    Neg(Arc<DimExpr>),
}

impl DimExpr {
    /// Return the inclusive range of values this expression may have.
    ///
    /// The range is conservative. Bounds which cannot be determined, or
    /// which overflow, saturate to `i64::MIN` or `i64::MAX`.
    pub fn range(&self) -> (i64, i64) {
        const ANY: (i64, i64) = (i64::MIN, i64::MAX);

        match self {
            Self::Value(x) => (*x, *x),
            Self::Var(sym) if sym.positive => (0, i64::MAX),
            Self::Var(_) => ANY,
            Self::Neg(x) => {
                let (lo, hi) = x.range();
                (hi.saturating_neg(), lo.saturating_neg())
            }
            Self::Add(lhs, rhs) => {
                let (a, b) = (lhs.range(), rhs.range());
                (a.0.saturating_add(b.0), a.1.saturating_add(b.1))
            }
            Self::Sub(lhs, rhs) => {
                let (a, b) = (lhs.range(), rhs.range());
                (a.0.saturating_sub(b.1), a.1.saturating_sub(b.0))
            }
            Self::Mul(lhs, rhs) => match (lhs.range(), rhs.range()) {
                (a, b) if a.0 >= 0 && b.0 >= 0 => {
                    (a.0.saturating_mul(b.0), a.1.saturating_mul(b.1))
                }
                _ => ANY,
            },
            Self::Div(lhs, rhs) => match (lhs.range(), rhs.range()) {
                (a, b) if a.0 >= 0 && b.0 > 0 => (a.0 / b.1, a.1 / b.0),
                (a, b) if a.0 >= 0 && b.0 >= 0 => (0, a.1),
                _ => ANY,
            },
            Self::Max(lhs, rhs) => {
                let (a, b) = (lhs.range(), rhs.range());
                (a.0.max(b.0), a.1.max(b.1))
            }
            Self::Min(lhs, rhs) => {
                let (a, b) = (lhs.range(), rhs.range());
                (a.0.min(b.0), a.1.min(b.1))
            }
            Self::Broadcast(lhs, rhs) => {
                let (a, b) = (lhs.range(), rhs.range());
                (a.0.max(b.0).max(0), a.1.max(b.1).max(0))
            }
        }
    }

    /// Return true if the value of this expression is known to be >= 0.
    pub fn is_positive(&self) -> bool {
        self.range().0 >= 0
    }

    /// Return the known value of this expression, if it is a constant.
    pub fn as_value(&self) -> Option<i64> {
        match self {
            Self::Value(x) => Some(*x),
            _ => None,
        }
    }

    /// Return the maximum of `self` and `other`.
    pub fn max(&self, other: &DimExpr) -> DimExpr {
        match (self, other) {
            (Self::Value(x), Self::Value(y)) => Self::Value(*x.max(y)),
            _ => Self::Max(self.clone().into(), other.clone().into()),
        }
    }

    /// Return the minimum of `self` and `other`.
    pub fn min(&self, other: &DimExpr) -> DimExpr {
        match (self, other) {
            (Self::Value(x), Self::Value(y)) => Self::Value(*x.min(y)),
            _ => Self::Min(self.clone().into(), other.clone().into()),
        }
    }

    /// Return the result of broadcasting `self` and `other`.
    ///
    /// If either side is the constant 1, the other side is returned
    /// unchanged. Two equal expressions produce that expression. Anything
    /// else produces a `Broadcast` node, whose validity must be recorded
    /// separately as a broadcastable constraint.
    pub fn broadcast(&self, other: &DimExpr) -> DimExpr {
        match (self, other) {
            (Self::Value(1), rhs) => rhs.clone(),
            (lhs, Self::Value(1)) => lhs.clone(),
            (lhs, rhs) if lhs == rhs => lhs.clone(),
            _ => Self::Broadcast(self.clone().into(), other.clone().into()),
        }
    }

    fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Return true if this expression can be used as a divisor when merging
    /// nested floor divisions.
    fn is_positive_divisor(&self) -> bool {
        match self {
            Self::Value(x) => *x > 0,
            _ => self.is_positive(),
        }
    }

    /// Simplify an expression.
    ///
    /// Sums are collected into a constant plus a list of terms with integer
    /// coefficients, so that like terms combine and opposite terms cancel
    /// (eg. `x + y - x` becomes `y`). Products fold their constant factors,
    /// divisions cancel factors common to both sides and chains of `max`,
    /// `min` or `broadcast` drop repeated operands.
    pub fn simplify(&self) -> DimExpr {
        match self {
            Self::Value(_) | Self::Var(_) => self.clone(),
            Self::Add(..) | Self::Sub(..) | Self::Neg(_) => {
                let mut sum = LinearSum::default();
                match sum.collect(self, 1) {
                    Some(()) => sum.into_expr(),
                    None => self.clone(),
                }
            }
            Self::Mul(..) => {
                let mut product = Product::default();
                match product.collect(self) {
                    Some(()) => product.into_expr(),
                    None => self.clone(),
                }
            }
            Self::Div(lhs, rhs) => simplify_div(lhs.simplify(), rhs.simplify()),
            Self::Max(..) | Self::Min(..) | Self::Broadcast(..) => self.simplify_chain(),
        }
    }

    /// Simplify a chain of `max`, `min` or `broadcast` operations.
    fn simplify_chain(&self) -> DimExpr {
        let kind = std::mem::discriminant(self);
        let mut terms = Vec::new();
        self.flatten_chain(kind, &mut terms);
        terms.sort_by_key(|term| !term.is_value());

        let combine: fn(&DimExpr, &DimExpr) -> DimExpr = match self {
            Self::Max(..) => DimExpr::max,
            Self::Min(..) => DimExpr::min,
            _ => {
                // A constant other than 1 can only broadcast against itself
                // or 1, so it determines the result.
                terms.retain(|term| term.as_value() != Some(1));
                if let Some(size) = terms.first().filter(|term| term.is_value()) {
                    return size.clone();
                }
                DimExpr::broadcast
            }
        };
        terms
            .into_iter()
            .reduce(|acc, term| combine(&acc, &term))
            .unwrap_or(DimExpr::Value(1))
    }

    fn flatten_chain(&self, kind: std::mem::Discriminant<DimExpr>, terms: &mut Vec<DimExpr>) {
        match self {
            Self::Max(lhs, rhs) | Self::Min(lhs, rhs) | Self::Broadcast(lhs, rhs)
                if std::mem::discriminant(self) == kind =>
            {
                lhs.flatten_chain(kind, terms);
                rhs.flatten_chain(kind, terms);
            }
            _ => {
                let term = self.simplify();
                if !terms.contains(&term) {
                    terms.push(term);
                }
            }
        }
    }

    /// Binding strength of the outermost operator, used to decide where
    /// parentheses are needed when formatting.
    fn binding_power(&self) -> u8 {
        match self {
            Self::Add(..) | Self::Sub(..) => 1,
            Self::Mul(..) | Self::Div(..) => 2,
            Self::Neg(_) => 3,
            Self::Value(_) | Self::Var(_) | Self::Max(..) | Self::Min(..) | Self::Broadcast(..) => {
                4
            }
        }
    }

    /// Write the expression. In debug mode symbols are quoted and tagged with
    /// `u` if assumed positive, or `i` otherwise.
    fn write_expr(&self, f: &mut fmt::Formatter<'_>, debug: bool) -> fmt::Result {
        // Right operands of non-commutative operators need parentheses around
        // operators of the same strength, eg. `a - (b + c)`.
        let operand = |f: &mut fmt::Formatter<'_>, expr: &DimExpr, right: bool| {
            let outer = self.binding_power();
            let inner = expr.binding_power();
            let parens = inner < outer
                || (right && inner == outer && matches!(self, Self::Sub(..) | Self::Div(..)));
            if parens {
                f.write_str("(")?;
                expr.write_expr(f, debug)?;
                f.write_str(")")
            } else {
                expr.write_expr(f, debug)
            }
        };

        let (op, lhs, rhs) = match self {
            Self::Value(val) => return write!(f, "{}", val),
            Self::Var(sym) if debug => {
                let tag = if sym.positive { 'u' } else { 'i' };
                return write!(f, "{:?}{}", sym.name, tag);
            }
            Self::Var(sym) => return f.write_str(&sym.name),
            Self::Neg(expr) => {
                f.write_str("-")?;
                return operand(f, expr, false);
            }
            Self::Max(lhs, rhs) | Self::Min(lhs, rhs) | Self::Broadcast(lhs, rhs) => {
                let name = match self {
                    Self::Max(..) => "max",
                    Self::Min(..) => "min",
                    _ => "broadcast",
                };
                write!(f, "{}(", name)?;
                lhs.write_expr(f, debug)?;
                f.write_str(", ")?;
                rhs.write_expr(f, debug)?;
                return f.write_str(")");
            }
            Self::Add(lhs, rhs) => ('+', lhs, rhs),
            Self::Sub(lhs, rhs) => ('-', lhs, rhs),
            Self::Mul(lhs, rhs) => ('*', lhs, rhs),
            Self::Div(lhs, rhs) => ('/', lhs, rhs),
        };
        operand(f, lhs, false)?;
        write!(f, " {} ", op)?;
        operand(f, rhs, true)
    }

    /// Create a named symbol, with no assumptions about the value.
    pub fn var(name: &str) -> Self {
        DimExpr::Var(
            Symbol {
                name: name.to_string(),
                positive: false,
            }
            .into(),
        )
    }

    /// Create a named symbol representing a positive value (ie. `>= 0`).
    pub fn pos_var(name: &str) -> Self {
        DimExpr::Var(
            Symbol {
                name: name.to_string(),
                positive: true,
            }
            .into(),
        )
    }

    /// Compute a hash which is consistent with `PartialEq`, ie. operands of
    /// commutative operators are hashed without regard to their order.
    fn structural_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        let commutative = |tag: u8, lhs: &DimExpr, rhs: &DimExpr, hasher: &mut FxHasher| {
            tag.hash(hasher);
            lhs.structural_hash()
                .wrapping_add(rhs.structural_hash())
                .hash(hasher);
        };
        let ordered = |tag: u8, lhs: &DimExpr, rhs: &DimExpr, hasher: &mut FxHasher| {
            tag.hash(hasher);
            lhs.structural_hash().hash(hasher);
            rhs.structural_hash().hash(hasher);
        };
        match self {
            Self::Value(x) => {
                0u8.hash(&mut hasher);
                x.hash(&mut hasher);
            }
            Self::Var(sym) => {
                1u8.hash(&mut hasher);
                sym.name.hash(&mut hasher);
            }
            Self::Add(a, b) => commutative(2, a, b, &mut hasher),
            Self::Sub(a, b) => ordered(3, a, b, &mut hasher),
            Self::Mul(a, b) => commutative(4, a, b, &mut hasher),
            Self::Div(a, b) => ordered(5, a, b, &mut hasher),
            Self::Max(a, b) => commutative(6, a, b, &mut hasher),
            Self::Min(a, b) => commutative(7, a, b, &mut hasher),
            Self::Broadcast(a, b) => commutative(8, a, b, &mut hasher),
            Self::Neg(x) => {
                9u8.hash(&mut hasher);
                x.structural_hash().hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

/// A sum written as `constant + coeff_0 * term_0 + coeff_1 * term_1 ...`.
#[derive(Default)]
struct LinearSum {
    constant: i64,
    terms: Vec<(DimExpr, i64)>,
}

impl LinearSum {
    /// Add `sign * expr` to the sum.
    ///
    /// Returns `None` if a coefficient overflows.
    fn collect(&mut self, expr: &DimExpr, sign: i64) -> Option<()> {
        match expr {
            DimExpr::Add(lhs, rhs) => {
                self.collect(lhs, sign)?;
                self.collect(rhs, sign)
            }
            DimExpr::Sub(lhs, rhs) => {
                self.collect(lhs, sign)?;
                self.collect(rhs, sign.checked_neg()?)
            }
            DimExpr::Neg(expr) => self.collect(expr, sign.checked_neg()?),
            _ => {
                let (coeff, term) = split_coefficient(expr.simplify());
                let coeff = coeff.checked_mul(sign)?;
                match term {
                    None => self.constant = self.constant.checked_add(coeff)?,
                    Some(term) => match self.terms.iter_mut().find(|(t, _)| *t == term) {
                        Some((_, total)) => *total = total.checked_add(coeff)?,
                        None => self.terms.push((term, coeff)),
                    },
                }
                Some(())
            }
        }
    }

    fn into_expr(self) -> DimExpr {
        let mut sum: Option<DimExpr> = None;
        for (term, coeff) in self.terms.into_iter().filter(|(_, coeff)| *coeff != 0) {
            sum = Some(match (sum, coeff.checked_neg()) {
                (Some(sum), Some(neg)) if coeff < 0 => sum - scale(term, neg),
                (Some(sum), _) => sum + scale(term, coeff),
                (None, _) => scale(term, coeff),
            });
        }
        match (sum, self.constant) {
            (None, constant) => DimExpr::Value(constant),
            (Some(sum), 0) => sum,
            (Some(sum), constant) if constant < 0 && constant != i64::MIN => {
                sum - DimExpr::Value(-constant)
            }
            (Some(sum), constant) => sum + DimExpr::Value(constant),
        }
    }
}

/// A product written as `coeff * factor_0 * factor_1 ...`.
struct Product {
    coeff: i64,
    factors: Vec<DimExpr>,
}

impl Default for Product {
    fn default() -> Self {
        Product {
            coeff: 1,
            factors: Vec::new(),
        }
    }
}

impl Product {
    /// Multiply the product by `expr`.
    ///
    /// Returns `None` if the coefficient overflows.
    fn collect(&mut self, expr: &DimExpr) -> Option<()> {
        match expr {
            DimExpr::Mul(lhs, rhs) => {
                self.collect(lhs)?;
                self.collect(rhs)
            }
            DimExpr::Neg(expr) => {
                self.coeff = self.coeff.checked_neg()?;
                self.collect(expr)
            }
            _ => match expr.simplify() {
                DimExpr::Value(x) => {
                    self.coeff = self.coeff.checked_mul(x)?;
                    Some(())
                }
                factor @ (DimExpr::Mul(..) | DimExpr::Neg(_)) => self.collect(&factor),
                factor => {
                    self.factors.push(factor);
                    Some(())
                }
            },
        }
    }

    fn into_expr(self) -> DimExpr {
        if self.coeff == 0 {
            return DimExpr::Value(0);
        }
        match self.factors.into_iter().reduce(|prod, x| prod * x) {
            Some(prod) => scale(prod, self.coeff),
            None => DimExpr::Value(self.coeff),
        }
    }
}

/// Return `coeff * term`, omitting a coefficient of 1 or -1.
fn scale(term: DimExpr, coeff: i64) -> DimExpr {
    match coeff {
        1 => term,
        -1 => -term,
        _ => DimExpr::Value(coeff) * term,
    }
}

/// Split a simplified expression into a constant coefficient and the
/// remaining symbolic term, if any.
fn split_coefficient(expr: DimExpr) -> (i64, Option<DimExpr>) {
    match expr {
        DimExpr::Value(x) => (x, None),
        DimExpr::Mul(lhs, rhs) => match lhs.as_value() {
            Some(x) => (x, Some(Arc::unwrap_or_clone(rhs))),
            None => (1, Some(DimExpr::Mul(lhs, rhs))),
        },
        DimExpr::Neg(inner) => {
            let (coeff, term) = split_coefficient((*inner).clone());
            match coeff.checked_neg() {
                Some(neg) => (neg, term),
                None => (1, Some(DimExpr::Neg(inner))),
            }
        }
        expr => (1, Some(expr)),
    }
}

/// Simplify `lhs / rhs`, where both sides are already simplified.
fn simplify_div(lhs: DimExpr, rhs: DimExpr) -> DimExpr {
    // `floor(floor(x / a) / b) == floor(x / (a * b))` requires `b > 0`.
    if let DimExpr::Div(x, a) = &lhs
        && rhs.is_positive_divisor()
    {
        let divisor = ((**a).clone() * rhs).simplify();
        return simplify_div((**x).clone(), divisor);
    }

    let (lhs, rhs) = cancel_common_factors(lhs, rhs);
    match rhs {
        DimExpr::Value(1) => lhs,
        rhs => lhs / rhs,
    }
}

/// Remove factors which appear on both sides of a division.
///
/// `(c * x) / (d * x)` has the same value as `c / d` for any non-zero `x`.
/// Constant coefficients are divided by their greatest common divisor.
fn cancel_common_factors(lhs: DimExpr, rhs: DimExpr) -> (DimExpr, DimExpr) {
    let mut num = Product::default();
    let mut denom = Product::default();
    if num.collect(&lhs).is_none() || denom.collect(&rhs).is_none() || denom.coeff == 0 {
        return (lhs, rhs);
    }

    num.factors.retain(|factor| {
        match denom.factors.iter().position(|f| f == factor) {
            Some(pos) => {
                denom.factors.remove(pos);
                false
            }
            None => true,
        }
    });

    let divisor = gcd(num.coeff.unsigned_abs(), denom.coeff.unsigned_abs());
    if let Ok(divisor) = i64::try_from(divisor)
        && divisor > 1
    {
        num.coeff /= divisor;
        denom.coeff /= divisor;
    }
    (num.into_expr(), denom.into_expr())
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl PartialEq<DimExpr> for DimExpr {
    fn eq(&self, other: &DimExpr) -> bool {
        let commutative_eq = |self_lhs, self_rhs, other_lhs, other_rhs| {
            (self_lhs == other_lhs && self_rhs == other_rhs)
                || (self_lhs == other_rhs && self_rhs == other_lhs)
        };

        match (self, other) {
            (Self::Value(x), Self::Value(y)) => x == y,
            (Self::Var(x), Self::Var(y)) => x.name == y.name,
            (Self::Neg(x), Self::Neg(y)) => x == y,
            (Self::Add(a, b), Self::Add(c, d))
            | (Self::Mul(a, b), Self::Mul(c, d))
            | (Self::Max(a, b), Self::Max(c, d))
            | (Self::Min(a, b), Self::Min(c, d))
            | (Self::Broadcast(a, b), Self::Broadcast(c, d)) => commutative_eq(a, b, c, d),
            (Self::Sub(a, b), Self::Sub(c, d)) | (Self::Div(a, b), Self::Div(c, d)) => {
                a == c && b == d
            }
            _ => false,
        }
    }
}

impl Eq for DimExpr {}

impl Hash for DimExpr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

impl Add<DimExpr> for DimExpr {
    type Output = DimExpr;

    fn add(self, rhs: DimExpr) -> Self {
        match fold_values(&self, &rhs, |x, y| x.checked_add(y)) {
            Some(val) => Self::Value(val),
            None => Self::Add(self.into(), rhs.into()),
        }
    }
}

impl Sub<DimExpr> for DimExpr {
    type Output = DimExpr;

    fn sub(self, rhs: DimExpr) -> Self {
        match fold_values(&self, &rhs, |x, y| x.checked_sub(y)) {
            Some(val) => Self::Value(val),
            None => Self::Sub(self.into(), rhs.into()),
        }
    }
}

impl AddAssign<DimExpr> for DimExpr {
    fn add_assign(&mut self, rhs: DimExpr) {
        *self = self.clone() + rhs;
    }
}

impl Mul<DimExpr> for DimExpr {
    type Output = DimExpr;

    fn mul(self, rhs: DimExpr) -> Self {
        match fold_values(&self, &rhs, |x, y| x.checked_mul(y)) {
            Some(val) => Self::Value(val),
            None => Self::Mul(self.into(), rhs.into()),
        }
    }
}

impl Div<DimExpr> for DimExpr {
    type Output = DimExpr;

    fn div(self, rhs: DimExpr) -> Self {
        match fold_values(&self, &rhs, |x, y| div_floor(x, y)) {
            Some(val) => Self::Value(val),
            None => Self::Div(self.into(), rhs.into()),
        }
    }
}

impl Neg for DimExpr {
    type Output = DimExpr;

    fn neg(self) -> Self {
        match self.as_value().and_then(i64::checked_neg) {
            Some(neg) => Self::Value(neg),
            None => Self::Neg(self.into()),
        }
    }
}

impl From<Symbol> for DimExpr {
    fn from(val: Symbol) -> Self {
        Self::Var(val.into())
    }
}

/// Create a symbol with a given name and an assumption that the value is
/// positive (`>= 0`).
///
/// The rationale for the positivity assumption is that during shape inference,
/// the most common use of symbols is to represent dimension sizes.
impl<'a> From<&'a str> for DimExpr {
    fn from(name: &'a str) -> Self {
        DimExpr::pos_var(name)
    }
}

impl From<i64> for DimExpr {
    fn from(val: i64) -> Self {
        DimExpr::Value(val)
    }
}

impl fmt::Debug for DimExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_expr(f, true)
    }
}

impl fmt::Display for DimExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_expr(f, false)
    }
}

/// Evaluate a binary operation if both operands are constants.
fn fold_values(
    lhs: &DimExpr,
    rhs: &DimExpr,
    op: impl Fn(i64, i64) -> Option<i64>,
) -> Option<i64> {
    match (lhs, rhs) {
        (DimExpr::Value(x), DimExpr::Value(y)) => op(*x, *y),
        _ => None,
    }
}

/// Integer division rounding towards negative infinity.
///
/// Returns `None` if `rhs` is zero or the result overflows.
pub const fn div_floor(lhs: i64, rhs: i64) -> Option<i64> {
    let Some(d) = lhs.checked_div(rhs) else {
        return None;
    };
    let r = lhs % rhs;
    if r != 0 && ((r < 0) != (rhs < 0)) {
        Some(d - 1)
    } else {
        Some(d)
    }
}
