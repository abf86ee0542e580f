//! Symbol name generator.

use std::borrow::Cow;

use crate::sym_expr::{DimExpr, Symbol};

/// Generates named symbols.
///
/// Sometimes during shape inference a dimension cannot be expressed in terms
/// of operand dimensions, such as the number of elements selected by a mask.
/// Such dimensions are represented by fresh symbols minted by this generator.
///
/// Note that generally it is preferred to represent values computed from other
/// values as symbolic expressions. This allows the expressions to be compared,
/// simplified and otherwise manipulated.
///
/// Symbols are named `<prefix><n>` where `n` counts up from zero. Generators
/// with different prefixes never produce the same name.
#[derive(Clone, Debug)]
pub struct SymbolGen {
    prefix: Cow<'static, str>,
    next_symbol_id: u64,
}

impl Default for SymbolGen {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolGen {
    pub fn new() -> Self {
        Self::with_prefix("S".into())
    }

    pub fn with_prefix(prefix: Cow<'static, str>) -> Self {
        Self {
            prefix,
            next_symbol_id: 0,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Return the number of symbols generated so far.
    pub fn count(&self) -> u64 {
        self.next_symbol_id
    }

    fn gen_name(&mut self) -> String {
        let name = format!("{}{}", self.prefix, self.next_symbol_id);
        self.next_symbol_id += 1;
        name
    }

    /// Reserve a name and return it as the prefix for a child generator.
    ///
    /// The reserved name is never returned as a symbol, so symbols minted
    /// by children with different reserved prefixes, or by this generator,
    /// never collide.
    pub fn child_prefix(&mut self) -> String {
        format!("{}_", self.gen_name())
    }

    /// Generate a new symbolic value which is assumed to be positive.
    pub fn gen_positive(&mut self) -> DimExpr {
        DimExpr::Var(
            Symbol {
                name: self.gen_name(),
                positive: true,
            }
            .into(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{DimExpr, SymbolGen};

    #[test]
    fn test_symbol_gen() {
        let mut sym_gen = SymbolGen::new();
        assert_eq!(sym_gen.gen_positive(), DimExpr::pos_var("S0"));
        assert_eq!(sym_gen.gen_positive(), DimExpr::pos_var("S1"));
        assert_eq!(sym_gen.count(), 2);

        let mut sym_gen = SymbolGen::with_prefix("S3_".into());
        assert_eq!(sym_gen.gen_positive(), DimExpr::pos_var("S3_0"));
        assert_eq!(sym_gen.gen_positive(), DimExpr::pos_var("S3_1"));
    }

    #[test]
    fn test_child_prefix() {
        let mut sym_gen = SymbolGen::new();
        assert_eq!(sym_gen.child_prefix(), "S0_");
        assert_eq!(sym_gen.gen_positive(), DimExpr::pos_var("S1"));
        assert_eq!(sym_gen.child_prefix(), "S2_");

        let mut child = SymbolGen::with_prefix("S2_".into());
        assert_eq!(child.child_prefix(), "S2_0_");
        assert_eq!(child.gen_positive(), DimExpr::pos_var("S2_1"));
    }

    #[test]
    fn test_generated_symbols_are_positive() {
        let mut sym_gen = SymbolGen::new();
        assert!(sym_gen.gen_positive().is_positive());
    }
}
