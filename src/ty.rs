//! The small type universe of the language: integers, reals, and strings.
//!
//! Every expression node starts out `Unresolved` and is assigned a concrete
//! type exactly once by the type checker. The code generator reads the tags
//! but never re-derives them.

use std::fmt;

/// Static type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprType {
  Unresolved,
  Integer,
  Real,
  Str,
}

impl ExprType {
  pub fn is_numeric(self) -> bool {
    matches!(self, ExprType::Integer | ExprType::Real)
  }

  /// Usual arithmetic promotion: mixing an integer with a real yields a real.
  /// Only meaningful for numeric operands; callers check that first.
  pub fn promote(self, other: ExprType) -> ExprType {
    if self == ExprType::Real || other == ExprType::Real {
      ExprType::Real
    } else {
      ExprType::Integer
    }
  }
}

impl fmt::Display for ExprType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ExprType::Unresolved => "<unresolved>",
      ExprType::Integer => "integer",
      ExprType::Real => "real",
      ExprType::Str => "string",
    };
    write!(f, "{name}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn promotion_prefers_real() {
    assert_eq!(ExprType::Integer.promote(ExprType::Integer), ExprType::Integer);
    assert_eq!(ExprType::Integer.promote(ExprType::Real), ExprType::Real);
    assert_eq!(ExprType::Real.promote(ExprType::Integer), ExprType::Real);
  }

  #[test]
  fn display_names_match_source_keywords() {
    assert_eq!(ExprType::Str.to_string(), "string");
    assert_eq!(ExprType::Integer.to_string(), "integer");
  }
}
