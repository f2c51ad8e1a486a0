//! The filter/comparator grammar, a superset of the expression language.
//!
//! A filter input is a leading relational operator with an expression,
//! range, or mask operand; a bare relational operator (compare `$new` to
//! `$old`); or a plain expression used as a boolean predicate.

use crate::error::Error;
use crate::expr::ast::{Ast, BinaryOp, Signedness, Slot};
use crate::expr::parser::Parser;
use crate::jit::{self, JitCode};
use crate::expr::lexer::Token;

/// Closed set of comparator shapes. `None` is the default for a comparator
/// that has not been parsed (a parse failure never yields one of the live
/// kinds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComparatorKind {
    EqExpr,
    NeExpr,
    GtExpr,
    GeExpr,
    LtExpr,
    LeExpr,
    EqRange,
    NeRange,
    EqMask,
    NeMask,
    Boolean,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    #[default]
    None,
}

impl ComparatorKind {
    /// Kinds with no operand, comparing `$new` against the stored value.
    pub fn compares_previous(self) -> bool {
        matches!(
            self,
            ComparatorKind::Eq
                | ComparatorKind::Ne
                | ComparatorKind::Gt
                | ComparatorKind::Ge
                | ComparatorKind::Lt
                | ComparatorKind::Le
        )
    }

    fn relational(self) -> Option<BinaryOp> {
        Some(match self {
            ComparatorKind::EqExpr | ComparatorKind::Eq => BinaryOp::Eq,
            ComparatorKind::NeExpr | ComparatorKind::Ne => BinaryOp::Ne,
            ComparatorKind::GtExpr | ComparatorKind::Gt => BinaryOp::Gt,
            ComparatorKind::GeExpr | ComparatorKind::Ge => BinaryOp::Ge,
            ComparatorKind::LtExpr | ComparatorKind::Lt => BinaryOp::Lt,
            ComparatorKind::LeExpr | ComparatorKind::Le => BinaryOp::Le,
            _ => return None,
        })
    }
}

/// A parsed filter. When the operands folded to literals their values are
/// cached in `constant1`/`constant2`, making the comparator eligible for the
/// non-JIT fast path.
#[derive(Debug, Clone, Default)]
pub struct Comparator {
    pub kind: ComparatorKind,
    pub expr1: Option<Ast>,
    pub expr2: Option<Ast>,
    pub constant1: Option<u64>,
    pub constant2: Option<u64>,
}

impl Comparator {
    pub fn parse(input: &str) -> Result<Comparator, Error> {
        let mut parser = Parser::new(input)?;

        let lead = match parser.peek() {
            Some(Token::Eq) => Some(ComparatorKind::Eq),
            Some(Token::Ne) => Some(ComparatorKind::Ne),
            Some(Token::Gt) => Some(ComparatorKind::Gt),
            Some(Token::Ge) => Some(ComparatorKind::Ge),
            Some(Token::Lt) => Some(ComparatorKind::Lt),
            Some(Token::Le) => Some(ComparatorKind::Le),
            _ => None,
        };

        let mut comparator = Comparator::default();
        match lead {
            Some(op) => {
                parser.bump();
                if parser.finished() {
                    // Bare operator: compare against the stored value.
                    comparator.kind = op;
                } else if parser.eat(&Token::LBracket) {
                    let lo = parser.expression()?;
                    parser.expect(&Token::Comma)?;
                    let hi = parser.expression()?;
                    parser.expect(&Token::RBracket)?;
                    comparator.kind = match op {
                        ComparatorKind::Eq => ComparatorKind::EqRange,
                        ComparatorKind::Ne => ComparatorKind::NeRange,
                        _ => {
                            return Err(Error::Parse {
                                at: parser.at(),
                                msg: "ranges take '=' or '!=' only".into(),
                            });
                        }
                    };
                    comparator.expr1 = Some(lo);
                    comparator.expr2 = Some(hi);
                } else if parser.eat(&Token::LBrace) {
                    let value = parser.expression()?;
                    parser.expect(&Token::Comma)?;
                    let mask = parser.expression()?;
                    parser.expect(&Token::RBrace)?;
                    comparator.kind = match op {
                        ComparatorKind::Eq => ComparatorKind::EqMask,
                        ComparatorKind::Ne => ComparatorKind::NeMask,
                        _ => {
                            return Err(Error::Parse {
                                at: parser.at(),
                                msg: "masks take '=' or '!=' only".into(),
                            });
                        }
                    };
                    comparator.expr1 = Some(value);
                    comparator.expr2 = Some(mask);
                } else {
                    comparator.kind = match op {
                        ComparatorKind::Eq => ComparatorKind::EqExpr,
                        ComparatorKind::Ne => ComparatorKind::NeExpr,
                        ComparatorKind::Gt => ComparatorKind::GtExpr,
                        ComparatorKind::Ge => ComparatorKind::GeExpr,
                        ComparatorKind::Lt => ComparatorKind::LtExpr,
                        ComparatorKind::Le => ComparatorKind::LeExpr,
                        _ => unreachable!(),
                    };
                    comparator.expr1 = Some(parser.expression()?);
                }
            }
            None => {
                comparator.kind = ComparatorKind::Boolean;
                comparator.expr1 = Some(parser.expression()?);
            }
        }
        parser.expect_end()?;

        comparator.constant1 = comparator.expr1.as_ref().and_then(Ast::as_number);
        comparator.constant2 = comparator.expr2.as_ref().and_then(Ast::as_number);
        Ok(comparator)
    }

    /// Eligible for the constant fast path: every operand folded to a
    /// literal. `Boolean` and the bare kinds always need the stored value
    /// or the JIT.
    pub fn fast_path(&self) -> bool {
        match self.kind {
            ComparatorKind::EqExpr
            | ComparatorKind::NeExpr
            | ComparatorKind::GtExpr
            | ComparatorKind::GeExpr
            | ComparatorKind::LtExpr
            | ComparatorKind::LeExpr => self.constant1.is_some(),
            ComparatorKind::EqRange
            | ComparatorKind::NeRange
            | ComparatorKind::EqMask
            | ComparatorKind::NeMask => self.constant1.is_some() && self.constant2.is_some(),
            _ => false,
        }
    }

    /// Lower to native code of signature `(old, new, addr) -> word`.
    /// Operand-less kinds compare `$new` to `$old`; expression kinds compare
    /// `$new` to their operand.
    pub fn compile(&self, sign: Signedness) -> Result<JitCode, Error> {
        let new_ref = || Box::new(Ast::Ref(Slot::New));
        let operand = |expr: &Option<Ast>| -> Result<Box<Ast>, Error> {
            expr.clone().map(Box::new).ok_or_else(|| Error::Parse {
                at: 0,
                msg: "comparator is missing an operand".into(),
            })
        };

        let ast = match self.kind {
            ComparatorKind::EqExpr
            | ComparatorKind::NeExpr
            | ComparatorKind::GtExpr
            | ComparatorKind::GeExpr
            | ComparatorKind::LtExpr
            | ComparatorKind::LeExpr => Ast::Binary {
                op: self.kind.relational().unwrap_or(BinaryOp::Eq),
                lhs: new_ref(),
                rhs: operand(&self.expr1)?,
            },
            ComparatorKind::EqRange | ComparatorKind::NeRange => Ast::Range {
                expr: new_ref(),
                lo: operand(&self.expr1)?,
                hi: operand(&self.expr2)?,
                invert: self.kind == ComparatorKind::NeRange,
            },
            ComparatorKind::EqMask | ComparatorKind::NeMask => Ast::Mask {
                expr: new_ref(),
                value: operand(&self.expr1)?,
                mask: operand(&self.expr2)?,
                invert: self.kind == ComparatorKind::NeMask,
            },
            ComparatorKind::Boolean => match &self.expr1 {
                Some(expr) => expr.clone(),
                None => {
                    return Err(Error::Parse {
                        at: 0,
                        msg: "boolean comparator without an expression".into(),
                    });
                }
            },
            kind if kind.compares_previous() => Ast::Binary {
                op: kind.relational().unwrap_or(BinaryOp::Eq),
                lhs: new_ref(),
                rhs: Box::new(Ast::Ref(Slot::Old)),
            },
            _ => {
                return Err(Error::Parse {
                    at: 0,
                    msg: "cannot compile an unparsed comparator".into(),
                });
            }
        };
        jit::compile(&ast, sign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relational_with_operand() {
        let c = Comparator::parse("= 12").unwrap();
        assert_eq!(c.kind, ComparatorKind::EqExpr);
        assert_eq!(c.constant1, Some(12));
        assert!(c.fast_path());

        let c = Comparator::parse(">= $old+1").unwrap();
        assert_eq!(c.kind, ComparatorKind::GeExpr);
        assert_eq!(c.constant1, None);
        assert!(!c.fast_path());
    }

    #[test]
    fn range_and_mask() {
        let c = Comparator::parse("=[(5+5),(2*10)]").unwrap();
        assert_eq!(c.kind, ComparatorKind::EqRange);
        assert_eq!((c.constant1, c.constant2), (Some(10), Some(20)));
        assert!(c.fast_path());

        let c = Comparator::parse("!={0xCC00,0xFF00}").unwrap();
        assert_eq!(c.kind, ComparatorKind::NeMask);
        assert!(c.fast_path());

        assert!(Comparator::parse("<[1,2]").is_err());
        assert!(Comparator::parse(">{1,2}").is_err());
    }

    #[test]
    fn bare_operators_compare_previous() {
        for (text, kind) in [
            ("=", ComparatorKind::Eq),
            ("!=", ComparatorKind::Ne),
            (">", ComparatorKind::Gt),
            (">=", ComparatorKind::Ge),
            ("<", ComparatorKind::Lt),
            ("<=", ComparatorKind::Le),
        ] {
            let c = Comparator::parse(text).unwrap();
            assert_eq!(c.kind, kind);
            assert!(c.kind.compares_previous());
            assert!(!c.fast_path());
        }
    }

    #[test]
    fn plain_expression_is_boolean() {
        let c = Comparator::parse("$new=0x203751").unwrap();
        assert_eq!(c.kind, ComparatorKind::Boolean);
        assert!(!c.fast_path());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(Comparator::parse("= [1,2").is_err());
        assert!(Comparator::parse("12 34").is_err());
        assert!(Comparator::parse("").is_err());
    }
}
