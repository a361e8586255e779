//! Compile-time expression rewrites: commutative reassociation, constant
//! folding, boolean short-circuit collapse, and scalar call folding.

use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::Value;
use crate::func;
use crate::kv::KVPair;
use crate::query::ast::{Expr, Operator, ValueType};

pub struct ExpressionOptimizer;

impl ExpressionOptimizer {
    /// Run the rewrite twice; the second pass folds constants the first
    /// pass rotated into place, and the result is a fixed point.
    pub fn optimize(expr: Expr) -> Expr {
        Self::pass(Self::pass(expr))
    }

    fn pass(expr: Expr) -> Expr {
        match expr {
            e @ Expr::Binary { .. } => {
                let e = Self::reorder(e);
                let (e, _) = Self::fold_binary(e);
                let (e, _) = Self::collapse_and_or(e);
                e
            }
            e @ Expr::Call { .. } => Self::fold_call(e).0,
            other => other,
        }
    }

    fn is_foldable_literal(e: &Expr) -> bool {
        matches!(
            e,
            Expr::StringLit { .. } | Expr::NumberLit { .. } | Expr::FloatLit { .. }
        )
    }

    fn is_literal(e: &Expr) -> bool {
        Self::is_foldable_literal(e) || matches!(e, Expr::BoolLit { .. })
    }

    /// For `+` and `*`: rotate `(ANY op LIT) op LIT` into
    /// `ANY op (LIT op LIT)` so folding can collapse the literal pair.
    fn reorder(expr: Expr) -> Expr {
        let (pos, op, left, right) = match expr {
            Expr::Binary {
                pos,
                op,
                left,
                right,
            } => (pos, op, left, right),
            other => return other,
        };
        let left = match *left {
            l @ Expr::Binary { .. } => Self::reorder(l),
            l => l,
        };
        let right = match *right {
            r @ Expr::Binary { .. } => Self::reorder(r),
            r => r,
        };
        if (op == Operator::Add || op == Operator::Mul)
            && Self::is_foldable_literal(&right)
            && !Self::is_foldable_literal(&left)
        {
            if let Expr::Binary {
                pos: lpos,
                op: lop,
                left: ll,
                right: lr,
            } = left
            {
                if lop == op
                    && (Self::is_foldable_literal(&lr) || Self::all_literal_chain(&lr, op))
                {
                    return Expr::Binary {
                        pos,
                        op,
                        left: ll,
                        right: Box::new(Expr::Binary {
                            pos,
                            op,
                            left: lr,
                            right: Box::new(right),
                        }),
                    };
                }
                return Expr::Binary {
                    pos,
                    op,
                    left: Box::new(Expr::Binary {
                        pos: lpos,
                        op: lop,
                        left: ll,
                        right: lr,
                    }),
                    right: Box::new(right),
                };
            }
        }
        Expr::Binary {
            pos,
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// True when the whole subtree is literals chained by `op`.
    fn all_literal_chain(expr: &Expr, op: Operator) -> bool {
        match expr {
            Expr::Binary {
                op: eop,
                left,
                right,
                ..
            } => {
                *eop == op
                    && (Self::is_foldable_literal(left) || Self::all_literal_chain(left, op))
                    && (Self::is_foldable_literal(right) || Self::all_literal_chain(right, op))
            }
            _ => false,
        }
    }

    fn const_eval(expr: &Expr) -> Option<Value> {
        let blank = KVPair::default();
        let mut ctx = ExecuteCtx::disabled();
        expr.eval(&blank, &mut ctx).ok()
    }

    fn literal_of(value: &Value, pos: usize) -> Option<Expr> {
        match value {
            Value::Int(i) => Some(Expr::NumberLit {
                pos,
                text: i.to_string(),
                value: *i,
            }),
            Value::Float(f) => Some(Expr::FloatLit {
                pos,
                text: f.to_string(),
                value: *f,
            }),
            Value::Bool(b) => Some(Expr::BoolLit { pos, value: *b }),
            Value::Str(_) | Value::Bytes(_) => Some(Expr::StringLit {
                pos,
                value: value.display_string(),
            }),
            _ => None,
        }
    }

    /// Fold arithmetic and comparisons whose operands are both literal.
    fn fold_binary(expr: Expr) -> (Expr, bool) {
        let (pos, op, left, right) = match expr {
            Expr::Binary {
                pos,
                op,
                left,
                right,
            } => (pos, op, left, right),
            other => return (other, false),
        };
        let (left, left_lit) = match *left {
            l @ Expr::Binary { .. } => Self::fold_binary(l),
            l @ Expr::Call { .. } => Self::fold_call(l),
            l => {
                let lit = Self::is_literal(&l);
                (l, lit)
            }
        };
        let (right, right_lit) = match *right {
            r @ Expr::Binary { .. } => Self::fold_binary(r),
            r @ Expr::Call { .. } => Self::fold_call(r),
            r => {
                let lit = Self::is_literal(&r);
                (r, lit)
            }
        };
        let rebuilt = Expr::Binary {
            pos,
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        if !(left_lit && right_lit) {
            return (rebuilt, false);
        }
        match op {
            Operator::Add
            | Operator::Sub
            | Operator::Mul
            | Operator::Div
            | Operator::And
            | Operator::Or
            | Operator::Eq
            | Operator::NotEq
            | Operator::Gt
            | Operator::Gte
            | Operator::Lt
            | Operator::Lte => match Self::const_eval(&rebuilt) {
                Some(value) => {
                    let lit_pos = match &rebuilt {
                        Expr::Binary { left, .. } => left.pos(),
                        _ => pos,
                    };
                    match Self::literal_of(&value, lit_pos) {
                        Some(lit) => (lit, true),
                        None => (rebuilt, false),
                    }
                }
                None => (rebuilt, false),
            },
            _ => (rebuilt, false),
        }
    }

    /// `true & X` -> `X`, `false & X` -> `false`, `true | X` -> `true`,
    /// `false | X` -> `X`, and the symmetric forms.
    fn collapse_and_or(expr: Expr) -> (Expr, bool) {
        let (pos, op, left, right) = match expr {
            Expr::Binary {
                pos,
                op,
                left,
                right,
            } => (pos, op, left, right),
            other => return (other, false),
        };
        if op != Operator::And && op != Operator::Or {
            let rebuilt = Expr::Binary {
                pos,
                op,
                left,
                right,
            };
            return (rebuilt, false);
        }
        let lval = match left.as_ref() {
            Expr::BoolLit { value, .. } => Some(*value),
            _ => None,
        };
        let rval = match right.as_ref() {
            Expr::BoolLit { value, .. } => Some(*value),
            _ => None,
        };
        let and = op == Operator::And;
        match (lval, rval) {
            (Some(l), Some(r)) => {
                let v = if and { l && r } else { l || r };
                (Expr::BoolLit { pos, value: v }, true)
            }
            (Some(l), None) => {
                if and {
                    if l {
                        (*right, true)
                    } else {
                        (Expr::BoolLit { pos, value: false }, true)
                    }
                } else if l {
                    (Expr::BoolLit { pos, value: true }, true)
                } else {
                    (*right, true)
                }
            }
            (None, Some(r)) => {
                if and {
                    if r {
                        (*left, true)
                    } else {
                        (Expr::BoolLit { pos, value: false }, true)
                    }
                } else if r {
                    (Expr::BoolLit { pos, value: true }, true)
                } else {
                    (*left, true)
                }
            }
            (None, None) => (
                Expr::Binary {
                    pos,
                    op,
                    left,
                    right,
                },
                false,
            ),
        }
    }

    /// Fold a registered scalar call whose arguments are all literal.
    /// JSON results have no literal form and are left alone; so are list
    /// results.
    fn fold_call(expr: Expr) -> (Expr, bool) {
        let (pos, name, args, result) = match expr {
            Expr::Call {
                pos,
                name,
                args,
                result,
            } => (pos, name, args, result),
            other => return (other, false),
        };
        let mut all_literal = true;
        let args: Vec<Expr> = args
            .into_iter()
            .map(|arg| {
                let folded = Self::pass(arg);
                if !Self::is_literal(&folded) {
                    all_literal = false;
                }
                folded
            })
            .collect();
        let rebuilt = Expr::Call {
            pos,
            name,
            args,
            result,
        };
        if !all_literal || !func::is_scalar_call(&rebuilt) {
            return (rebuilt, false);
        }
        match rebuilt.return_type() {
            ValueType::Str | ValueType::Number | ValueType::Bool => {}
            _ => return (rebuilt, false),
        }
        match Self::const_eval(&rebuilt) {
            Some(value) => match Self::literal_of(&value, pos) {
                Some(lit) => (lit, true),
                None => (rebuilt, false),
            },
            None => (rebuilt, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_where_expr;

    fn optimize(query: &str) -> String {
        let expr = parse_where_expr(query).unwrap();
        ExpressionOptimizer::optimize(expr).to_string()
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(optimize("1 + 2"), "3");
        assert_eq!(optimize("2 * 3 + 1"), "7");
        assert_eq!(optimize("1 < 2"), "true");
        assert_eq!(optimize("'a' + 'b'"), "'ab'");
    }

    #[test]
    fn test_float_folds_to_float() {
        assert_eq!(optimize("1 + 2.5"), "3.5");
        assert_eq!(optimize("5 / 2.0"), "2.5");
    }

    #[test]
    fn test_reassociation_enables_folding() {
        // (int(value) + 1) + 2 -> int(value) + 3
        assert_eq!(optimize("int(value) + 1 + 2"), "(int(VALUE) + 3)");
        assert_eq!(optimize("int(value) * 2 * 3"), "(int(VALUE) * 6)");
        // subtraction must not reassociate
        assert_eq!(optimize("int(value) - 1 - 2"), "((int(VALUE) - 1) - 2)");
    }

    #[test]
    fn test_boolean_collapse() {
        // comparisons fold to booleans first, then collapse out
        assert_eq!(optimize("1 < 2 & key = 'a'"), "(KEY = 'a')");
        assert_eq!(optimize("1 > 2 & key = 'a'"), "false");
        assert_eq!(optimize("1 < 2 | key = 'a'"), "true");
        assert_eq!(optimize("1 > 2 | key = 'a'"), "(KEY = 'a')");
        assert_eq!(optimize("key = 'a' & 1 < 2"), "(KEY = 'a')");
    }

    #[test]
    fn test_function_folding() {
        assert_eq!(optimize("upper('abc')"), "'ABC'");
        assert_eq!(optimize("int('42') + 1"), "43");
        assert_eq!(optimize("len('abc')"), "3");
        // json has no literal form
        assert_eq!(optimize("json('{}')"), "json('{}')");
        // non-literal args stay put
        assert_eq!(optimize("upper(value)"), "upper(VALUE)");
    }

    #[test]
    fn test_idempotence() {
        for q in [
            "int(value) + 1 + 2",
            "1 < 2 & key = 'a'",
            "upper('abc')",
            "key ^= 'p' & int(value) * 2 * 3 > 5",
        ] {
            let once = ExpressionOptimizer::optimize(parse_where_expr(q).unwrap());
            let twice = ExpressionOptimizer::optimize(once.clone());
            assert_eq!(once.to_string(), twice.to_string(), "query {q}");
        }
    }
}
