//! Semantic check: bottom-up type derivation, operand constraints, and
//! alias resolution into field references.

use std::rc::Rc;

use crate::error::{KeyqlError, Result};
use crate::func;
use crate::query::ast::{Expr, FieldKeyword, Operator, ValueType};

/// Context the checker resolves names against: the projection field list
/// plus flags forbidding the scan fields where no current row exists.
#[derive(Debug, Clone, Default)]
pub struct CheckCtx {
    pub fields: Vec<Rc<Expr>>,
    pub field_names: Vec<String>,
    pub field_types: Vec<ValueType>,
    pub not_allow_key: bool,
    pub not_allow_value: bool,
}

impl CheckCtx {
    pub fn get_named_expr(&self, name: &str) -> Option<Rc<Expr>> {
        for (i, fname) in self.field_names.iter().enumerate() {
            if fname == name && i < self.fields.len() {
                return Some(self.fields[i].clone());
            }
        }
        None
    }
}

impl Expr {
    /// Validate this expression and rewrite alias names into field
    /// references. Runs after parse, before optimization.
    pub fn check(&mut self, ctx: &CheckCtx) -> Result<()> {
        match self {
            Expr::Binary { .. } => self.check_binary(ctx),
            Expr::Not { right, .. } => {
                right.check(ctx)?;
                if right.return_type() != ValueType::Bool {
                    return Err(KeyqlError::syntax(
                        right.pos(),
                        "! operator right expression has wrong type",
                    ));
                }
                Ok(())
            }
            Expr::Field { pos, which } => {
                if *which == FieldKeyword::Key && ctx.not_allow_key {
                    return Err(KeyqlError::syntax(*pos, "key field is not allowed here"));
                }
                if *which == FieldKeyword::Value && ctx.not_allow_value {
                    return Err(KeyqlError::syntax(*pos, "value field is not allowed here"));
                }
                Ok(())
            }
            Expr::Call { name, args, .. } => {
                if !matches!(name.as_ref(), Expr::Name { .. }) {
                    return Err(KeyqlError::syntax(name.pos(), "Invalid function name"));
                }
                for arg in args.iter_mut() {
                    arg.check(ctx)?;
                }
                Ok(())
            }
            Expr::List { pos, items } => {
                if items.is_empty() {
                    return Err(KeyqlError::syntax(*pos, "Empty list"));
                }
                for item in items.iter_mut() {
                    item.check(ctx)?;
                }
                let first = items[0].return_type();
                for (i, item) in items.iter().enumerate().skip(1) {
                    if item.return_type() != first {
                        return Err(KeyqlError::syntax(
                            item.pos(),
                            format!("List {i} item has wrong type"),
                        ));
                    }
                }
                Ok(())
            }
            Expr::Access { left, index, .. } => {
                left.check(ctx)?;
                index.check(ctx)?;
                check_access(left, index)
            }
            // Literals, names, and already-resolved references.
            _ => Ok(()),
        }
    }

    fn check_binary(&mut self, ctx: &CheckCtx) -> Result<()> {
        let (op, pos) = match self {
            Expr::Binary { op, pos, .. } => (*op, *pos),
            _ => unreachable!(),
        };
        if let Expr::Binary { left, right, .. } = self {
            left.check(ctx)?;
            right.check(ctx)?;
            rewrite_alias(left, ctx);
            rewrite_alias(right, ctx);
        }
        let (left, right) = match &*self {
            Expr::Binary { left, right, .. } => (left.as_ref(), right.as_ref()),
            _ => unreachable!(),
        };
        match op {
            Operator::And | Operator::Or => check_and_or(op, left, right),
            Operator::Not => Err(KeyqlError::syntax(pos, "Invalid operator !")),
            Operator::Add | Operator::Sub | Operator::Mul | Operator::Div => {
                check_math(op, left, right)
            }
            Operator::In => check_in(left, right),
            Operator::Between => check_between(left, right),
            _ => check_compare(op, pos, left, right),
        }
    }
}

/// Swap a bare name for a reference to the projection field it aliases.
fn rewrite_alias(slot: &mut Box<Expr>, ctx: &CheckCtx) {
    if let Expr::Name { pos, name } = slot.as_ref() {
        if let Some(fexpr) = ctx.get_named_expr(name) {
            *slot = Box::new(Expr::FieldRef {
                pos: *pos,
                name: name.clone(),
                field: fexpr,
            });
        }
    }
}

/// Operand shapes that can produce a boolean.
fn boolish_operand(e: &Expr) -> bool {
    matches!(
        e,
        Expr::Binary { .. } | Expr::Call { .. } | Expr::Not { .. } | Expr::FieldRef { .. }
    )
}

fn check_and_or(op: Operator, left: &Expr, right: &Expr) -> Result<()> {
    for side in [left, right] {
        if !boolish_operand(side) {
            return Err(KeyqlError::syntax(
                side.pos(),
                format!("{op} operator with invalid expression {side}"),
            ));
        }
        if side.return_type() != ValueType::Bool {
            return Err(KeyqlError::syntax(
                side.pos(),
                format!("{op} operator has wrong type of expression {side}"),
            ));
        }
    }
    Ok(())
}

/// Is this operand usable in arithmetic, and is it string-typed?
fn math_operand(e: &Expr) -> Result<bool> {
    match e {
        Expr::Binary { .. } | Expr::Call { .. } | Expr::NumberLit { .. } | Expr::FloatLit { .. }
        | Expr::FieldRef { .. } => match e.return_type() {
            ValueType::Number => Ok(false),
            ValueType::Str => Ok(true),
            _ => Err(KeyqlError::syntax(
                e.pos(),
                format!("operator has wrong type of expression {e}"),
            )),
        },
        Expr::StringLit { .. } | Expr::Field { .. } | Expr::Access { .. } => Ok(true),
        _ => Err(KeyqlError::syntax(
            e.pos(),
            format!("operator with invalid expression {e}"),
        )),
    }
}

fn check_math(op: Operator, left: &Expr, right: &Expr) -> Result<()> {
    let lstring = math_operand(left)?;
    let rstring = math_operand(right)?;
    // `+` on two strings is concatenation; strings are invalid everywhere
    // else.
    if !(op == Operator::Add && lstring && rstring) {
        if lstring {
            return Err(KeyqlError::syntax(
                left.pos(),
                format!("{op} operator with invalid left expression {left}"),
            ));
        }
        if rstring {
            return Err(KeyqlError::syntax(
                right.pos(),
                format!("{op} operator with invalid right expression {right}"),
            ));
        }
    }
    if op == Operator::Div {
        match right {
            Expr::NumberLit { value: 0, pos, .. } => {
                return Err(KeyqlError::syntax(*pos, "/ operator divide by zero"));
            }
            Expr::FloatLit { value, pos, .. } if *value == 0.0 => {
                return Err(KeyqlError::syntax(*pos, "/ operator divide by zero"));
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_compare(op: Operator, pos: usize, left: &Expr, right: &Expr) -> Result<()> {
    let mut key_fields = 0;
    let mut value_fields = 0;
    for side in [left, right] {
        match side {
            Expr::Field { which, .. } => match which {
                FieldKeyword::Key => key_fields += 1,
                FieldKeyword::Value => value_fields += 1,
            },
            Expr::Call { .. }
            | Expr::FieldRef { .. }
            | Expr::StringLit { .. }
            | Expr::BoolLit { .. }
            | Expr::NumberLit { .. }
            | Expr::FloatLit { .. }
            | Expr::Binary { .. }
            | Expr::Access { .. } => {}
            _ => {
                return Err(KeyqlError::syntax(
                    side.pos(),
                    format!("{op} operator with invalid expression"),
                ));
            }
        }
    }
    if key_fields == 2 || value_fields == 2 {
        return Err(KeyqlError::syntax(
            pos,
            format!("{op} operator with two same field"),
        ));
    }
    let ltype = left.return_type();
    let rtype = right.return_type();
    if ltype != rtype {
        return Err(KeyqlError::syntax(
            pos,
            format!("{op} operator left and right type not same"),
        ));
    }
    match op {
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            if ltype != ValueType::Number && ltype != ValueType::Str {
                return Err(KeyqlError::syntax(
                    left.pos(),
                    format!("{op} operator has wrong type of left expression"),
                ));
            }
        }
        Operator::PrefixMatch | Operator::RegexpMatch => {
            if ltype != ValueType::Str {
                return Err(KeyqlError::syntax(
                    left.pos(),
                    format!("{op} operator has wrong type of left expression"),
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_in(left: &Expr, right: &Expr) -> Result<()> {
    let ltype = left.return_type();
    match right {
        Expr::List { items, .. } => {
            for item in items {
                if item.return_type() != ltype {
                    return Err(KeyqlError::syntax(
                        item.pos(),
                        "in operator element has wrong type",
                    ));
                }
            }
            Ok(())
        }
        Expr::Call { .. } | Expr::FieldRef { .. } => {
            if right.return_type() != ValueType::List {
                return Err(KeyqlError::syntax(
                    right.pos(),
                    "in operator element has wrong type",
                ));
            }
            Ok(())
        }
        _ => Err(KeyqlError::syntax(
            right.pos(),
            "in operator right expression must be list expression",
        )),
    }
}

fn check_between(left: &Expr, right: &Expr) -> Result<()> {
    let ltype = left.return_type();
    let items = match right {
        Expr::List { items, .. } if items.len() == 2 => items,
        _ => {
            return Err(KeyqlError::syntax(
                right.pos(),
                "between operator invalid right expression",
            ));
        }
    };
    if ltype != ValueType::Str && ltype != ValueType::Number {
        return Err(KeyqlError::syntax(
            left.pos(),
            "between operator only support string and number type",
        ));
    }
    if items[0].return_type() != ltype || items[1].return_type() != ltype {
        return Err(KeyqlError::syntax(
            right.pos(),
            "between operator right expression with wrong type",
        ));
    }
    Ok(())
}

/// Field access needs a JSON or list left side, with cascades permitted
/// (`json(value)['a']['b']`, `json(value)['list'][1]`).
fn check_access(left: &Expr, index: &Expr) -> Result<()> {
    let left_is_access = matches!(left, Expr::Access { .. });
    let ltype = left.return_type();
    match ltype {
        ValueType::Json | ValueType::List => {}
        _ if left_is_access => return Ok(()),
        _ => {
            return Err(KeyqlError::syntax(
                left.pos(),
                "Field access expression left require JSON or List type",
            ));
        }
    }
    match index {
        Expr::StringLit { .. } => {
            if ltype == ValueType::Json || left_is_access {
                return Ok(());
            }
        }
        Expr::NumberLit { .. } => {
            if ltype == ValueType::List || left_is_access {
                return Ok(());
            }
        }
        _ => {}
    }
    Err(KeyqlError::syntax(index.pos(), "Invalid field name"))
}

/// Reject aggregate calls nested inside aggregate arguments anywhere in a
/// projection field.
pub fn check_no_nested_aggr(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Binary { left, right, .. } => {
            check_no_nested_aggr(left)?;
            check_no_nested_aggr(right)
        }
        Expr::Call { args, .. } => {
            if func::is_aggr_call(expr) {
                for arg in args {
                    check_aggr_arg(arg)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_aggr_arg(arg: &Expr) -> Result<()> {
    match arg {
        Expr::Binary { left, right, .. } => {
            check_aggr_arg(left)?;
            check_aggr_arg(right)
        }
        Expr::Call { .. } => {
            if func::is_aggr_call(arg) {
                return Err(KeyqlError::syntax(
                    arg.pos(),
                    "Aggregate function arguments should not contains aggregate function",
                ));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
