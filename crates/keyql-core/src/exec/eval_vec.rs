//! Batch expression evaluation: one result per input row, in order. The
//! batch path mirrors the scalar path observationally; plans may be pulled
//! through either.

use std::collections::HashMap;

use regex::bytes::Regex;

use crate::error::{KeyqlError, Result};
use crate::exec::ctx::ExecuteCtx;
use crate::exec::eval::{
    between_of, cmp_op_of, compile_regex, dict_access, list_access, position_error,
};
use crate::exec::value::{math_op, number_compare, string_compare, CmpOp, Value};
use crate::func;
use crate::kv::KVPair;
use crate::query::ast::{Expr, FieldKeyword, Operator, ValueType};

impl Expr {
    /// Evaluate against an ordered batch of rows.
    pub fn eval_batch(&self, chunk: &[KVPair], ctx: &mut ExecuteCtx) -> Result<Vec<Value>> {
        match self {
            Expr::StringLit { value, .. } => Ok(vec![
                Value::Bytes(value.clone().into_bytes());
                chunk.len()
            ]),
            Expr::NumberLit { value, .. } => Ok(vec![Value::Int(*value); chunk.len()]),
            Expr::FloatLit { value, .. } => Ok(vec![Value::Float(*value); chunk.len()]),
            Expr::BoolLit { value, .. } => Ok(vec![Value::Bool(*value); chunk.len()]),
            Expr::Name { name, .. } => Ok(vec![Value::Str(name.clone()); chunk.len()]),
            Expr::Field { which, .. } => {
                let is_key = *which == FieldKeyword::Key;
                Ok(chunk
                    .iter()
                    .map(|kvp| {
                        Value::Bytes(if is_key {
                            kvp.key.clone()
                        } else {
                            kvp.value.clone()
                        })
                    })
                    .collect())
            }
            Expr::List { items, .. } => {
                let mut cols = Vec::with_capacity(items.len());
                for item in items {
                    cols.push(item.eval_batch(chunk, ctx)?);
                }
                Ok((0..chunk.len())
                    .map(|i| Value::List(cols.iter().map(|c| c[i].clone()).collect()))
                    .collect())
            }
            Expr::Not { right, .. } => {
                let mut vals = right.eval_batch(chunk, ctx)?;
                for v in vals.iter_mut() {
                    match v.as_bool() {
                        Some(b) => *v = Value::Bool(!b),
                        None => {
                            return Err(KeyqlError::execute(
                                right.pos(),
                                "! operator right expression has wrong type, not boolean",
                            ));
                        }
                    }
                }
                Ok(vals)
            }
            Expr::FieldRef { name, field, .. } => {
                if chunk.is_empty() {
                    return Ok(Vec::new());
                }
                if let Some(cached) = ctx.get_chunk_field_result(name, &chunk[0].key) {
                    let copy = cached.clone();
                    ctx.update_hit();
                    return Ok(copy);
                }
                let result = field.eval_batch(chunk, ctx)?;
                // Defensive copy: later passes must not mutate the cache.
                ctx.set_chunk_field_result(name, &chunk[0].key, result.clone());
                Ok(result)
            }
            Expr::Call { args, result, .. } => {
                if let Some(cached) = result.borrow().clone() {
                    return Ok(vec![cached; chunk.len()]);
                }
                let f = func::scalar_function_for(self)?;
                func::check_arity(&f, args, self.pos())?;
                match &f.body_vec {
                    Some(vec_body) => vec_body(chunk, args, ctx),
                    None => {
                        let mut out = Vec::with_capacity(chunk.len());
                        for kvp in chunk {
                            out.push((f.body)(kvp, args, ctx)?);
                        }
                        Ok(out)
                    }
                }
            }
            Expr::Access { left, index, .. } => {
                let lvals = left.eval_batch(chunk, ctx)?;
                match index.as_ref() {
                    Expr::StringLit { value, .. } => lvals
                        .iter()
                        .map(|lv| dict_access(lv, value, left.pos()))
                        .collect(),
                    Expr::NumberLit { value, .. } => lvals
                        .iter()
                        .map(|lv| list_access(lv, *value, left.pos()))
                        .collect(),
                    _ => Err(KeyqlError::syntax(index.pos(), "Invalid field name")),
                }
            }
            Expr::Binary {
                pos,
                op,
                left,
                right,
            } => eval_binary_batch(*pos, *op, left, right, chunk, ctx),
        }
    }
}

fn eval_binary_batch(
    pos: usize,
    op: Operator,
    left: &Expr,
    right: &Expr,
    chunk: &[KVPair],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    match op {
        Operator::Eq => exec_equal_batch(pos, left, right, chunk, ctx, false),
        Operator::NotEq => exec_equal_batch(pos, left, right, chunk, ctx, true),
        Operator::PrefixMatch => {
            let lvals = left.eval_batch(chunk, ctx)?;
            let rvals = right.eval_batch(chunk, ctx)?;
            let mut out = Vec::with_capacity(lvals.len());
            for i in 0..lvals.len() {
                match (lvals[i].as_bytes(), rvals[i].as_bytes()) {
                    (Some(l), Some(r)) => out.push(Value::Bool(l.starts_with(r))),
                    _ => {
                        return Err(KeyqlError::execute(
                            pos,
                            "^= operator left or right expression has wrong type",
                        ));
                    }
                }
            }
            Ok(out)
        }
        Operator::RegexpMatch => {
            let lvals = left.eval_batch(chunk, ctx)?;
            let rvals = right.eval_batch(chunk, ctx)?;
            // Compiled patterns are cached per distinct right side within
            // the batch.
            let mut cache: HashMap<Vec<u8>, Regex> = HashMap::new();
            let mut out = Vec::with_capacity(lvals.len());
            for i in 0..lvals.len() {
                let (l, r) = match (lvals[i].as_bytes(), rvals[i].as_bytes()) {
                    (Some(l), Some(r)) => (l, r),
                    _ => {
                        return Err(KeyqlError::execute(
                            pos,
                            "~= operator left or right expression has wrong type",
                        ));
                    }
                };
                if !cache.contains_key(r) {
                    cache.insert(r.to_vec(), compile_regex(r, right.pos())?);
                }
                let re = &cache[r];
                out.push(Value::Bool(re.is_match(l)));
            }
            Ok(out)
        }
        Operator::And | Operator::Or => {
            let and = op == Operator::And;
            let lvals = left.eval_batch(chunk, ctx)?;
            let rvals = right.eval_batch(chunk, ctx)?;
            let mut out = Vec::with_capacity(lvals.len());
            for i in 0..lvals.len() {
                match (lvals[i].as_bool(), rvals[i].as_bool()) {
                    (Some(l), Some(r)) => {
                        out.push(Value::Bool(if and { l && r } else { l || r }))
                    }
                    _ => {
                        return Err(KeyqlError::execute(
                            pos,
                            "boolean operator left or right expression has wrong type, not boolean",
                        ));
                    }
                }
            }
            Ok(out)
        }
        Operator::Add if left.return_type() == ValueType::Str => {
            let lvals = left.eval_batch(chunk, ctx)?;
            let rvals = right.eval_batch(chunk, ctx)?;
            let mut out = Vec::with_capacity(lvals.len());
            for i in 0..lvals.len() {
                let mut joined = lvals[i].display_string();
                joined.push_str(&rvals[i].display_string());
                out.push(Value::Str(joined));
            }
            Ok(out)
        }
        Operator::Add | Operator::Sub | Operator::Mul | Operator::Div => {
            let opch = match op {
                Operator::Add => b'+',
                Operator::Sub => b'-',
                Operator::Mul => b'*',
                _ => b'/',
            };
            let lvals = left.eval_batch(chunk, ctx)?;
            let rvals = right.eval_batch(chunk, ctx)?;
            let mut out = Vec::with_capacity(lvals.len());
            for i in 0..lvals.len() {
                out.push(math_op(&lvals[i], &rvals[i], opch, right.pos())?);
            }
            Ok(out)
        }
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let cmp = cmp_op_of(op);
            let string = left.return_type() == ValueType::Str;
            let lvals = left.eval_batch(chunk, ctx)?;
            let rvals = right.eval_batch(chunk, ctx)?;
            let mut out = Vec::with_capacity(lvals.len());
            for i in 0..lvals.len() {
                let ok = if string {
                    string_compare(&lvals[i], &rvals[i], cmp)
                } else {
                    number_compare(&lvals[i], &rvals[i], cmp)
                }
                .map_err(|e| position_error(e, pos))?;
                out.push(Value::Bool(ok));
            }
            Ok(out)
        }
        Operator::In => exec_in_batch(pos, left, right, chunk, ctx),
        Operator::Between => exec_between_batch(pos, left, right, chunk, ctx),
        Operator::Not => Err(KeyqlError::execute(pos, "Unknown operator !")),
    }
}

fn exec_equal_batch(
    pos: usize,
    left: &Expr,
    right: &Expr,
    chunk: &[KVPair],
    ctx: &mut ExecuteCtx,
    not: bool,
) -> Result<Vec<Value>> {
    let lvals = left.eval_batch(chunk, ctx)?;
    let rvals = right.eval_batch(chunk, ctx)?;
    if chunk.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(lvals.len());
    for i in 0..lvals.len() {
        let eq = match &lvals[i] {
            Value::Bytes(_) | Value::Str(_) => {
                match (lvals[i].as_bytes(), rvals[i].as_bytes()) {
                    (Some(l), Some(r)) => l == r,
                    _ => {
                        return Err(KeyqlError::execute(
                            pos,
                            "= operator left or right expression has wrong type",
                        ));
                    }
                }
            }
            Value::Int(l) => match &rvals[i] {
                Value::Int(r) => l == r,
                _ => {
                    return Err(KeyqlError::execute(
                        pos,
                        "= operator left or right expression has wrong type",
                    ));
                }
            },
            Value::Bool(l) => match &rvals[i] {
                Value::Bool(r) => l == r,
                _ => {
                    return Err(KeyqlError::execute(
                        pos,
                        "= operator left or right expression has wrong type",
                    ));
                }
            },
            _ => {
                return Err(KeyqlError::execute(
                    pos,
                    "= operator left expression has wrong type",
                ));
            }
        };
        out.push(Value::Bool(if not { !eq } else { eq }));
    }
    Ok(out)
}

fn exec_in_batch(
    pos: usize,
    left: &Expr,
    right: &Expr,
    chunk: &[KVPair],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    let number = left.return_type() != ValueType::Str;
    let lvals = left.eval_batch(chunk, ctx)?;
    let compare = |l: &Value, r: &Value| -> Result<bool> {
        if number {
            number_compare(l, r, CmpOp::Eq).map_err(|e| position_error(e, pos))
        } else {
            string_compare(l, r, CmpOp::Eq).map_err(|e| position_error(e, pos))
        }
    };
    match right {
        Expr::List { items, .. } => {
            let want = if number {
                ValueType::Number
            } else {
                ValueType::Str
            };
            let mut cols = Vec::with_capacity(items.len());
            for item in items {
                if item.return_type() != want {
                    return Err(KeyqlError::execute(
                        item.pos(),
                        "in operator right expression element has wrong type",
                    ));
                }
                cols.push(item.eval_batch(chunk, ctx)?);
            }
            let mut out = Vec::with_capacity(lvals.len());
            for i in 0..lvals.len() {
                let mut found = false;
                for col in &cols {
                    if compare(&lvals[i], &col[i])? {
                        found = true;
                        break;
                    }
                }
                out.push(Value::Bool(found));
            }
            Ok(out)
        }
        Expr::Call { .. } | Expr::FieldRef { .. } => {
            let rvals = right.eval_batch(chunk, ctx)?;
            let mut out = Vec::with_capacity(lvals.len());
            for i in 0..lvals.len() {
                let items = rvals[i].as_list().ok_or_else(|| {
                    KeyqlError::execute(
                        pos,
                        "in operator right expression has wrong type, not list",
                    )
                })?;
                let mut found = false;
                for candidate in items {
                    if compare(&lvals[i], candidate)? {
                        found = true;
                        break;
                    }
                }
                out.push(Value::Bool(found));
            }
            Ok(out)
        }
        _ => Err(KeyqlError::execute(
            pos,
            "in operator right expression has wrong type, not list",
        )),
    }
}

fn exec_between_batch(
    pos: usize,
    left: &Expr,
    right: &Expr,
    chunk: &[KVPair],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    let number = left.return_type() != ValueType::Str;
    let want = if number {
        ValueType::Number
    } else {
        ValueType::Str
    };
    let items = match right {
        Expr::List { items, .. } if items.len() == 2 => items,
        _ => {
            return Err(KeyqlError::execute(
                right.pos(),
                "between operator right expression invalid",
            ));
        }
    };
    if items[0].return_type() != want {
        return Err(KeyqlError::execute(
            items[0].pos(),
            "between operator lower boundary expression has wrong type",
        ));
    }
    if items[1].return_type() != want {
        return Err(KeyqlError::execute(
            items[1].pos(),
            "between operator upper boundary expression has wrong type",
        ));
    }
    let lvals = left.eval_batch(chunk, ctx)?;
    let lowers = items[0].eval_batch(chunk, ctx)?;
    let uppers = items[1].eval_batch(chunk, ctx)?;
    let mut out = Vec::with_capacity(lvals.len());
    for i in 0..lvals.len() {
        out.push(between_of(&lvals[i], &lowers[i], &uppers[i], number, pos)?);
    }
    Ok(out)
}
