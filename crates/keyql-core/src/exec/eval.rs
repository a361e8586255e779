//! Per-row expression evaluation and the residual filter.

use regex::bytes::Regex;

use crate::error::{KeyqlError, Result};
use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::{math_op, number_compare, string_compare, CmpOp, Value};
use crate::func;
use crate::kv::KVPair;
use crate::query::ast::{Expr, FieldKeyword, Operator, ValueType};

/// The residual filter a scan applies to candidate rows. The optimizer
/// narrows the scan shape, this rejects whatever the narrowed scan still
/// admits.
#[derive(Debug, Clone)]
pub struct FilterExec {
    pub expr: Expr,
}

impl FilterExec {
    pub fn new(expr: Expr) -> Self {
        FilterExec { expr }
    }

    pub fn explain(&self) -> String {
        self.expr.to_string()
    }

    pub fn filter(&self, kvp: &KVPair, ctx: &mut ExecuteCtx) -> Result<bool> {
        let result = self.expr.eval(kvp, ctx)?;
        result.as_bool().ok_or_else(|| {
            KeyqlError::execute(self.expr.pos(), "where expression result is not boolean")
        })
    }

    pub fn filter_batch(&self, chunk: &[KVPair], ctx: &mut ExecuteCtx) -> Result<Vec<bool>> {
        let results = self.expr.eval_batch(chunk, ctx)?;
        let mut out = Vec::with_capacity(results.len());
        for v in results {
            match v.as_bool() {
                Some(b) => out.push(b),
                None => {
                    return Err(KeyqlError::execute(
                        self.expr.pos(),
                        "where expression result is not boolean",
                    ));
                }
            }
        }
        Ok(out)
    }
}

impl Expr {
    /// Evaluate against a single row.
    pub fn eval(&self, kv: &KVPair, ctx: &mut ExecuteCtx) -> Result<Value> {
        match self {
            Expr::StringLit { value, .. } => Ok(Value::Bytes(value.clone().into_bytes())),
            Expr::NumberLit { value, .. } => Ok(Value::Int(*value)),
            Expr::FloatLit { value, .. } => Ok(Value::Float(*value)),
            Expr::BoolLit { value, .. } => Ok(Value::Bool(*value)),
            Expr::Name { name, .. } => Ok(Value::Str(name.clone())),
            Expr::Field { which, .. } => match which {
                FieldKeyword::Key => Ok(Value::Bytes(kv.key.clone())),
                FieldKeyword::Value => Ok(Value::Bytes(kv.value.clone())),
            },
            Expr::List { items, .. } => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.eval(kv, ctx)?);
                }
                Ok(Value::List(out))
            }
            Expr::Not { right, .. } => {
                let rval = right.eval(kv, ctx)?;
                match rval.as_bool() {
                    Some(b) => Ok(Value::Bool(!b)),
                    None => Err(KeyqlError::execute(
                        right.pos(),
                        "! operator right expression has wrong type, not boolean",
                    )),
                }
            }
            Expr::FieldRef { name, field, .. } => {
                if let Some(cached) = ctx.get_field_result(name).cloned() {
                    ctx.update_hit();
                    return Ok(cached);
                }
                let result = field.eval(kv, ctx)?;
                ctx.set_field_result(name, result.clone());
                Ok(result)
            }
            Expr::Call { args, result, .. } => {
                if let Some(cached) = result.borrow().clone() {
                    return Ok(cached);
                }
                let f = func::scalar_function_for(self)?;
                func::check_arity(&f, args, self.pos())?;
                (f.body)(kv, args, ctx)
            }
            Expr::Access { left, index, .. } => {
                let lval = left.eval(kv, ctx)?;
                match index.as_ref() {
                    Expr::StringLit { value, .. } => dict_access(&lval, value, left.pos()),
                    Expr::NumberLit { value, .. } => list_access(&lval, *value, left.pos()),
                    _ => Err(KeyqlError::syntax(index.pos(), "Invalid field name")),
                }
            }
            Expr::Binary {
                pos,
                op,
                left,
                right,
            } => eval_binary(*pos, *op, left, right, kv, ctx),
        }
    }
}

pub(crate) fn dict_access(left: &Value, field: &str, left_pos: usize) -> Result<Value> {
    match left {
        Value::Json(map) => match map.get(field) {
            Some(v) => Ok(Value::from(v.clone())),
            None => Ok(Value::Str(String::new())),
        },
        Value::Str(s) if s.is_empty() => Ok(Value::Str(String::new())),
        Value::Bytes(b) if b.is_empty() => Ok(Value::Str(String::new())),
        _ => Err(KeyqlError::execute(
            left_pos,
            "Field access left expression has wrong type, not JSON",
        )),
    }
}

pub(crate) fn list_access(left: &Value, idx: i64, left_pos: usize) -> Result<Value> {
    match left {
        Value::List(items) => {
            if idx >= 0 && (idx as usize) < items.len() {
                Ok(items[idx as usize].clone())
            } else {
                Ok(Value::Str(String::new()))
            }
        }
        Value::Str(s) if s.is_empty() => Ok(Value::Str(String::new())),
        Value::Bytes(b) if b.is_empty() => Ok(Value::Str(String::new())),
        _ => Err(KeyqlError::execute(
            left_pos,
            "Field access left expression has wrong type, not List",
        )),
    }
}

fn eval_binary(
    pos: usize,
    op: Operator,
    left: &Expr,
    right: &Expr,
    kv: &KVPair,
    ctx: &mut ExecuteCtx,
) -> Result<Value> {
    match op {
        Operator::Eq => Ok(Value::Bool(exec_equal(pos, left, right, kv, ctx)?)),
        Operator::NotEq => Ok(Value::Bool(!exec_equal(pos, left, right, kv, ctx)?)),
        Operator::PrefixMatch => {
            let lval = left.eval(kv, ctx)?;
            let rval = right.eval(kv, ctx)?;
            match (lval.as_bytes(), rval.as_bytes()) {
                (Some(l), Some(r)) => Ok(Value::Bool(l.starts_with(r))),
                _ => Err(KeyqlError::execute(
                    pos,
                    "^= operator left or right expression has wrong type",
                )),
            }
        }
        Operator::RegexpMatch => {
            let lval = left.eval(kv, ctx)?;
            let rval = right.eval(kv, ctx)?;
            let (l, r) = match (lval.as_bytes(), rval.as_bytes()) {
                (Some(l), Some(r)) => (l, r),
                _ => {
                    return Err(KeyqlError::execute(
                        pos,
                        "~= operator left or right expression has wrong type",
                    ));
                }
            };
            let re = compile_regex(r, right.pos())?;
            Ok(Value::Bool(re.is_match(l)))
        }
        Operator::And | Operator::Or => {
            let lval = left.eval(kv, ctx)?;
            let lb = lval.as_bool().ok_or_else(|| {
                KeyqlError::execute(
                    left.pos(),
                    "boolean operator left expression has wrong type, not boolean",
                )
            })?;
            // Short circuit.
            if op == Operator::And && !lb {
                return Ok(Value::Bool(false));
            }
            if op == Operator::Or && lb {
                return Ok(Value::Bool(true));
            }
            let rval = right.eval(kv, ctx)?;
            let rb = rval.as_bool().ok_or_else(|| {
                KeyqlError::execute(
                    right.pos(),
                    "boolean operator right expression has wrong type, not boolean",
                )
            })?;
            Ok(Value::Bool(rb))
        }
        Operator::Add => {
            if left.return_type() == ValueType::Str {
                let lval = left.eval(kv, ctx)?;
                let rval = right.eval(kv, ctx)?;
                let mut out = lval.display_string();
                out.push_str(&rval.display_string());
                Ok(Value::Str(out))
            } else {
                let lval = left.eval(kv, ctx)?;
                let rval = right.eval(kv, ctx)?;
                math_op(&lval, &rval, b'+', right.pos())
            }
        }
        Operator::Sub | Operator::Mul | Operator::Div => {
            let lval = left.eval(kv, ctx)?;
            let rval = right.eval(kv, ctx)?;
            let opch = match op {
                Operator::Sub => b'-',
                Operator::Mul => b'*',
                _ => b'/',
            };
            math_op(&lval, &rval, opch, right.pos())
        }
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let cmp = cmp_op_of(op);
            let lval = left.eval(kv, ctx)?;
            let rval = right.eval(kv, ctx)?;
            let ok = if left.return_type() == ValueType::Str {
                string_compare(&lval, &rval, cmp)
            } else {
                number_compare(&lval, &rval, cmp)
            }
            .map_err(|e| position_error(e, pos))?;
            Ok(Value::Bool(ok))
        }
        Operator::In => exec_in(pos, left, right, kv, ctx),
        Operator::Between => exec_between(pos, left, right, kv, ctx),
        Operator::Not => Err(KeyqlError::execute(pos, "Unknown operator !")),
    }
}

pub(crate) fn cmp_op_of(op: Operator) -> CmpOp {
    match op {
        Operator::Gt => CmpOp::Gt,
        Operator::Gte => CmpOp::Gte,
        Operator::Lt => CmpOp::Lt,
        Operator::Lte => CmpOp::Lte,
        _ => CmpOp::Eq,
    }
}

pub(crate) fn position_error(err: KeyqlError, pos: usize) -> KeyqlError {
    match err {
        KeyqlError::Execute {
            message,
            pos: None,
            query,
        } => KeyqlError::Execute {
            message,
            pos: Some(pos),
            query,
        },
        other => other,
    }
}

pub(crate) fn compile_regex(pattern: &[u8], pos: usize) -> Result<Regex> {
    let pat = String::from_utf8_lossy(pattern);
    Regex::new(&pat)
        .map_err(|e| KeyqlError::execute(pos, format!("invalid regular expression: {e}")))
}

fn exec_equal(
    pos: usize,
    left: &Expr,
    right: &Expr,
    kv: &KVPair,
    ctx: &mut ExecuteCtx,
) -> Result<bool> {
    let lval = left.eval(kv, ctx)?;
    let rval = right.eval(kv, ctx)?;
    match &lval {
        Value::Bytes(_) | Value::Str(_) => {
            if let (Some(l), Some(r)) = (lval.as_bytes(), rval.as_bytes()) {
                return Ok(l == r);
            }
        }
        Value::Int(l) => {
            if let Value::Int(r) = &rval {
                return Ok(l == r);
            }
        }
        Value::Bool(l) => {
            if let Value::Bool(r) = &rval {
                return Ok(l == r);
            }
        }
        _ => {}
    }
    Err(KeyqlError::execute(
        pos,
        "= operator left or right expression has wrong type",
    ))
}

fn exec_in(
    pos: usize,
    left: &Expr,
    right: &Expr,
    kv: &KVPair,
    ctx: &mut ExecuteCtx,
) -> Result<Value> {
    let number = left.return_type() != ValueType::Str;
    let lval = left.eval(kv, ctx)?;
    let compare = |candidate: &Value| -> Result<bool> {
        if number {
            number_compare(&lval, candidate, CmpOp::Eq).map_err(|e| position_error(e, pos))
        } else {
            string_compare(&lval, candidate, CmpOp::Eq).map_err(|e| position_error(e, pos))
        }
    };
    match right {
        Expr::List { items, .. } => {
            for item in items {
                let want = if number {
                    ValueType::Number
                } else {
                    ValueType::Str
                };
                if item.return_type() != want {
                    return Err(KeyqlError::execute(
                        item.pos(),
                        "in operator right expression element has wrong type",
                    ));
                }
                let candidate = item.eval(kv, ctx)?;
                if compare(&candidate)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Expr::Call { .. } | Expr::FieldRef { .. } => {
            if right.return_type() != ValueType::List {
                return Err(KeyqlError::execute(
                    right.pos(),
                    "in operator right expression has wrong type, not list",
                ));
            }
            let rval = right.eval(kv, ctx)?;
            let items = rval.as_list().ok_or_else(|| {
                KeyqlError::execute(
                    right.pos(),
                    "in operator right expression has wrong type, not list",
                )
            })?;
            for candidate in items {
                if compare(candidate)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        _ => Err(KeyqlError::execute(
            right.pos(),
            "in operator right expression has wrong type, not list",
        )),
    }
}

fn exec_between(
    pos: usize,
    left: &Expr,
    right: &Expr,
    kv: &KVPair,
    ctx: &mut ExecuteCtx,
) -> Result<Value> {
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
    let lval = left.eval(kv, ctx)?;
    let lower = items[0].eval(kv, ctx)?;
    let upper = items[1].eval(kv, ctx)?;
    between_of(&lval, &lower, &upper, number, pos)
}

/// `lower <= x <= upper`; inverted bounds are a runtime error.
pub(crate) fn between_of(
    x: &Value,
    lower: &Value,
    upper: &Value,
    number: bool,
    pos: usize,
) -> Result<Value> {
    let cmp = |l: &Value, r: &Value, op: CmpOp| -> Result<bool> {
        if number {
            number_compare(l, r, op).map_err(|e| position_error(e, pos))
        } else {
            string_compare(l, r, op).map_err(|e| position_error(e, pos))
        }
    };
    if cmp(lower, upper, CmpOp::Gt)? {
        return Err(KeyqlError::execute(
            pos,
            "between operator lower boundary is greater than upper boundary",
        ));
    }
    if !cmp(lower, x, CmpOp::Lte)? {
        return Ok(Value::Bool(false));
    }
    Ok(Value::Bool(cmp(x, upper, CmpOp::Lte)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_where_expr;

    fn eval_on(query: &str, key: &str, value: &str) -> Result<Value> {
        let expr = parse_where_expr(query).expect("parse");
        let kv = KVPair::new(key, value);
        let mut ctx = ExecuteCtx::disabled();
        expr.eval(&kv, &mut ctx)
    }

    fn eval_bool(query: &str, key: &str, value: &str) -> bool {
        eval_on(query, key, value).unwrap().as_bool().unwrap()
    }

    #[test]
    fn test_comparisons() {
        assert!(eval_bool("key = 'k1'", "k1", "v"));
        assert!(!eval_bool("key = 'k2'", "k1", "v"));
        assert!(eval_bool("key != 'k2'", "k1", "v"));
        assert!(eval_bool("key ^= 'k'", "k1", "v"));
        assert!(eval_bool("value > 'a'", "k", "b"));
        assert!(eval_bool("int(value) > 5", "k", "9"));
        assert!(!eval_bool("int(value) > 5", "k", "3"));
    }

    #[test]
    fn test_boolean_short_circuit() {
        // right side would divide by zero, left is false so it never runs
        assert!(!eval_bool("key = 'zz' & int(value) / int('0') > 1", "k", "1"));
        assert!(eval_bool("key = 'k' | int(value) / int('0') > 1", "k", "1"));
    }

    #[test]
    fn test_regex_match() {
        assert!(eval_bool("value ~= '^ab+c$'", "k", "abbbc"));
        assert!(!eval_bool("value ~= '^ab+c$'", "k", "ac"));
        let err = eval_on("value ~= '('", "k", "x").unwrap_err();
        assert!(err.is_execute());
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval_on("int(value) + 1", "k", "41").unwrap(), Value::Int(42));
        assert_eq!(
            eval_on("float(value) * 2", "k", "1.5").unwrap(),
            Value::Float(3.0)
        );
        let err = eval_on("int(value) / int('0')", "k", "1").unwrap_err();
        assert!(err.to_string().contains("Divide by zero"));
    }

    #[test]
    fn test_string_concat() {
        assert_eq!(
            eval_on("str(key) + '!'", "k1", "v").unwrap(),
            Value::Str("k1!".into())
        );
    }

    #[test]
    fn test_in_list() {
        assert!(eval_bool("key in ('a', 'b', 'k')", "k", "v"));
        assert!(!eval_bool("key in ('a', 'b')", "k", "v"));
        assert!(eval_bool("int(value) in (1, 2, 3)", "k", "2"));
        assert!(eval_bool("value in split('a_b_c', '_')", "k", "b"));
    }

    #[test]
    fn test_between() {
        assert!(eval_bool("key between 'a' and 'c'", "b", "v"));
        assert!(!eval_bool("key between 'a' and 'c'", "d", "v"));
        assert!(eval_bool("key between 'b' and 'b'", "b", "v"));
        let err = eval_on("key between 'z' and 'a'", "b", "v").unwrap_err();
        assert!(err
            .to_string()
            .contains("lower boundary is greater than upper boundary"));
    }

    #[test]
    fn test_not() {
        assert!(eval_bool("!(key = 'a')", "b", "v"));
        assert!(!eval_bool("!(key = 'a')", "a", "v"));
    }

    #[test]
    fn test_field_access_json() {
        assert_eq!(
            eval_on("json(value)['name']", "k", r#"{"name": "amy"}"#).unwrap(),
            Value::Str("amy".into())
        );
        assert_eq!(
            eval_on("json(value)['missing']", "k", r#"{"name": "amy"}"#).unwrap(),
            Value::Str(String::new())
        );
        // nested access
        assert_eq!(
            eval_on("json(value)['a']['b']", "k", r#"{"a": {"b": 7}}"#).unwrap(),
            Value::Int(7)
        );
    }

    #[test]
    fn test_field_access_list() {
        assert_eq!(
            eval_on("split(value, '_')[1]", "k", "a_b_c").unwrap(),
            Value::Str("b".into())
        );
        assert_eq!(
            eval_on("split(value, '_')[9]", "k", "a_b_c").unwrap(),
            Value::Str(String::new())
        );
    }

    #[test]
    fn test_filter_exec() {
        let expr = parse_where_expr("key ^= 'test'").unwrap();
        let filter = FilterExec::new(expr);
        let mut ctx = ExecuteCtx::disabled();
        assert!(filter.filter(&KVPair::new("test1", "x"), &mut ctx).unwrap());
        assert!(!filter.filter(&KVPair::new("other", "x"), &mut ctx).unwrap());
        let flags = filter
            .filter_batch(
                &[KVPair::new("test1", "x"), KVPair::new("nope", "y")],
                &mut ctx,
            )
            .unwrap();
        assert_eq!(flags, vec![true, false]);
    }
}
