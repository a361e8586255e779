//! Builtin scalar functions, per-row bodies.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{KeyqlError, Result};
use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::Value;
use crate::kv::KVPair;
use crate::query::ast::{Expr, ValueType};

use super::{scalar_vec, ScalarFunc};

pub(super) fn builtins() -> HashMap<String, Arc<ScalarFunc>> {
    let mut m = HashMap::new();
    let mut add = |name: &'static str,
                   num_args: usize,
                   var_args: bool,
                   return_type: ValueType,
                   body: super::ScalarBody,
                   body_vec: super::ScalarVecBody| {
        m.insert(
            name.to_string(),
            Arc::new(ScalarFunc {
                name,
                num_args,
                var_args,
                return_type,
                body,
                body_vec: Some(body_vec),
            }),
        );
    };

    add("lower", 1, false, ValueType::Str, Arc::new(func_lower), Arc::new(scalar_vec::func_lower_vec));
    add("upper", 1, false, ValueType::Str, Arc::new(func_upper), Arc::new(scalar_vec::func_upper_vec));
    add("int", 1, false, ValueType::Number, Arc::new(func_int), Arc::new(scalar_vec::func_int_vec));
    add("float", 1, false, ValueType::Number, Arc::new(func_float), Arc::new(scalar_vec::func_float_vec));
    add("str", 1, false, ValueType::Str, Arc::new(func_str), Arc::new(scalar_vec::func_str_vec));
    add("is_int", 1, false, ValueType::Bool, Arc::new(func_is_int), Arc::new(scalar_vec::func_is_int_vec));
    add("is_float", 1, false, ValueType::Bool, Arc::new(func_is_float), Arc::new(scalar_vec::func_is_float_vec));
    add("substr", 3, false, ValueType::Str, Arc::new(func_substr), Arc::new(scalar_vec::func_substr_vec));
    add("json", 1, false, ValueType::Json, Arc::new(func_json), Arc::new(scalar_vec::func_json_vec));
    add("split", 2, false, ValueType::List, Arc::new(func_split), Arc::new(scalar_vec::func_split_vec));
    add("join", 2, true, ValueType::Str, Arc::new(func_join), Arc::new(scalar_vec::func_join_vec));
    add("list", 1, true, ValueType::List, Arc::new(func_list), Arc::new(scalar_vec::func_list_vec));
    add("int_list", 1, true, ValueType::List, Arc::new(func_int_list), Arc::new(scalar_vec::func_int_list_vec));
    add("ilist", 1, true, ValueType::List, Arc::new(func_int_list), Arc::new(scalar_vec::func_int_list_vec));
    add("float_list", 1, true, ValueType::List, Arc::new(func_float_list), Arc::new(scalar_vec::func_float_list_vec));
    add("flist", 1, true, ValueType::List, Arc::new(func_float_list), Arc::new(scalar_vec::func_float_list_vec));
    add("len", 1, false, ValueType::Number, Arc::new(func_len), Arc::new(scalar_vec::func_len_vec));
    add("cosine_distance", 2, false, ValueType::Number, Arc::new(func_cosine_distance), Arc::new(scalar_vec::func_cosine_distance_vec));
    add("l2_distance", 2, false, ValueType::Number, Arc::new(func_l2_distance), Arc::new(scalar_vec::func_l2_distance_vec));
    m
}

fn func_lower(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let arg = args[0].eval(kv, ctx)?;
    Ok(Value::Str(arg.display_string().to_lowercase()))
}

fn func_upper(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let arg = args[0].eval(kv, ctx)?;
    Ok(Value::Str(arg.display_string().to_uppercase()))
}

fn func_int(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let arg = args[0].eval(kv, ctx)?;
    Ok(Value::Int(arg.to_int(0)))
}

fn func_float(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let arg = args[0].eval(kv, ctx)?;
    Ok(Value::Float(arg.to_float(0.0)))
}

fn func_str(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let arg = args[0].eval(kv, ctx)?;
    Ok(Value::Str(arg.display_string()))
}

pub(super) fn is_int_value(v: &Value) -> bool {
    match v {
        Value::Int(_) => true,
        Value::Bytes(_) | Value::Str(_) => v.display_string().parse::<i64>().is_ok(),
        _ => false,
    }
}

pub(super) fn is_float_value(v: &Value) -> bool {
    match v {
        Value::Float(_) => true,
        Value::Bytes(_) | Value::Str(_) => v.display_string().parse::<f64>().is_ok(),
        _ => false,
    }
}

fn func_is_int(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let arg = args[0].eval(kv, ctx)?;
    Ok(Value::Bool(is_int_value(&arg)))
}

fn func_is_float(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let arg = args[0].eval(kv, ctx)?;
    Ok(Value::Bool(is_float_value(&arg)))
}

/// `substr(s, start, end)` slices `s[start..end]` over the string's bytes.
/// Out-of-range positions clamp; an empty or inverted window is empty.
pub(super) fn substr_of(s: &str, start: i64, end: i64) -> String {
    let bytes = s.as_bytes();
    let len = bytes.len() as i64;
    let start = start.clamp(0, len);
    let end = end.clamp(start, len);
    String::from_utf8_lossy(&bytes[start as usize..end as usize]).into_owned()
}

fn func_substr(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let val = args[0].eval(kv, ctx)?.display_string();
    if args[1].return_type() != ValueType::Number {
        return Err(KeyqlError::execute(
            args[1].pos(),
            "substr function second parameter require number type",
        ));
    }
    if args[2].return_type() != ValueType::Number {
        return Err(KeyqlError::execute(
            args[2].pos(),
            "substr function third parameter require number type",
        ));
    }
    let start = args[1].eval(kv, ctx)?.to_int(0);
    let end = args[2].eval(kv, ctx)?.to_int(0);
    Ok(Value::Str(substr_of(&val, start, end)))
}

/// Parse a JSON object literal into a map. Non-object or malformed input
/// yields an empty object, matching the untyped original.
pub(super) fn json_of(data: &[u8]) -> serde_json::Map<String, serde_json::Value> {
    match serde_json::from_slice::<serde_json::Value>(data) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

fn func_json(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let arg = args[0].eval(kv, ctx)?;
    let data = arg.as_bytes().ok_or_else(|| {
        KeyqlError::execute(args[0].pos(), "Cannot convert to byte array")
    })?;
    Ok(Value::Json(json_of(data)))
}

pub(super) fn split_of(val: &str, sep: &str) -> Vec<Value> {
    if sep.is_empty() {
        return val.chars().map(|c| Value::Str(c.to_string())).collect();
    }
    val.split(sep).map(|s| Value::Str(s.to_string())).collect()
}

fn func_split(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let arg = args[0].eval(kv, ctx)?;
    if args[1].return_type() != ValueType::Str {
        return Err(KeyqlError::execute(
            args[1].pos(),
            "split function second parameter require string type",
        ));
    }
    let sep = args[1].eval(kv, ctx)?;
    Ok(Value::List(split_of(
        &arg.display_string(),
        &sep.display_string(),
    )))
}

fn func_join(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    if args[0].return_type() != ValueType::Str {
        return Err(KeyqlError::execute(
            args[0].pos(),
            "join function first parameter require string type",
        ));
    }
    let sep = args[0].eval(kv, ctx)?.display_string();
    let mut parts = Vec::with_capacity(args.len().saturating_sub(1));
    for arg in &args[1..] {
        parts.push(arg.eval(kv, ctx)?.display_string());
    }
    Ok(Value::Str(parts.join(&sep)))
}

pub(super) fn cosine_distance_of(left: &[f64], right: &[f64], pos: usize) -> Result<f64> {
    if left.len() != right.len() {
        return Err(KeyqlError::execute(pos, "length must equals"));
    }
    let (mut dot, mut lsq, mut rsq) = (0.0, 0.0, 0.0);
    for i in 0..left.len() {
        dot += left[i] * right[i];
        lsq += left[i] * left[i];
        rsq += right[i] * right[i];
    }
    Ok(1.0 - dot / (lsq.sqrt() * rsq.sqrt()))
}

pub(super) fn l2_distance_of(left: &[f64], right: &[f64], pos: usize) -> Result<f64> {
    if left.len() != right.len() {
        return Err(KeyqlError::execute(pos, "length must equals"));
    }
    let mut total = 0.0;
    for i in 0..left.len() {
        let diff = left[i] - right[i];
        total += diff * diff;
    }
    Ok(total.sqrt())
}

fn func_cosine_distance(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let lvec = args[0].eval(kv, ctx)?.to_float_vec()?;
    let rvec = args[1].eval(kv, ctx)?.to_float_vec()?;
    Ok(Value::Float(cosine_distance_of(&lvec, &rvec, args[0].pos())?))
}

fn func_l2_distance(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let lvec = args[0].eval(kv, ctx)?.to_float_vec()?;
    let rvec = args[1].eval(kv, ctx)?.to_float_vec()?;
    Ok(Value::Float(l2_distance_of(&lvec, &rvec, args[0].pos())?))
}

fn func_int_list(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let mut items = Vec::with_capacity(args.len());
    for arg in args {
        items.push(Value::Int(arg.eval(kv, ctx)?.to_int(0)));
    }
    Ok(Value::List(items))
}

fn func_float_list(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let mut items = Vec::with_capacity(args.len());
    for arg in args {
        items.push(Value::Float(arg.eval(kv, ctx)?.to_float(0.0)));
    }
    Ok(Value::List(items))
}

/// `list(...)`: integer elements when the first argument looks integral,
/// float elements otherwise.
fn func_list(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    if args.is_empty() {
        return Ok(Value::List(Vec::new()));
    }
    let first = args[0].eval(kv, ctx)?;
    if is_int_value(&first) {
        func_int_list(kv, args, ctx)
    } else {
        func_float_list(kv, args, ctx)
    }
}

fn func_len(kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<Value> {
    let arg = args[0].eval(kv, ctx)?;
    match arg.length() {
        Ok(n) => Ok(Value::Int(n)),
        Err(_) => Err(KeyqlError::execute(args[0].pos(), "invalid type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substr_semantics_locked() {
        assert_eq!(substr_of("hello", 1, 3), "el");
        assert_eq!(substr_of("hello", 0, 99), "hello");
        assert_eq!(substr_of("hello", 9, 12), "");
        // inverted window is empty, never a panic
        assert_eq!(substr_of("hello", 3, 1), "");
        assert_eq!(substr_of("hello", -2, 3), "hel");
    }

    #[test]
    fn test_split_empty_separator_splits_chars() {
        let parts = split_of("abc", "");
        assert_eq!(
            parts,
            vec![
                Value::Str("a".into()),
                Value::Str("b".into()),
                Value::Str("c".into())
            ]
        );
        assert_eq!(split_of("a_b", "_").len(), 2);
    }

    #[test]
    fn test_json_of_tolerates_garbage() {
        assert!(json_of(b"{\"a\": 1}").contains_key("a"));
        assert!(json_of(b"[1,2]").is_empty());
        assert!(json_of(b"not json").is_empty());
    }

    #[test]
    fn test_distances() {
        let d = cosine_distance_of(&[1.0, 0.0], &[1.0, 0.0], 0).unwrap();
        assert!(d.abs() < 1e-9);
        let d = l2_distance_of(&[0.0, 0.0], &[3.0, 4.0], 0).unwrap();
        assert!((d - 5.0).abs() < 1e-9);
        assert!(cosine_distance_of(&[1.0], &[1.0, 2.0], 0).is_err());
    }

    #[test]
    fn test_int_float_predicates() {
        assert!(is_int_value(&Value::Str("42".into())));
        assert!(!is_int_value(&Value::Str("4.2".into())));
        assert!(is_float_value(&Value::Str("4.2".into())));
        assert!(is_float_value(&Value::Str("42".into())));
        assert!(!is_float_value(&Value::Bool(true)));
    }
}
