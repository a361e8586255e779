//! Vectorized bodies for the builtin scalar functions. Each returns one
//! result per input row, in order.

use crate::error::{KeyqlError, Result};
use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::Value;
use crate::kv::KVPair;
use crate::query::ast::{Expr, ValueType};

use super::scalar::{
    cosine_distance_of, is_float_value, is_int_value, json_of, l2_distance_of, split_of, substr_of,
};

pub(super) fn func_lower_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    let vals = args[0].eval_batch(chunk, ctx)?;
    Ok(vals
        .into_iter()
        .map(|v| Value::Str(v.display_string().to_lowercase()))
        .collect())
}

pub(super) fn func_upper_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    let vals = args[0].eval_batch(chunk, ctx)?;
    Ok(vals
        .into_iter()
        .map(|v| Value::Str(v.display_string().to_uppercase()))
        .collect())
}

pub(super) fn func_int_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    let vals = args[0].eval_batch(chunk, ctx)?;
    Ok(vals.into_iter().map(|v| Value::Int(v.to_int(0))).collect())
}

pub(super) fn func_float_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    let vals = args[0].eval_batch(chunk, ctx)?;
    Ok(vals
        .into_iter()
        .map(|v| Value::Float(v.to_float(0.0)))
        .collect())
}

pub(super) fn func_str_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    let vals = args[0].eval_batch(chunk, ctx)?;
    Ok(vals
        .into_iter()
        .map(|v| Value::Str(v.display_string()))
        .collect())
}

pub(super) fn func_is_int_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    let vals = args[0].eval_batch(chunk, ctx)?;
    Ok(vals
        .into_iter()
        .map(|v| Value::Bool(is_int_value(&v)))
        .collect())
}

pub(super) fn func_is_float_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    let vals = args[0].eval_batch(chunk, ctx)?;
    Ok(vals
        .into_iter()
        .map(|v| Value::Bool(is_float_value(&v)))
        .collect())
}

pub(super) fn func_substr_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
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
    let vals = args[0].eval_batch(chunk, ctx)?;
    let starts = args[1].eval_batch(chunk, ctx)?;
    let ends = args[2].eval_batch(chunk, ctx)?;
    let mut out = Vec::with_capacity(vals.len());
    for i in 0..vals.len() {
        out.push(Value::Str(substr_of(
            &vals[i].display_string(),
            starts[i].to_int(0),
            ends[i].to_int(0),
        )));
    }
    Ok(out)
}

pub(super) fn func_json_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    let vals = args[0].eval_batch(chunk, ctx)?;
    let mut out = Vec::with_capacity(vals.len());
    for v in &vals {
        let data = v.as_bytes().ok_or_else(|| {
            KeyqlError::execute(args[0].pos(), "Cannot convert to byte array")
        })?;
        out.push(Value::Json(json_of(data)));
    }
    Ok(out)
}

pub(super) fn func_split_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    if args[1].return_type() != ValueType::Str {
        return Err(KeyqlError::execute(
            args[1].pos(),
            "split function second parameter require string type",
        ));
    }
    let vals = args[0].eval_batch(chunk, ctx)?;
    let seps = args[1].eval_batch(chunk, ctx)?;
    let mut out = Vec::with_capacity(vals.len());
    for i in 0..vals.len() {
        out.push(Value::List(split_of(
            &vals[i].display_string(),
            &seps[i].display_string(),
        )));
    }
    Ok(out)
}

pub(super) fn func_join_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    if args[0].return_type() != ValueType::Str {
        return Err(KeyqlError::execute(
            args[0].pos(),
            "join function first parameter require string type",
        ));
    }
    let seps = args[0].eval_batch(chunk, ctx)?;
    let mut cols = Vec::with_capacity(args.len().saturating_sub(1));
    for arg in &args[1..] {
        cols.push(arg.eval_batch(chunk, ctx)?);
    }
    let mut out = Vec::with_capacity(chunk.len());
    for i in 0..chunk.len() {
        let parts: Vec<String> = cols.iter().map(|col| col[i].display_string()).collect();
        out.push(Value::Str(parts.join(&seps[i].display_string())));
    }
    Ok(out)
}

fn collect_list_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
    as_int: bool,
) -> Result<Vec<Value>> {
    let mut cols = Vec::with_capacity(args.len());
    for arg in args {
        cols.push(arg.eval_batch(chunk, ctx)?);
    }
    let mut out = Vec::with_capacity(chunk.len());
    for i in 0..chunk.len() {
        let items: Vec<Value> = cols
            .iter()
            .map(|col| {
                if as_int {
                    Value::Int(col[i].to_int(0))
                } else {
                    Value::Float(col[i].to_float(0.0))
                }
            })
            .collect();
        out.push(Value::List(items));
    }
    Ok(out)
}

pub(super) fn func_int_list_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    collect_list_vec(chunk, args, ctx, true)
}

pub(super) fn func_float_list_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    collect_list_vec(chunk, args, ctx, false)
}

pub(super) fn func_list_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    if args.is_empty() || chunk.is_empty() {
        return Ok(vec![Value::List(Vec::new()); chunk.len()]);
    }
    let first = args[0].eval_batch(chunk, ctx)?;
    collect_list_vec(chunk, args, ctx, is_int_value(&first[0]))
}

pub(super) fn func_len_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    let vals = args[0].eval_batch(chunk, ctx)?;
    let mut out = Vec::with_capacity(vals.len());
    for v in &vals {
        match v.length() {
            Ok(n) => out.push(Value::Int(n)),
            Err(_) => return Err(KeyqlError::execute(args[0].pos(), "invalid type")),
        }
    }
    Ok(out)
}

pub(super) fn func_cosine_distance_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    let lefts = args[0].eval_batch(chunk, ctx)?;
    let rights = args[1].eval_batch(chunk, ctx)?;
    let mut out = Vec::with_capacity(lefts.len());
    for i in 0..lefts.len() {
        let l = lefts[i].to_float_vec()?;
        let r = rights[i].to_float_vec()?;
        out.push(Value::Float(cosine_distance_of(&l, &r, args[0].pos())?));
    }
    Ok(out)
}

pub(super) fn func_l2_distance_vec(
    chunk: &[KVPair],
    args: &[Expr],
    ctx: &mut ExecuteCtx,
) -> Result<Vec<Value>> {
    let lefts = args[0].eval_batch(chunk, ctx)?;
    let rights = args[1].eval_batch(chunk, ctx)?;
    let mut out = Vec::with_capacity(lefts.len());
    for i in 0..lefts.len() {
        let l = lefts[i].to_float_vec()?;
        let r = rights[i].to_float_vec()?;
        out.push(Value::Float(l2_distance_of(&l, &r, args[0].pos())?));
    }
    Ok(out)
}
