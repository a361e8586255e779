pub mod aggr;
pub mod quantile;
pub mod scalar;
pub mod scalar_vec;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::{KeyqlError, Result};
use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::Value;
use crate::kv::KVPair;
use crate::query::ast::{Expr, ValueType};

pub use aggr::Aggregator;

/// Per-row scalar function body.
pub type ScalarBody =
    Arc<dyn Fn(&KVPair, &[Expr], &mut ExecuteCtx) -> Result<Value> + Send + Sync>;
/// Vectorized scalar function body; returns one value per input row.
pub type ScalarVecBody =
    Arc<dyn Fn(&[KVPair], &[Expr], &mut ExecuteCtx) -> Result<Vec<Value>> + Send + Sync>;
/// Builds a fresh aggregator for one (group, call site).
pub type AggrConstructor = Arc<dyn Fn(&[Expr]) -> Result<Box<dyn Aggregator>> + Send + Sync>;

#[derive(Clone)]
pub struct ScalarFunc {
    pub name: &'static str,
    pub num_args: usize,
    pub var_args: bool,
    pub return_type: ValueType,
    pub body: ScalarBody,
    pub body_vec: Option<ScalarVecBody>,
}

#[derive(Clone)]
pub struct AggrFunc {
    pub name: &'static str,
    pub num_args: usize,
    pub var_args: bool,
    pub return_type: ValueType,
    pub make: AggrConstructor,
}

type ScalarRegistry = RwLock<HashMap<String, Arc<ScalarFunc>>>;
type AggrRegistry = RwLock<HashMap<String, Arc<AggrFunc>>>;

static SCALAR_FUNCS: OnceLock<ScalarRegistry> = OnceLock::new();
static AGGR_FUNCS: OnceLock<AggrRegistry> = OnceLock::new();

fn scalar_registry() -> &'static ScalarRegistry {
    SCALAR_FUNCS.get_or_init(|| RwLock::new(scalar::builtins()))
}

fn aggr_registry() -> &'static AggrRegistry {
    AGGR_FUNCS.get_or_init(|| RwLock::new(aggr::builtins()))
}

pub fn get_scalar_function(name: &str) -> Option<Arc<ScalarFunc>> {
    scalar_registry().read().get(name).cloned()
}

pub fn get_aggr_function(name: &str) -> Option<Arc<AggrFunc>> {
    aggr_registry().read().get(name).cloned()
}

/// Register a user-defined scalar function. Must happen before the query
/// that uses it is parsed; the name is matched case-insensitively.
pub fn register_scalar_function(f: ScalarFunc) {
    scalar_registry()
        .write()
        .insert(f.name.to_ascii_lowercase(), Arc::new(f));
}

/// Register a user-defined aggregate function. Same contract as
/// [`register_scalar_function`].
pub fn register_aggr_function(f: AggrFunc) {
    aggr_registry()
        .write()
        .insert(f.name.to_ascii_lowercase(), Arc::new(f));
}

pub fn is_aggr_function(name: &str) -> bool {
    aggr_registry().read().contains_key(name)
}

pub fn is_aggr_call(expr: &Expr) -> bool {
    expr.call_name().is_some_and(|n| is_aggr_function(&n))
}

pub fn is_scalar_call(expr: &Expr) -> bool {
    expr.call_name()
        .is_some_and(|n| scalar_registry().read().contains_key(&n))
}

/// Declared return type of a function name: scalar registry first, then
/// aggregates, `Unknown` when unregistered.
pub fn function_return_type(name: &str) -> ValueType {
    if let Some(f) = get_scalar_function(name) {
        return f.return_type;
    }
    if let Some(f) = get_aggr_function(name) {
        return f.return_type;
    }
    ValueType::Unknown
}

/// Resolve a call expression against the scalar registry.
pub fn scalar_function_for(expr: &Expr) -> Result<Arc<ScalarFunc>> {
    let fname = expr
        .call_name()
        .ok_or_else(|| KeyqlError::syntax(expr.pos(), "Invalid function name"))?;
    get_scalar_function(&fname)
        .ok_or_else(|| KeyqlError::syntax(expr.pos(), format!("Cannot find function {fname}")))
}

/// Arity check shared by the scalar call paths.
pub fn check_arity(f: &ScalarFunc, args: &[Expr], pos: usize) -> Result<()> {
    if !f.var_args && args.len() != f.num_args {
        return Err(KeyqlError::execute(
            pos,
            format!(
                "Function {} require {} arguments but got {}",
                f.name,
                f.num_args,
                args.len()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_resolve() {
        for name in [
            "lower", "upper", "int", "float", "str", "is_int", "is_float", "substr", "json",
            "split", "join", "list", "int_list", "ilist", "float_list", "flist", "len",
            "cosine_distance", "l2_distance",
        ] {
            assert!(get_scalar_function(name).is_some(), "missing scalar {name}");
        }
        for name in [
            "count",
            "sum",
            "avg",
            "min",
            "max",
            "quantile",
            "json_arrayagg",
            "group_concat",
        ] {
            assert!(get_aggr_function(name).is_some(), "missing aggregate {name}");
        }
    }

    #[test]
    fn test_return_types() {
        assert_eq!(function_return_type("lower"), ValueType::Str);
        assert_eq!(function_return_type("split"), ValueType::List);
        assert_eq!(function_return_type("json"), ValueType::Json);
        assert_eq!(function_return_type("count"), ValueType::Number);
        assert_eq!(function_return_type("no_such_fn"), ValueType::Unknown);
    }

    #[test]
    fn test_user_registration() {
        register_scalar_function(ScalarFunc {
            name: "always_seven",
            num_args: 0,
            var_args: true,
            return_type: ValueType::Number,
            body: Arc::new(|_, _, _| Ok(Value::Int(7))),
            body_vec: None,
        });
        let f = get_scalar_function("always_seven").unwrap();
        let mut ctx = ExecuteCtx::disabled();
        let out = (f.body)(&KVPair::default(), &[], &mut ctx).unwrap();
        assert_eq!(out, Value::Int(7));
    }
}
