//! Builtin aggregate functions. Each aggregator is per-group mutable
//! state; the aggregate plan clones fresh instances from a template, feeds
//! rows through `update`, and reads the result with `complete`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{KeyqlError, Result};
use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::Value;
use crate::kv::KVPair;
use crate::query::ast::{Expr, ValueType};

use super::quantile::QuantileStream;
use super::AggrFunc;

pub trait Aggregator {
    fn update(&mut self, kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<()>;
    fn complete(&self) -> Result<Value>;
    /// A new empty aggregator with the same configuration. This is how the
    /// aggregate plan instantiates per-group state without sharing.
    fn fresh(&self) -> Box<dyn Aggregator>;
}

pub(super) fn builtins() -> HashMap<String, Arc<AggrFunc>> {
    let mut m = HashMap::new();
    let mut add = |name: &'static str,
                   num_args: usize,
                   return_type: ValueType,
                   make: super::AggrConstructor| {
        m.insert(
            name.to_string(),
            Arc::new(AggrFunc {
                name,
                num_args,
                var_args: false,
                return_type,
                make,
            }),
        );
    };

    add("count", 1, ValueType::Number, Arc::new(|_| {
        Ok(Box::new(CountAggr::default()) as Box<dyn Aggregator>)
    }));
    add("sum", 1, ValueType::Number, Arc::new(|_| {
        Ok(Box::new(SumAggr::default()) as Box<dyn Aggregator>)
    }));
    add("avg", 1, ValueType::Number, Arc::new(|_| {
        Ok(Box::new(AvgAggr::default()) as Box<dyn Aggregator>)
    }));
    add("min", 1, ValueType::Number, Arc::new(|_| {
        Ok(Box::new(ExtremeAggr::min()) as Box<dyn Aggregator>)
    }));
    add("max", 1, ValueType::Number, Arc::new(|_| {
        Ok(Box::new(ExtremeAggr::max()) as Box<dyn Aggregator>)
    }));
    add("quantile", 2, ValueType::Number, Arc::new(|args| {
        Ok(Box::new(QuantileAggr::from_args(args)?) as Box<dyn Aggregator>)
    }));
    add("json_arrayagg", 1, ValueType::Str, Arc::new(|_| {
        Ok(Box::new(JsonArrayAggr::default()) as Box<dyn Aggregator>)
    }));
    add("group_concat", 2, ValueType::Str, Arc::new(|args| {
        Ok(Box::new(GroupConcatAggr::from_args(args)?) as Box<dyn Aggregator>)
    }));
    m
}

#[derive(Default)]
struct CountAggr {
    counter: i64,
}

impl Aggregator for CountAggr {
    fn update(&mut self, _kv: &KVPair, _args: &[Expr], _ctx: &mut ExecuteCtx) -> Result<()> {
        self.counter += 1;
        Ok(())
    }

    fn complete(&self) -> Result<Value> {
        Ok(Value::Int(self.counter))
    }

    fn fresh(&self) -> Box<dyn Aggregator> {
        Box::new(CountAggr::default())
    }
}

#[derive(Default)]
struct SumAggr {
    isum: i64,
    fsum: f64,
    is_float: bool,
}

impl Aggregator for SumAggr {
    fn update(&mut self, kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<()> {
        let v = args[0].eval(kv, ctx)?;
        let (ival, fval, is_float) = v.to_number_parts();
        self.isum += ival;
        self.fsum += fval;
        self.is_float |= is_float;
        Ok(())
    }

    fn complete(&self) -> Result<Value> {
        if self.is_float {
            Ok(Value::Float(self.fsum))
        } else {
            Ok(Value::Int(self.isum))
        }
    }

    fn fresh(&self) -> Box<dyn Aggregator> {
        Box::new(SumAggr::default())
    }
}

#[derive(Default)]
struct AvgAggr {
    isum: i64,
    fsum: f64,
    count: i64,
    is_float: bool,
}

impl Aggregator for AvgAggr {
    fn update(&mut self, kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<()> {
        let v = args[0].eval(kv, ctx)?;
        let (ival, fval, is_float) = v.to_number_parts();
        self.isum += ival;
        self.fsum += fval;
        self.is_float |= is_float;
        self.count += 1;
        Ok(())
    }

    fn complete(&self) -> Result<Value> {
        if self.count == 0 {
            return Ok(Value::Float(0.0));
        }
        if self.is_float {
            Ok(Value::Float(self.fsum / self.count as f64))
        } else {
            Ok(Value::Float(self.isum as f64 / self.count as f64))
        }
    }

    fn fresh(&self) -> Box<dyn Aggregator> {
        Box::new(AvgAggr::default())
    }
}

/// min/max share one body; `want_greater` flips the comparison.
struct ExtremeAggr {
    want_greater: bool,
    ival: i64,
    fval: f64,
    is_float: bool,
    seen: bool,
}

impl ExtremeAggr {
    fn min() -> Self {
        ExtremeAggr {
            want_greater: false,
            ival: 0,
            fval: 0.0,
            is_float: false,
            seen: false,
        }
    }

    fn max() -> Self {
        ExtremeAggr {
            want_greater: true,
            ..ExtremeAggr::min()
        }
    }
}

impl Aggregator for ExtremeAggr {
    fn update(&mut self, kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<()> {
        let v = args[0].eval(kv, ctx)?;
        let (ival, fval, is_float) = v.to_number_parts();
        if !self.seen {
            self.seen = true;
            self.ival = ival;
            self.fval = fval;
            self.is_float = is_float;
            return Ok(());
        }
        let replace = if self.is_float {
            if self.want_greater {
                fval > self.fval
            } else {
                fval < self.fval
            }
        } else if self.want_greater {
            ival > self.ival
        } else {
            ival < self.ival
        };
        if replace {
            self.ival = ival;
            self.fval = fval;
            self.is_float = is_float;
        }
        Ok(())
    }

    fn complete(&self) -> Result<Value> {
        if self.is_float {
            Ok(Value::Float(self.fval))
        } else {
            Ok(Value::Int(self.ival))
        }
    }

    fn fresh(&self) -> Box<dyn Aggregator> {
        Box::new(if self.want_greater {
            ExtremeAggr::max()
        } else {
            ExtremeAggr::min()
        })
    }
}

/// Streaming φ-quantile with a 0.0001 rank-error target.
struct QuantileAggr {
    percent: f64,
    stream: QuantileStream,
}

const QUANTILE_EPSILON: f64 = 0.0001;

impl QuantileAggr {
    fn from_args(args: &[Expr]) -> Result<Self> {
        if args.len() != 2 {
            return Err(KeyqlError::execute(
                args.first().map(|a| a.pos()),
                "Function quantile require 2 arguments",
            ));
        }
        if args[1].return_type() != ValueType::Number {
            return Err(KeyqlError::syntax(
                args[1].pos(),
                "quantile function second parameter require number type",
            ));
        }
        let pval = args[1].eval(&KVPair::default(), &mut ExecuteCtx::disabled())?;
        let percent = match pval {
            Value::Float(f) => f,
            _ => {
                return Err(KeyqlError::execute(
                    args[1].pos(),
                    "quantile function second parameter type should be float",
                ));
            }
        };
        if percent > 1.0 {
            return Err(KeyqlError::execute(
                args[1].pos(),
                "quantile function second parameter type should be less than 1",
            ));
        }
        Ok(QuantileAggr {
            percent,
            stream: QuantileStream::targeted(percent, QUANTILE_EPSILON),
        })
    }
}

impl Aggregator for QuantileAggr {
    fn update(&mut self, kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<()> {
        let v = args[0].eval(kv, ctx)?;
        let (_, fval, _) = v.to_number_parts();
        self.stream.insert(fval);
        Ok(())
    }

    fn complete(&self) -> Result<Value> {
        let mut stream = self.stream.clone();
        Ok(Value::Float(stream.query(self.percent)))
    }

    fn fresh(&self) -> Box<dyn Aggregator> {
        Box::new(QuantileAggr {
            percent: self.percent,
            stream: QuantileStream::targeted(self.percent, QUANTILE_EPSILON),
        })
    }
}

#[derive(Default)]
struct JsonArrayAggr {
    items: Vec<serde_json::Value>,
}

impl Aggregator for JsonArrayAggr {
    fn update(&mut self, kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<()> {
        let v = args[0].eval(kv, ctx)?;
        let item = match &v {
            Value::Int(_) | Value::Float(_) | Value::Bool(_) => serde_json::Value::from(&v),
            Value::Bytes(b) => {
                serde_json::Value::String(String::from_utf8_lossy(b).into_owned())
            }
            Value::Str(s) => serde_json::Value::String(s.clone()),
            other => serde_json::Value::String(other.display_string()),
        };
        self.items.push(item);
        Ok(())
    }

    fn complete(&self) -> Result<Value> {
        let rendered = serde_json::to_string(&self.items)
            .map_err(|e| KeyqlError::execute(None, e.to_string()))?;
        Ok(Value::Str(rendered))
    }

    fn fresh(&self) -> Box<dyn Aggregator> {
        Box::new(JsonArrayAggr::default())
    }
}

struct GroupConcatAggr {
    sep: String,
    items: Vec<String>,
}

impl GroupConcatAggr {
    fn from_args(args: &[Expr]) -> Result<Self> {
        if args.len() != 2 {
            return Err(KeyqlError::execute(
                args.first().map(|a| a.pos()),
                "Function group_concat require 2 arguments",
            ));
        }
        if args[1].return_type() != ValueType::Str {
            return Err(KeyqlError::syntax(
                args[1].pos(),
                "group concat second parameter require string type",
            ));
        }
        let sval = args[1].eval(&KVPair::default(), &mut ExecuteCtx::disabled())?;
        Ok(GroupConcatAggr {
            sep: sval.display_string(),
            items: Vec::new(),
        })
    }
}

impl Aggregator for GroupConcatAggr {
    fn update(&mut self, kv: &KVPair, args: &[Expr], ctx: &mut ExecuteCtx) -> Result<()> {
        let v = args[0].eval(kv, ctx)?;
        self.items.push(v.display_string());
        Ok(())
    }

    fn complete(&self) -> Result<Value> {
        Ok(Value::Str(self.items.join(&self.sep)))
    }

    fn fresh(&self) -> Box<dyn Aggregator> {
        Box::new(GroupConcatAggr {
            sep: self.sep.clone(),
            items: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Expr as E;

    fn feed(aggr: &mut dyn Aggregator, values: &[&str]) {
        let args = vec![E::Field {
            pos: 0,
            which: crate::query::ast::FieldKeyword::Value,
        }];
        let mut ctx = ExecuteCtx::disabled();
        for v in values {
            let kv = KVPair::new("k", *v);
            aggr.update(&kv, &args, &mut ctx).unwrap();
        }
    }

    #[test]
    fn test_count() {
        let mut a = CountAggr::default();
        feed(&mut a, &["1", "2", "3"]);
        assert_eq!(a.complete().unwrap(), Value::Int(3));
    }

    #[test]
    fn test_sum_promotes_to_float() {
        let mut a = SumAggr::default();
        feed(&mut a, &["1", "2"]);
        assert_eq!(a.complete().unwrap(), Value::Int(3));
        let mut a = SumAggr::default();
        feed(&mut a, &["1", "2.5"]);
        assert_eq!(a.complete().unwrap(), Value::Float(3.5));
    }

    #[test]
    fn test_avg() {
        let mut a = AvgAggr::default();
        feed(&mut a, &["1", "2", "3", "4"]);
        assert_eq!(a.complete().unwrap(), Value::Float(2.5));
    }

    #[test]
    fn test_min_max() {
        let mut a = ExtremeAggr::min();
        feed(&mut a, &["5", "3", "9"]);
        assert_eq!(a.complete().unwrap(), Value::Int(3));
        let mut a = ExtremeAggr::max();
        feed(&mut a, &["5", "3", "9"]);
        assert_eq!(a.complete().unwrap(), Value::Int(9));
    }

    #[test]
    fn test_fresh_resets_state() {
        let mut a = CountAggr::default();
        feed(&mut a, &["1"]);
        let b = a.fresh();
        assert_eq!(b.complete().unwrap(), Value::Int(0));
    }

    #[test]
    fn test_group_concat() {
        let mut a = GroupConcatAggr {
            sep: ",".into(),
            items: Vec::new(),
        };
        feed(&mut a, &["a", "b"]);
        assert_eq!(a.complete().unwrap(), Value::Str("a,b".into()));
    }

    #[test]
    fn test_json_arrayagg() {
        let mut a = JsonArrayAggr::default();
        feed(&mut a, &["x", "y"]);
        assert_eq!(a.complete().unwrap(), Value::Str(r#"["x","y"]"#.into()));
    }
}
