//! Final ordering: drain the child into a min-heap keyed by the order
//! fields, then pop in order.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::rc::Rc;

use crate::config;
use crate::error::{KeyqlError, Result};
use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::Value;
use crate::plan::FinalPlan;
use crate::query::ast::{OrderField, SortOrder, ValueType};

struct OrderSpec {
    positions: Vec<usize>,
    types: Vec<ValueType>,
    descending: Vec<bool>,
}

pub struct FinalOrderPlan<'a> {
    pub orders: Vec<OrderField>,
    pub child: Box<dyn FinalPlan + 'a>,
    pub field_names: Vec<String>,
    pub field_types: Vec<ValueType>,
    spec: Option<Rc<OrderSpec>>,
    heap: BinaryHeap<Reverse<OrderedRow>>,
    prepared: bool,
}

impl<'a> FinalOrderPlan<'a> {
    pub fn new(orders: Vec<OrderField>, child: Box<dyn FinalPlan + 'a>) -> Self {
        let field_names = child.field_name_list();
        let field_types = child.field_type_list();
        FinalOrderPlan {
            orders,
            child,
            field_names,
            field_types,
            spec: None,
            heap: BinaryHeap::new(),
            prepared: false,
        }
    }

    fn push_row(&mut self, cols: Vec<Value>) {
        let spec = self.spec.as_ref().expect("order plan not initialized");
        self.heap.push(Reverse(OrderedRow {
            cols,
            spec: spec.clone(),
        }));
    }

    fn prepare(&mut self, ctx: &mut ExecuteCtx) -> Result<()> {
        loop {
            let rows = self.child.batch(ctx)?;
            if rows.is_empty() {
                break;
            }
            for cols in rows {
                self.push_row(cols);
            }
        }
        self.prepared = true;
        Ok(())
    }
}

impl FinalPlan for FinalOrderPlan<'_> {
    fn init(&mut self) -> Result<()> {
        let mut positions = Vec::with_capacity(self.orders.len());
        let mut types = Vec::with_capacity(self.orders.len());
        let mut descending = Vec::with_capacity(self.orders.len());
        for o in &self.orders {
            let idx = self
                .field_names
                .iter()
                .position(|n| n == &o.name)
                .ok_or_else(|| {
                    KeyqlError::syntax(o.field.pos(), format!("Cannot find field: {}", o.name))
                })?;
            positions.push(idx);
            types.push(self.field_types[idx]);
            descending.push(o.order == SortOrder::Desc);
        }
        self.spec = Some(Rc::new(OrderSpec {
            positions,
            types,
            descending,
        }));
        self.heap.clear();
        self.prepared = false;
        self.child.init()
    }

    fn next(&mut self, ctx: &mut ExecuteCtx) -> Result<Option<Vec<Value>>> {
        if !self.prepared {
            self.prepare(ctx)?;
        }
        Ok(self.heap.pop().map(|Reverse(row)| row.cols))
    }

    fn batch(&mut self, ctx: &mut ExecuteCtx) -> Result<Vec<Vec<Value>>> {
        if !self.prepared {
            self.prepare(ctx)?;
        }
        let batch_size = config::plan_batch_size();
        let mut out = Vec::with_capacity(batch_size);
        while out.len() < batch_size {
            match self.heap.pop() {
                Some(Reverse(row)) => out.push(row.cols),
                None => break,
            }
        }
        Ok(out)
    }

    fn explain(&self) -> Vec<String> {
        let fields: Vec<String> = self
            .orders
            .iter()
            .map(|o| {
                let dir = match o.order {
                    SortOrder::Asc => " ASC",
                    SortOrder::Desc => " DESC",
                };
                format!("{}{}", o.name, dir)
            })
            .collect();
        let mut out = vec![format!("OrderPlan{{Fields = <{}>}}", fields.join(", "))];
        out.extend(self.child.explain());
        out
    }

    fn field_name_list(&self) -> Vec<String> {
        self.field_names.clone()
    }

    fn field_type_list(&self) -> Vec<ValueType> {
        self.field_types.clone()
    }
}

struct OrderedRow {
    cols: Vec<Value>,
    spec: Rc<OrderSpec>,
}

impl OrderedRow {
    fn compare(&self, other: &Self) -> Ordering {
        for i in 0..self.spec.positions.len() {
            let idx = self.spec.positions[i];
            let reverse = self.spec.descending[i];
            let ord = compare_typed(self.spec.types[i], &self.cols[idx], &other.cols[idx]);
            let ord = if reverse { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialEq for OrderedRow {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for OrderedRow {}

impl PartialOrd for OrderedRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedRow {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

/// Compare by the field's declared type: STR byte-compare, NUMBER numeric
/// with int/float coercion (strings parse), BOOL as 0/1. Unknown shapes
/// compare equal.
fn compare_typed(tp: ValueType, left: &Value, right: &Value) -> Ordering {
    match tp {
        ValueType::Str => match (left.as_bytes(), right.as_bytes()) {
            (Some(l), Some(r)) => l.cmp(r),
            _ => Ordering::Equal,
        },
        ValueType::Number => compare_number(left, right),
        ValueType::Bool => {
            let as_int = |v: &Value| -> i64 {
                match v {
                    Value::Bool(true) => 1,
                    Value::Bool(false) => 0,
                    Value::Str(s) => (s == "true") as i64,
                    Value::Bytes(b) => (b.as_slice() == b"true") as i64,
                    _ => 0,
                }
            };
            as_int(left).cmp(&as_int(right))
        }
        _ => Ordering::Equal,
    }
}

fn compare_number(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Int(l), Value::Int(r)) => l.cmp(r),
        (Value::Float(l), Value::Float(r)) => l.partial_cmp(r).unwrap_or(Ordering::Equal),
        (Value::Int(l), Value::Float(r)) => {
            (*l as f64).partial_cmp(r).unwrap_or(Ordering::Equal)
        }
        (Value::Float(l), Value::Int(r)) => {
            l.partial_cmp(&(*r as f64)).unwrap_or(Ordering::Equal)
        }
        _ => {
            // Projected strings holding numbers sort numerically.
            let ls = left.display_string();
            let rs = right.display_string();
            if let (Ok(l), Ok(r)) = (ls.parse::<i64>(), rs.parse::<i64>()) {
                return l.cmp(&r);
            }
            if let (Ok(l), Ok(r)) = (ls.parse::<f64>(), rs.parse::<f64>()) {
                return l.partial_cmp(&r).unwrap_or(Ordering::Equal);
            }
            Ordering::Equal
        }
    }
}
