//! Hash aggregation with GROUP BY. Select fields split into key fields
//! (frozen per group from the first row) and function fields (one or more
//! aggregate calls). Groups are emitted in first-insertion order.

use std::collections::HashMap;
use std::rc::Rc;

use crate::config;
use crate::error::{KeyqlError, Result};
use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::{group_key_bytes, Value};
use crate::func::{self, Aggregator};
use crate::kv::KVPair;
use crate::plan::{FinalPlan, Plan};
use crate::query::ast::{Expr, GroupByField, LimitStmt, ResultSlot, ValueType};

const ALL_ROWS_GROUP_KEY: &[u8] = b"*";

/// One aggregate call inside a select field: its argument list plus the
/// shared result slot the completion pass fills before re-evaluating the
/// enclosing expression.
struct AggrCallSite {
    name: String,
    args: Vec<Expr>,
    slot: ResultSlot,
}

struct AggrFieldTemplate {
    is_key: bool,
    expr: Rc<Expr>,
    sites: Vec<AggrCallSite>,
    aggrs: Vec<Box<dyn Aggregator>>,
}

struct AggrRowCol {
    value: Option<Value>,
    aggrs: Vec<Box<dyn Aggregator>>,
}

pub struct AggregatePlan<'a> {
    pub child: Box<dyn Plan + 'a>,
    pub field_names: Vec<String>,
    pub field_types: Vec<ValueType>,
    pub fields: Vec<Rc<Expr>>,
    pub group_by_fields: Vec<GroupByField>,
    pub aggr_all: bool,
    /// Limit pushed below ordering; only set when the query has no ORDER
    /// BY.
    pub limit: Option<LimitStmt>,
    templates: Vec<AggrFieldTemplate>,
    groups: HashMap<Vec<u8>, usize>,
    rows: Vec<Vec<AggrRowCol>>,
    prepared: bool,
    pos: usize,
    skips: usize,
    current: usize,
}

fn list_aggr_calls(expr: &Expr, out: &mut Vec<AggrCallSite>) {
    match expr {
        Expr::Binary { left, right, .. } => {
            list_aggr_calls(left, out);
            list_aggr_calls(right, out);
        }
        Expr::Call { args, result, .. } => {
            if let Some(name) = expr.call_name() {
                if func::is_aggr_function(&name) {
                    out.push(AggrCallSite {
                        name,
                        args: args.clone(),
                        slot: result.clone(),
                    });
                }
            }
        }
        _ => {}
    }
}

impl<'a> AggregatePlan<'a> {
    pub fn new(
        child: Box<dyn Plan + 'a>,
        field_names: Vec<String>,
        field_types: Vec<ValueType>,
        fields: Vec<Rc<Expr>>,
        group_by_fields: Vec<GroupByField>,
        aggr_all: bool,
        limit: Option<LimitStmt>,
    ) -> Self {
        AggregatePlan {
            child,
            field_names,
            field_types,
            fields,
            group_by_fields,
            aggr_all,
            limit,
            templates: Vec::new(),
            groups: HashMap::new(),
            rows: Vec::new(),
            prepared: false,
            pos: 0,
            skips: 0,
            current: 0,
        }
    }

    fn build_templates(&mut self) -> Result<()> {
        self.templates.clear();
        for field in &self.fields {
            let mut sites = Vec::new();
            if matches!(field.as_ref(), Expr::Call { .. } | Expr::Binary { .. }) {
                list_aggr_calls(field, &mut sites);
            }
            let mut aggrs = Vec::with_capacity(sites.len());
            for site in &sites {
                let functor = func::get_aggr_function(&site.name).ok_or_else(|| {
                    KeyqlError::execute(
                        field.pos(),
                        format!("Cannot find aggregate function: {}", site.name),
                    )
                })?;
                if !functor.var_args && functor.num_args != site.args.len() {
                    return Err(KeyqlError::execute(
                        field.pos(),
                        format!(
                            "Function {} require {} arguments but got {}",
                            functor.name,
                            functor.num_args,
                            site.args.len()
                        ),
                    ));
                }
                aggrs.push((functor.make)(&site.args)?);
            }
            self.templates.push(AggrFieldTemplate {
                is_key: sites.is_empty(),
                expr: field.clone(),
                sites,
                aggrs,
            });
        }
        Ok(())
    }

    fn group_key_of(&self, kvp: &KVPair, ctx: &mut ExecuteCtx) -> Result<Vec<u8>> {
        if self.aggr_all {
            return Ok(ALL_ROWS_GROUP_KEY.to_vec());
        }
        let mut key = Vec::new();
        for f in &self.group_by_fields {
            let v = f.expr.eval(kvp, ctx)?;
            let part = group_key_bytes(&v)
                .map_err(|e| crate::exec::eval::position_error(e, f.expr.pos()))?;
            key.extend_from_slice(&part);
        }
        Ok(key)
    }

    fn batch_group_keys(
        &self,
        chunk: &[KVPair],
        ctx: &mut ExecuteCtx,
    ) -> Result<Vec<Vec<u8>>> {
        if self.aggr_all {
            return Ok(vec![ALL_ROWS_GROUP_KEY.to_vec(); chunk.len()]);
        }
        let mut cols = Vec::with_capacity(self.group_by_fields.len());
        for f in &self.group_by_fields {
            cols.push(f.expr.eval_batch(chunk, ctx)?);
        }
        let mut out = Vec::with_capacity(chunk.len());
        for i in 0..chunk.len() {
            let mut key = Vec::new();
            for (j, col) in cols.iter().enumerate() {
                let part = group_key_bytes(&col[i]).map_err(|e| {
                    crate::exec::eval::position_error(e, self.group_by_fields[j].expr.pos())
                })?;
                key.extend_from_slice(&part);
            }
            out.push(key);
        }
        Ok(out)
    }

    fn create_row(&self, kvp: &KVPair, ctx: &mut ExecuteCtx) -> Result<Vec<AggrRowCol>> {
        let mut row = Vec::with_capacity(self.templates.len());
        for tpl in &self.templates {
            let value = if tpl.is_key {
                let v = tpl.expr.eval(kvp, ctx)?;
                let bytes = group_key_bytes(&v)
                    .map_err(|e| crate::exec::eval::position_error(e, tpl.expr.pos()))?;
                Some(Value::Bytes(bytes.into_owned()))
            } else {
                None
            };
            row.push(AggrRowCol {
                value,
                aggrs: tpl.aggrs.iter().map(|a| a.fresh()).collect(),
            });
        }
        Ok(row)
    }

    fn absorb(&mut self, kvp: &KVPair, group_key: Vec<u8>, ctx: &mut ExecuteCtx) -> Result<()> {
        let row_idx = match self.groups.get(&group_key) {
            Some(idx) => *idx,
            None => {
                let row = self.create_row(kvp, ctx)?;
                self.rows.push(row);
                let idx = self.rows.len() - 1;
                self.groups.insert(group_key, idx);
                idx
            }
        };
        let row = &mut self.rows[row_idx];
        for (i, tpl) in self.templates.iter().enumerate() {
            if tpl.is_key {
                continue;
            }
            for (site, aggr) in tpl.sites.iter().zip(row[i].aggrs.iter_mut()) {
                aggr.update(kvp, &site.args, ctx)?;
            }
        }
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut ExecuteCtx) -> Result<()> {
        // Row-mode children run with caching off: nothing clears the field
        // caches between rows here.
        let mut child_ctx = ExecuteCtx::disabled();
        loop {
            let kvp = match self.child.next(&mut child_ctx)? {
                Some(kvp) => kvp,
                None => break,
            };
            let group_key = self.group_key_of(&kvp, ctx)?;
            self.absorb(&kvp, group_key, ctx)?;
        }
        self.prepared = true;
        Ok(())
    }

    fn prepare_batch(&mut self, ctx: &mut ExecuteCtx) -> Result<()> {
        loop {
            let chunk = self.child.batch(ctx)?;
            if chunk.is_empty() {
                break;
            }
            let keys = self.batch_group_keys(&chunk, ctx)?;
            for (kvp, key) in chunk.iter().zip(keys) {
                self.absorb(kvp, key, ctx)?;
            }
        }
        self.prepared = true;
        Ok(())
    }

    /// Emit the next group: complete every aggregator, publish results
    /// into the call sites, and re-evaluate the select expressions so
    /// arithmetic over aggregates works without another plan layer.
    fn emit_next(&mut self, ctx: &mut ExecuteCtx) -> Result<Option<Vec<Value>>> {
        if self.pos >= self.rows.len() {
            return Ok(None);
        }
        let row = &self.rows[self.pos];
        self.pos += 1;
        let blank = KVPair::default();
        let mut out = Vec::with_capacity(self.templates.len());
        for (i, tpl) in self.templates.iter().enumerate() {
            if tpl.is_key {
                out.push(row[i].value.clone().unwrap_or(Value::Null));
                continue;
            }
            for (site, aggr) in tpl.sites.iter().zip(row[i].aggrs.iter()) {
                let val = aggr.complete()?;
                *site.slot.borrow_mut() = Some(val);
            }
            out.push(tpl.expr.eval(&blank, ctx)?);
        }
        Ok(Some(out))
    }

    fn emit_batch(&mut self, ctx: &mut ExecuteCtx) -> Result<Vec<Vec<Value>>> {
        let batch_size = config::plan_batch_size();
        let mut out = Vec::with_capacity(batch_size);
        while out.len() < batch_size {
            match self.emit_next(ctx)? {
                Some(row) => out.push(row),
                None => break,
            }
        }
        Ok(out)
    }
}

impl FinalPlan for AggregatePlan<'_> {
    fn init(&mut self) -> Result<()> {
        self.build_templates()?;
        self.groups.clear();
        self.rows.clear();
        self.prepared = false;
        self.pos = 0;
        self.skips = 0;
        self.current = 0;
        self.child.init()
    }

    fn next(&mut self, ctx: &mut ExecuteCtx) -> Result<Option<Vec<Value>>> {
        if !self.prepared {
            self.prepare(ctx)?;
        }
        let limit = match self.limit {
            Some(l) => l,
            None => return self.emit_next(ctx),
        };
        while self.skips < limit.start {
            if self.emit_next(ctx)?.is_none() {
                return Ok(None);
            }
            self.skips += 1;
        }
        if self.current >= limit.count {
            return Ok(None);
        }
        match self.emit_next(ctx)? {
            Some(row) => {
                self.current += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn batch(&mut self, ctx: &mut ExecuteCtx) -> Result<Vec<Vec<Value>>> {
        if !self.prepared {
            self.prepare_batch(ctx)?;
        }
        let limit = match self.limit {
            Some(l) => l,
            None => return self.emit_batch(ctx),
        };
        while self.skips < limit.start {
            if self.emit_next(ctx)?.is_none() {
                return Ok(Vec::new());
            }
            self.skips += 1;
        }
        let batch_size = config::plan_batch_size();
        let mut out = Vec::with_capacity(batch_size);
        while out.len() < batch_size && self.current < limit.count {
            match self.emit_next(ctx)? {
                Some(row) => {
                    out.push(row);
                    self.current += 1;
                }
                None => break,
            }
        }
        Ok(out)
    }

    fn explain(&self) -> Vec<String> {
        let fields: Vec<String> = self.fields.iter().map(|f| f.to_string()).collect();
        let groups: Vec<String> = if self.aggr_all {
            vec!["*".to_string()]
        } else {
            self.group_by_fields.iter().map(|f| f.name.clone()).collect()
        };
        let head = match self.limit {
            None => format!(
                "AggregatePlan{{Fields = <{}>, GroupBy = <{}>}}",
                fields.join(", "),
                groups.join(", ")
            ),
            Some(l) => format!(
                "AggregatePlan{{Fields = <{}>, GroupBy = <{}>, Start = {}, Count = {}}}",
                fields.join(", "),
                groups.join(", "),
                l.start,
                l.count
            ),
        };
        let mut out = vec![head];
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
