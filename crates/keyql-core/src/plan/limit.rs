//! Limit plans: the KV-level variant sits under DELETE, the column-level
//! variant caps a final pipeline.

use crate::config;
use crate::error::Result;
use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::Value;
use crate::kv::KVPair;
use crate::plan::{FinalPlan, Plan};
use crate::query::ast::ValueType;

pub struct LimitPlan<'a> {
    pub start: usize,
    pub count: usize,
    pub child: Box<dyn Plan + 'a>,
    current: usize,
    skips: usize,
}

impl<'a> LimitPlan<'a> {
    pub fn new(start: usize, count: usize, child: Box<dyn Plan + 'a>) -> Self {
        LimitPlan {
            start,
            count,
            child,
            current: 0,
            skips: 0,
        }
    }
}

impl Plan for LimitPlan<'_> {
    fn init(&mut self) -> Result<()> {
        self.current = 0;
        self.skips = 0;
        self.child.init()
    }

    fn next(&mut self, ctx: &mut ExecuteCtx) -> Result<Option<KVPair>> {
        while self.skips < self.start {
            if self.child.next(ctx)?.is_none() {
                return Ok(None);
            }
            self.skips += 1;
        }
        if self.current >= self.count {
            return Ok(None);
        }
        match self.child.next(ctx)? {
            Some(kvp) => {
                self.current += 1;
                Ok(Some(kvp))
            }
            None => Ok(None),
        }
    }

    fn batch(&mut self, ctx: &mut ExecuteCtx) -> Result<Vec<KVPair>> {
        let batch_size = config::plan_batch_size();
        let mut pending: Vec<KVPair> = Vec::new();
        while self.skips < self.start {
            let rest = self.start - self.skips;
            let rows = self.child.batch(ctx)?;
            if rows.is_empty() {
                return Ok(Vec::new());
            }
            if rows.len() <= rest {
                self.skips += rows.len();
            } else {
                self.skips += rest;
                pending = rows[rest..].to_vec();
                break;
            }
        }
        let mut out = Vec::with_capacity(batch_size);
        for row in pending {
            if self.current >= self.count {
                break;
            }
            out.push(row);
            self.current += 1;
        }
        if self.current >= self.count {
            return Ok(out);
        }
        loop {
            let rows = self.child.batch(ctx)?;
            if rows.is_empty() {
                break;
            }
            for row in rows {
                out.push(row);
                self.current += 1;
                if self.current >= self.count {
                    return Ok(out);
                }
            }
            if out.len() >= batch_size {
                break;
            }
        }
        Ok(out)
    }

    fn explain(&self) -> Vec<String> {
        let mut out = vec![format!(
            "LimitPlan{{Start = {}, Count = {}}}",
            self.start, self.count
        )];
        out.extend(self.child.explain());
        out
    }
}

pub struct FinalLimitPlan<'a> {
    pub start: usize,
    pub count: usize,
    pub child: Box<dyn FinalPlan + 'a>,
    pub field_names: Vec<String>,
    pub field_types: Vec<ValueType>,
    current: usize,
    skips: usize,
}

impl<'a> FinalLimitPlan<'a> {
    pub fn new(start: usize, count: usize, child: Box<dyn FinalPlan + 'a>) -> Self {
        let field_names = child.field_name_list();
        let field_types = child.field_type_list();
        FinalLimitPlan {
            start,
            count,
            child,
            field_names,
            field_types,
            current: 0,
            skips: 0,
        }
    }
}

impl FinalPlan for FinalLimitPlan<'_> {
    fn init(&mut self) -> Result<()> {
        self.current = 0;
        self.skips = 0;
        self.child.init()
    }

    fn next(&mut self, ctx: &mut ExecuteCtx) -> Result<Option<Vec<Value>>> {
        while self.skips < self.start {
            if self.child.next(ctx)?.is_none() {
                return Ok(None);
            }
            self.skips += 1;
        }
        if self.current >= self.count {
            return Ok(None);
        }
        match self.child.next(ctx)? {
            Some(row) => {
                self.current += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn batch(&mut self, ctx: &mut ExecuteCtx) -> Result<Vec<Vec<Value>>> {
        let batch_size = config::plan_batch_size();
        let mut pending: Vec<Vec<Value>> = Vec::new();
        while self.skips < self.start {
            let rest = self.start - self.skips;
            let rows = self.child.batch(ctx)?;
            if rows.is_empty() {
                return Ok(Vec::new());
            }
            if rows.len() <= rest {
                self.skips += rows.len();
            } else {
                self.skips += rest;
                pending = rows[rest..].to_vec();
                break;
            }
        }
        let mut out = Vec::with_capacity(batch_size);
        for row in pending {
            if self.current >= self.count {
                break;
            }
            out.push(row);
            self.current += 1;
        }
        if self.current >= self.count {
            return Ok(out);
        }
        loop {
            let rows = self.child.batch(ctx)?;
            if rows.is_empty() {
                break;
            }
            for row in rows {
                out.push(row);
                self.current += 1;
                if self.current >= self.count {
                    return Ok(out);
                }
            }
            if out.len() >= batch_size {
                break;
            }
        }
        Ok(out)
    }

    fn explain(&self) -> Vec<String> {
        let mut out = vec![format!(
            "LimitPlan{{Start = {}, Count = {}}}",
            self.start, self.count
        )];
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
