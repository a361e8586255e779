//! Projection: turn filtered key-value rows into column rows.

use std::rc::Rc;

use crate::error::Result;
use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::Value;
use crate::kv::KVPair;
use crate::plan::{FinalPlan, Plan};
use crate::query::ast::{Expr, ValueType};

pub struct ProjectionPlan<'a> {
    pub child: Box<dyn Plan + 'a>,
    pub all_fields: bool,
    pub field_names: Vec<String>,
    pub field_types: Vec<ValueType>,
    pub fields: Vec<Rc<Expr>>,
}

impl ProjectionPlan<'_> {
    fn project_row(&self, kvp: &KVPair, ctx: &mut ExecuteCtx) -> Result<Vec<Value>> {
        let mut row = Vec::with_capacity(self.fields.len());
        for (i, field) in self.fields.iter().enumerate() {
            // An alias evaluated by the WHERE filter is served from the
            // context cache instead of being recomputed.
            let cached = ctx.get_field_result(&self.field_names[i]).cloned();
            let value = match cached {
                Some(v) => {
                    ctx.update_hit();
                    v
                }
                None => field.eval(kvp, ctx)?,
            };
            row.push(value);
        }
        Ok(row)
    }

    fn project_batch(&self, chunk: &[KVPair], ctx: &mut ExecuteCtx) -> Result<Vec<Vec<Value>>> {
        let nfields = self.fields.len();
        let mut cols: Vec<Vec<Value>> = Vec::with_capacity(nfields);
        for (i, field) in self.fields.iter().enumerate() {
            let cached = ctx
                .get_chunk_field_final_result(&self.field_names[i])
                .filter(|c| c.len() == chunk.len())
                .cloned();
            let col = match cached {
                Some(c) => {
                    ctx.update_hit();
                    c
                }
                None => field.eval_batch(chunk, ctx)?,
            };
            cols.push(col);
        }
        let mut rows = Vec::with_capacity(chunk.len());
        for i in 0..chunk.len() {
            rows.push(cols.iter().map(|c| c[i].clone()).collect());
        }
        Ok(rows)
    }
}

impl FinalPlan for ProjectionPlan<'_> {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self, ctx: &mut ExecuteCtx) -> Result<Option<Vec<Value>>> {
        ctx.clear();
        let kvp = match self.child.next(ctx)? {
            Some(kvp) => kvp,
            None => return Ok(None),
        };
        if self.all_fields {
            return Ok(Some(vec![
                Value::Bytes(kvp.key.clone()),
                Value::Bytes(kvp.value.clone()),
            ]));
        }
        self.project_row(&kvp, ctx).map(Some)
    }

    fn batch(&mut self, ctx: &mut ExecuteCtx) -> Result<Vec<Vec<Value>>> {
        ctx.clear();
        let chunk = self.child.batch(ctx)?;
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        if self.all_fields {
            return Ok(chunk
                .into_iter()
                .map(|kvp| vec![Value::Bytes(kvp.key), Value::Bytes(kvp.value)])
                .collect());
        }
        self.project_batch(&chunk, ctx)
    }

    fn explain(&self) -> Vec<String> {
        let fields = if self.all_fields {
            "*".to_string()
        } else {
            self.fields
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut out = vec![format!("ProjectionPlan{{Fields = <{fields}>}}")];
        out.extend(self.child.explain());
        out
    }

    fn field_name_list(&self) -> Vec<String> {
        if self.all_fields {
            return vec!["KEY".to_string(), "VALUE".to_string()];
        }
        self.field_names.clone()
    }

    fn field_type_list(&self) -> Vec<ValueType> {
        if self.all_fields {
            return vec![ValueType::Str, ValueType::Str];
        }
        self.field_types.clone()
    }
}
