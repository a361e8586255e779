//! DELETE: drive a scan (optionally limited) to exhaustion and delete the
//! matching keys batch by batch. Partial deletions from earlier batches
//! stay visible if a later batch errors.

use crate::error::Result;
use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::Value;
use crate::kv::Storage;
use crate::plan::{FinalPlan, Plan};
use crate::query::ast::ValueType;

pub struct DeletePlan<'a> {
    pub storage: &'a dyn Storage,
    pub child: Box<dyn Plan + 'a>,
    executed: bool,
}

impl<'a> DeletePlan<'a> {
    pub fn new(storage: &'a dyn Storage, child: Box<dyn Plan + 'a>) -> Self {
        DeletePlan {
            storage,
            child,
            executed: false,
        }
    }

    fn execute(&mut self, ctx: &mut ExecuteCtx) -> Result<i64> {
        let mut count = 0i64;
        loop {
            let rows = self.child.batch(ctx)?;
            if rows.is_empty() {
                return Ok(count);
            }
            let keys: Vec<Vec<u8>> = rows.into_iter().map(|kvp| kvp.key).collect();
            self.storage.batch_delete(&keys)?;
            count += keys.len() as i64;
        }
    }
}

impl FinalPlan for DeletePlan<'_> {
    fn init(&mut self) -> Result<()> {
        self.executed = false;
        self.child.init()
    }

    fn next(&mut self, ctx: &mut ExecuteCtx) -> Result<Option<Vec<Value>>> {
        if self.executed {
            return Ok(None);
        }
        self.executed = true;
        let n = self.execute(ctx)?;
        Ok(Some(vec![Value::Int(n)]))
    }

    fn batch(&mut self, ctx: &mut ExecuteCtx) -> Result<Vec<Vec<Value>>> {
        match self.next(ctx)? {
            Some(row) => Ok(vec![row]),
            None => Ok(Vec::new()),
        }
    }

    fn explain(&self) -> Vec<String> {
        let mut out = vec!["DeletePlan{}".to_string()];
        out.extend(self.child.explain());
        out
    }

    fn field_name_list(&self) -> Vec<String> {
        vec!["Rows".to_string()]
    }

    fn field_type_list(&self) -> Vec<ValueType> {
        vec![ValueType::Number]
    }
}
