//! REMOVE: delete an explicit list of evaluated keys.

use crate::error::Result;
use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::Value;
use crate::kv::{KVPair, Storage};
use crate::plan::put::write_bytes;
use crate::plan::FinalPlan;
use crate::query::ast::{Expr, ValueType};

pub struct RemovePlan<'a> {
    pub storage: &'a dyn Storage,
    pub keys: Vec<Expr>,
    executed: bool,
}

impl<'a> RemovePlan<'a> {
    pub fn new(storage: &'a dyn Storage, keys: Vec<Expr>) -> Self {
        RemovePlan {
            storage,
            keys,
            executed: false,
        }
    }

    fn execute(&mut self, ctx: &mut ExecuteCtx) -> Result<i64> {
        let blank = KVPair::default();
        let mut keys = Vec::with_capacity(self.keys.len());
        for kexpr in &self.keys {
            let key = kexpr.eval(&blank, ctx)?;
            keys.push(write_bytes(&key));
        }
        match keys.len() {
            0 => Ok(0),
            1 => {
                self.storage.delete(&keys[0])?;
                Ok(1)
            }
            n => {
                self.storage.batch_delete(&keys)?;
                Ok(n as i64)
            }
        }
    }
}

impl FinalPlan for RemovePlan<'_> {
    fn init(&mut self) -> Result<()> {
        self.executed = false;
        Ok(())
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
        let keys: Vec<String> = self.keys.iter().map(|k| k.to_string()).collect();
        vec![format!("RemovePlan{{Keys = [{}]}}", keys.join(", "))]
    }

    fn field_name_list(&self) -> Vec<String> {
        vec!["Rows".to_string()]
    }

    fn field_type_list(&self) -> Vec<ValueType> {
        vec![ValueType::Number]
    }
}
