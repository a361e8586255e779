//! PUT: evaluate key/value expressions against a blank pair and write.

use crate::error::Result;
use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::Value;
use crate::kv::{KVPair, Storage};
use crate::plan::FinalPlan;
use crate::query::ast::{PutPair, ValueType};

/// Byte form of an evaluated write operand: string-likes pass through,
/// numbers render textually.
pub(crate) fn write_bytes(v: &Value) -> Vec<u8> {
    match v {
        Value::Bytes(b) => b.clone(),
        Value::Str(s) => s.clone().into_bytes(),
        other => other.display_string().into_bytes(),
    }
}

pub struct PutPlan<'a> {
    pub storage: &'a dyn Storage,
    pub pairs: Vec<PutPair>,
    executed: bool,
}

impl<'a> PutPlan<'a> {
    pub fn new(storage: &'a dyn Storage, pairs: Vec<PutPair>) -> Self {
        PutPlan {
            storage,
            pairs,
            executed: false,
        }
    }

    fn process_pair(&self, pair: &PutPair, ctx: &mut ExecuteCtx) -> Result<KVPair> {
        let mut kvp = KVPair::default();
        let key = pair.key.eval(&kvp, ctx)?;
        kvp.key = write_bytes(&key);
        // The value expression sees the key being written.
        let value = pair.value.eval(&kvp, ctx)?;
        kvp.value = write_bytes(&value);
        Ok(kvp)
    }

    fn execute(&mut self, ctx: &mut ExecuteCtx) -> Result<i64> {
        let mut kvps = Vec::with_capacity(self.pairs.len());
        for pair in &self.pairs {
            kvps.push(self.process_pair(pair, ctx)?);
        }
        match kvps.len() {
            0 => Ok(0),
            1 => {
                self.storage.put(&kvps[0].key, &kvps[0].value)?;
                Ok(1)
            }
            n => {
                self.storage.batch_put(&kvps)?;
                Ok(n as i64)
            }
        }
    }
}

impl FinalPlan for PutPlan<'_> {
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
        let kvps: Vec<String> = self.pairs.iter().map(|p| p.to_string()).collect();
        vec![format!("PutPlan{{KVPairs = [{}]}}", kvps.join(", "))]
    }

    fn field_name_list(&self) -> Vec<String> {
        vec!["Rows".to_string()]
    }

    fn field_type_list(&self) -> Vec<ValueType> {
        vec![ValueType::Number]
    }
}
