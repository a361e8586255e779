pub mod aggregate;
pub mod delete;
pub mod limit;
pub mod order;
pub mod projection;
pub mod put;
pub mod remove;
pub mod scan;

use crate::error::Result;
use crate::exec::ctx::ExecuteCtx;
use crate::exec::value::Value;
use crate::kv::KVPair;
use crate::query::ast::ValueType;

pub use aggregate::AggregatePlan;
pub use delete::DeletePlan;
pub use limit::{FinalLimitPlan, LimitPlan};
pub use order::FinalOrderPlan;
pub use projection::ProjectionPlan;
pub use put::PutPlan;
pub use remove::RemovePlan;
pub use scan::{FullScanPlan, MultiGetPlan, PrefixScanPlan, RangeScanPlan};

/// A pipeline stage producing raw key-value rows. `None` / an empty batch
/// with no error is end of stream. A plan tree is single-use and owned by
/// one query execution.
pub trait Plan {
    fn init(&mut self) -> Result<()>;
    fn next(&mut self, ctx: &mut ExecuteCtx) -> Result<Option<KVPair>>;
    fn batch(&mut self, ctx: &mut ExecuteCtx) -> Result<Vec<KVPair>>;
    fn explain(&self) -> Vec<String>;
}

/// The root-facing stage producing column rows. Row and batch pulls are
/// observationally equivalent; callers may use either.
pub trait FinalPlan {
    fn init(&mut self) -> Result<()>;
    fn next(&mut self, ctx: &mut ExecuteCtx) -> Result<Option<Vec<Value>>>;
    fn batch(&mut self, ctx: &mut ExecuteCtx) -> Result<Vec<Vec<Value>>>;
    fn explain(&self) -> Vec<String>;
    fn field_name_list(&self) -> Vec<String>;
    fn field_type_list(&self) -> Vec<ValueType>;
}

/// Scan whose shape proved unsatisfiable; yields nothing.
pub struct EmptyResultPlan;

impl Plan for EmptyResultPlan {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecuteCtx) -> Result<Option<KVPair>> {
        Ok(None)
    }

    fn batch(&mut self, _ctx: &mut ExecuteCtx) -> Result<Vec<KVPair>> {
        Ok(Vec::new())
    }

    fn explain(&self) -> Vec<String> {
        vec!["EmptyResultPlan".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_plan() {
        let mut plan = EmptyResultPlan;
        let mut ctx = ExecuteCtx::disabled();
        plan.init().unwrap();
        assert!(plan.next(&mut ctx).unwrap().is_none());
        assert!(plan.batch(&mut ctx).unwrap().is_empty());
        assert_eq!(plan.explain(), vec!["EmptyResultPlan"]);
    }
}
