pub mod expr;
pub mod filter;

use std::rc::Rc;

use crate::error::{KeyqlError, Result};
use crate::exec::eval::FilterExec;
use crate::kv::Storage;
use crate::plan::{
    AggregatePlan, DeletePlan, EmptyResultPlan, FinalLimitPlan, FinalOrderPlan, FinalPlan,
    LimitPlan, Plan, ProjectionPlan, PutPlan, RemovePlan,
};
use crate::query::ast::{
    DeleteStmt, Expr, FieldKeyword, Operator, SelectStmt, SortOrder, Statement,
};
use crate::query::parser::Parser;

pub use expr::ExpressionOptimizer;
pub use filter::{build_scan_plan, FilterOptimizer, ScanShape};

/// Compiles one query string into an initialized plan tree. The tree
/// borrows the storage handle and is single-use.
pub struct Optimizer {
    pub query: String,
}

impl Optimizer {
    pub fn new(query: &str) -> Self {
        Optimizer {
            query: query.to_string(),
        }
    }

    /// Parse, check, optimize, and assemble the plan tree. Errors carry
    /// positions but not the query text; bind with
    /// [`KeyqlError::bind_query`] for pretty printing.
    pub fn build_plan<'a>(&self, storage: &'a dyn Storage) -> Result<Box<dyn FinalPlan + 'a>> {
        let stmt = Parser::new(&self.query).parse()?;
        tracing::debug!(statement = stmt.name(), "building plan");
        let mut plan: Box<dyn FinalPlan + 'a> = match stmt {
            Statement::Select(mut s) => {
                optimize_select_expressions(&mut s);
                build_select_plan(storage, s)?
            }
            Statement::Put(p) => Box::new(PutPlan::new(storage, p.pairs)),
            Statement::Remove(r) => Box::new(RemovePlan::new(storage, r.keys)),
            Statement::Delete(mut d) => {
                d.where_stmt.expr = ExpressionOptimizer::optimize(d.where_stmt.expr);
                build_delete_plan(storage, d)?
            }
        };
        plan.init()?;
        Ok(plan)
    }
}

fn optimize_select_expressions(stmt: &mut SelectStmt) {
    let where_expr = std::mem::replace(
        &mut stmt.where_stmt.expr,
        Expr::BoolLit { pos: 0, value: true },
    );
    stmt.where_stmt.expr = ExpressionOptimizer::optimize(where_expr);
    for field in stmt.fields.iter_mut() {
        let optimized = ExpressionOptimizer::optimize((**field).clone());
        *field = Rc::new(optimized);
    }
}

fn build_scan<'a>(storage: &'a dyn Storage, where_expr: &Expr) -> (ScanShape, Box<dyn Plan + 'a>) {
    let filter = Rc::new(FilterExec::new(where_expr.clone()));
    let shape = FilterOptimizer::shape_of(where_expr);
    let plan = build_scan_plan(shape.clone(), storage, filter);
    (shape, plan)
}

fn find_aggr_func(expr: &Expr) -> bool {
    match expr {
        Expr::Binary { left, right, .. } => find_aggr_func(left) || find_aggr_func(right),
        Expr::Call { .. } => crate::func::is_aggr_call(expr),
        _ => false,
    }
}

fn build_select_plan<'a>(
    storage: &'a dyn Storage,
    stmt: SelectStmt,
) -> Result<Box<dyn FinalPlan + 'a>> {
    let (_, scan) = build_scan(storage, &stmt.where_stmt.expr);
    build_final_plan(scan, stmt)
}

fn build_final_plan<'a>(
    scan: Box<dyn Plan + 'a>,
    stmt: SelectStmt,
) -> Result<Box<dyn FinalPlan + 'a>> {
    let mut aggr_field_count = 0;
    for field in &stmt.fields {
        if find_aggr_func(field) {
            aggr_field_count += 1;
        }
    }
    let mut has_aggr = aggr_field_count > 0;
    if let Some(gb) = &stmt.group_by {
        if stmt.fields.len() == gb.fields.len() {
            has_aggr = gb
                .fields
                .iter()
                .all(|gf| stmt.field_names.contains(&gf.name));
        }
    }

    if !has_aggr {
        if stmt
            .group_by
            .as_ref()
            .is_some_and(|gb| !gb.fields.is_empty())
        {
            return Err(KeyqlError::syntax(
                stmt.pos,
                "No aggregate fields in select statement",
            ));
        }
        let mut ffp: Box<dyn FinalPlan + 'a> = Box::new(ProjectionPlan {
            child: scan,
            all_fields: stmt.all_fields,
            field_names: stmt.field_names.clone(),
            field_types: stmt.field_types.clone(),
            fields: stmt.fields.clone(),
        });
        if let Some(order) = &stmt.order {
            ffp = build_final_order_plan(ffp, false, order.orders.clone());
        }
        if let Some(limit) = stmt.limit {
            ffp = Box::new(FinalLimitPlan::new(limit.start, limit.count, ffp));
        }
        return Ok(ffp);
    }

    // Push the limit below ordering when there is nothing to order.
    let mut pushed_limit = None;
    let mut build_outer_limit = stmt.limit.is_some();
    if stmt.limit.is_some() && stmt.order.is_none() {
        pushed_limit = stmt.limit;
        build_outer_limit = false;
    }
    let (group_fields, aggr_all) = match &stmt.group_by {
        Some(gb) => (gb.fields.clone(), false),
        None => (Vec::new(), true),
    };
    if aggr_field_count == 0 && !group_fields.is_empty() {
        return Err(KeyqlError::syntax(
            stmt.pos,
            "No aggregate fields in select statement",
        ));
    }
    if aggr_field_count + group_fields.len() < stmt.fields.len() {
        return Err(match &stmt.group_by {
            Some(gb) => {
                KeyqlError::syntax(gb.pos, "Missing aggregate fields in group by statement")
            }
            None => KeyqlError::syntax(None, "Missing group by statement"),
        });
    }

    let mut ffp: Box<dyn FinalPlan + 'a> = Box::new(AggregatePlan::new(
        scan,
        stmt.field_names.clone(),
        stmt.field_types.clone(),
        stmt.fields.clone(),
        group_fields,
        aggr_all,
        pushed_limit,
    ));
    if let Some(order) = &stmt.order {
        ffp = build_final_order_plan(ffp, true, order.orders.clone());
    }
    if build_outer_limit {
        let limit = stmt.limit.expect("limit present");
        ffp = Box::new(FinalLimitPlan::new(limit.start, limit.count, ffp));
    }
    Ok(ffp)
}

fn build_final_order_plan<'a>(
    ffp: Box<dyn FinalPlan + 'a>,
    has_aggr: bool,
    orders: Vec<crate::query::ast::OrderField>,
) -> Box<dyn FinalPlan + 'a> {
    // A single ORDER BY key ASC over a plain projection is already
    // satisfied: every scan emits keys in ascending order.
    if !has_aggr && orders.len() == 1 {
        let o = &orders[0];
        if o.order == SortOrder::Asc {
            if let Expr::Field {
                which: FieldKeyword::Key,
                ..
            } = o.field.as_ref()
            {
                tracing::debug!("order by key asc elided");
                return ffp;
            }
        }
    }
    Box::new(FinalOrderPlan::new(orders, ffp))
}

/// DELETE over a point-get set with no residual conjunction and no limit
/// is rewritten into a REMOVE of those keys, skipping the reads entirely.
fn can_rewrite_delete_to_remove(where_expr: &Expr) -> bool {
    let mut has_and = false;
    where_expr.walk(&mut |e| {
        if let Expr::Binary {
            op: Operator::And, ..
        } = e
        {
            has_and = true;
            return false;
        }
        true
    });
    !has_and
}

fn build_delete_plan<'a>(
    storage: &'a dyn Storage,
    stmt: DeleteStmt,
) -> Result<Box<dyn FinalPlan + 'a>> {
    let (shape, scan) = build_scan(storage, &stmt.where_stmt.expr);

    if matches!(shape, ScanShape::Empty) {
        return Ok(Box::new(DeletePlan::new(
            storage,
            Box::new(EmptyResultPlan),
        )));
    }

    if let ScanShape::MGet(keys) = &shape {
        if stmt.limit.is_none() && can_rewrite_delete_to_remove(&stmt.where_stmt.expr) {
            tracing::debug!(keys = keys.len(), "delete rewritten to remove");
            let key_exprs: Vec<Expr> = keys
                .iter()
                .map(|k| Expr::StringLit {
                    pos: 0,
                    value: String::from_utf8_lossy(k).into_owned(),
                })
                .collect();
            return Ok(Box::new(RemovePlan::new(storage, key_exprs)));
        }
    }

    let child: Box<dyn Plan + 'a> = match stmt.limit {
        Some(limit) => Box::new(LimitPlan::new(limit.start, limit.count, scan)),
        None => scan,
    };
    Ok(Box::new(DeletePlan::new(storage, child)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemStore;

    fn explain(query: &str) -> Vec<String> {
        let store = MemStore::new();
        let opt = Optimizer::new(query);
        let plan = opt.build_plan(&store).unwrap();
        plan.explain()
    }

    #[test]
    fn test_scan_plan_selection() {
        assert!(explain("where key = 'a'")[1].starts_with("MultiGetPlan"));
        assert!(explain("where key ^= 'p'")[1].starts_with("PrefixScanPlan"));
        assert!(explain("where key between 'a' and 'b'")[1].starts_with("RangeScanPlan"));
        assert!(explain("where value = 'x'")[1].starts_with("FullScanPlan"));
        assert!(explain("where key < ''")[1].starts_with("EmptyResultPlan"));
    }

    #[test]
    fn test_folding_feeds_pushdown() {
        // 'test' + '1' folds to 'test1', making a point get possible
        let lines = explain("where key = 'test' + '1'");
        assert!(lines[1].starts_with("MultiGetPlan{Keys = <test1>"), "{lines:?}");
    }

    #[test]
    fn test_order_by_key_asc_elided() {
        let lines = explain("where key ^= 'p' order by key asc");
        assert!(lines.iter().all(|l| !l.starts_with("OrderPlan")), "{lines:?}");
        let lines = explain("where key ^= 'p' order by key desc");
        assert!(lines.iter().any(|l| l.starts_with("OrderPlan")), "{lines:?}");
        let lines = explain("select key, value where key ^= 'p' order by value");
        assert!(lines.iter().any(|l| l.starts_with("OrderPlan")), "{lines:?}");
    }

    #[test]
    fn test_delete_rewrites_to_remove() {
        let lines = explain("delete where key in ('a', 'a1')");
        assert!(lines[0].starts_with("RemovePlan"), "{lines:?}");
        // a conjunction blocks the rewrite
        let lines = explain("delete where key in ('a', 'a1') & value = 'x'");
        assert!(lines[0].starts_with("DeletePlan"), "{lines:?}");
        // a limit blocks the rewrite
        let lines = explain("delete where key in ('a', 'a1') limit 1");
        assert!(lines[0].starts_with("DeletePlan"), "{lines:?}");
        assert!(lines[1].starts_with("LimitPlan"), "{lines:?}");
    }

    #[test]
    fn test_aggregate_plan_required_shapes() {
        let lines = explain("select value, count(1) as c where key ^= 'k' group by value");
        assert!(lines[0].starts_with("AggregatePlan"), "{lines:?}");
        // aggregate with limit and no order pushes the limit down
        let lines = explain("select count(1) as c where key ^= 'k' limit 1");
        assert!(lines[0].contains("Start = 0, Count = 1"), "{lines:?}");
        // missing aggregate with group by is rejected
        let store = MemStore::new();
        let err = match Optimizer::new("select key, value where key ^= 'k' group by key")
            .build_plan(&store)
        {
            Err(e) => e,
            Ok(_) => panic!("expected build_plan to return an error"),
        };
        assert!(err.to_string().contains("aggregate"), "{err}");
    }

    #[test]
    fn test_limit_over_order_stays_outer() {
        let lines = explain("select key, value where key ^= 'k' order by value desc limit 3");
        assert!(lines[0].starts_with("LimitPlan"), "{lines:?}");
        assert!(lines[1].starts_with("OrderPlan"), "{lines:?}");
    }

    #[test]
    fn test_put_and_remove_plans() {
        assert!(explain("put ('k', 'v')")[0].starts_with("PutPlan"));
        assert!(explain("remove 'k'")[0].starts_with("RemovePlan"));
    }
}
