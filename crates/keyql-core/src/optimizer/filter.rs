//! Filter pushdown: convert a WHERE expression into the narrowest scan
//! shape that still covers every matching row. Correctness is the hard
//! invariant; whenever a rule cannot prove a narrower shape, it falls
//! back to a full scan and lets the residual filter reject the rest.

use std::rc::Rc;

use crate::exec::eval::FilterExec;
use crate::kv::Storage;
use crate::plan::{
    EmptyResultPlan, FullScanPlan, MultiGetPlan, Plan, PrefixScanPlan, RangeScanPlan,
};
use crate::query::ast::{Expr, FieldKeyword, Operator};

/// The scan lattice: EMPTY < MGET < PREFIX < RANGE < FULL. Lower is
/// narrower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanShape {
    Empty,
    MGet(Vec<Vec<u8>>),
    Prefix(Vec<u8>),
    Range {
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
    },
    Full,
}

impl ScanShape {
    fn rank(&self) -> u8 {
        match self {
            ScanShape::Empty => 1,
            ScanShape::MGet(_) => 2,
            ScanShape::Prefix(_) => 3,
            ScanShape::Range { .. } => 4,
            ScanShape::Full => 5,
        }
    }
}

/// Closed-interval membership with `None` as an open end. `val: None`
/// stands for the infinity named by `is_end`.
fn in_range(
    start: Option<&[u8]>,
    end: Option<&[u8]>,
    val: Option<&[u8]>,
    is_end: bool,
) -> bool {
    match val {
        Some(v) => start.map_or(true, |s| s <= v) && end.map_or(true, |e| e >= v),
        None if is_end => end.is_none(),
        None => start.is_none(),
    }
}

fn as_deref(v: &Option<Vec<u8>>) -> Option<&[u8]> {
    v.as_deref()
}

pub struct FilterOptimizer;

impl FilterOptimizer {
    /// The scan shape for a WHERE root.
    pub fn shape_of(expr: &Expr) -> ScanShape {
        match expr {
            Expr::Binary {
                op, left, right, ..
            } => match op {
                Operator::And => {
                    Self::intersect(Self::shape_of(left), Self::shape_of(right))
                }
                Operator::Or => Self::union(Self::shape_of(left), Self::shape_of(right)),
                Operator::PrefixMatch => match key_and_literal(left, right) {
                    Some(key) => ScanShape::Prefix(key),
                    None => ScanShape::Full,
                },
                Operator::Eq => match key_and_literal(left, right) {
                    Some(key) => ScanShape::MGet(vec![key]),
                    None => ScanShape::Full,
                },
                Operator::Gt | Operator::Gte => match key_and_literal(left, right) {
                    // An empty lower bound admits every key.
                    Some(key) if key.is_empty() => ScanShape::Full,
                    Some(key) => ScanShape::Range {
                        start: Some(key),
                        end: None,
                    },
                    None => ScanShape::Full,
                },
                Operator::Lt | Operator::Lte => match key_and_literal(left, right) {
                    // Nothing sorts below the empty key.
                    Some(key) if key.is_empty() => ScanShape::Empty,
                    Some(key) => ScanShape::Range {
                        start: None,
                        end: Some(key),
                    },
                    None => ScanShape::Full,
                },
                Operator::In => Self::shape_of_in(left, right),
                Operator::Between => Self::shape_of_between(left, right),
                _ => ScanShape::Full,
            },
            Expr::BoolLit { value, .. } => {
                if *value {
                    ScanShape::Full
                } else {
                    ScanShape::Empty
                }
            }
            _ => ScanShape::Full,
        }
    }

    fn shape_of_in(left: &Expr, right: &Expr) -> ScanShape {
        if !is_key_field(left) {
            return ScanShape::Full;
        }
        let items = match right {
            Expr::List { items, .. } => items,
            _ => return ScanShape::Full,
        };
        let mut keys = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Expr::StringLit { value, .. } => keys.push(value.clone().into_bytes()),
                _ => return ScanShape::Full,
            }
        }
        if keys.is_empty() {
            return ScanShape::Full;
        }
        ScanShape::MGet(keys)
    }

    fn shape_of_between(left: &Expr, right: &Expr) -> ScanShape {
        if !is_key_field(left) {
            return ScanShape::Full;
        }
        match right {
            Expr::List { items, .. } if items.len() == 2 => {
                match (&items[0], &items[1]) {
                    (
                        Expr::StringLit { value: lower, .. },
                        Expr::StringLit { value: upper, .. },
                    ) => ScanShape::Range {
                        start: Some(lower.clone().into_bytes()),
                        end: Some(upper.clone().into_bytes()),
                    },
                    _ => ScanShape::Full,
                }
            }
            _ => ScanShape::Full,
        }
    }

    /// AND combination. Same kinds merge directly; mixed kinds specialize
    /// the narrower side.
    fn intersect(l: ScanShape, r: ScanShape) -> ScanShape {
        if l.rank() == r.rank() {
            return match (l, r) {
                (ScanShape::MGet(lk), ScanShape::MGet(rk)) => Self::intersect_mget(lk, rk),
                (ScanShape::Prefix(lp), ScanShape::Prefix(rp)) => {
                    Self::intersect_prefix(lp, rp)
                }
                (
                    ScanShape::Range {
                        start: ls,
                        end: le,
                    },
                    ScanShape::Range {
                        start: rs,
                        end: re,
                    },
                ) => Self::intersect_range(ls, le, rs, re),
                (l, _) => l,
            };
        }
        let (lp, hp) = if l.rank() < r.rank() { (l, r) } else { (r, l) };
        match (lp, hp) {
            (ScanShape::MGet(keys), ScanShape::Prefix(prefix)) => {
                let kept: Vec<Vec<u8>> = keys
                    .into_iter()
                    .filter(|k| k.starts_with(&prefix))
                    .collect();
                if kept.is_empty() {
                    ScanShape::Empty
                } else {
                    ScanShape::MGet(kept)
                }
            }
            (ScanShape::MGet(keys), ScanShape::Range { start, end }) => {
                let kept: Vec<Vec<u8>> = keys
                    .into_iter()
                    .filter(|k| in_range(as_deref(&start), as_deref(&end), Some(k.as_slice()), false))
                    .collect();
                if kept.is_empty() {
                    ScanShape::Empty
                } else {
                    ScanShape::MGet(kept)
                }
            }
            (ScanShape::Prefix(prefix), ScanShape::Range { start, end }) => {
                Self::intersect_prefix_range(prefix, start, end)
            }
            (lp, _) => lp,
        }
    }

    /// OR combination; degrades toward FULL whenever the union has no
    /// exact narrower shape.
    fn union(l: ScanShape, r: ScanShape) -> ScanShape {
        if l.rank() == r.rank() {
            return match (l, r) {
                (ScanShape::MGet(lk), ScanShape::MGet(rk)) => Self::union_mget(lk, rk),
                (ScanShape::Prefix(lp), ScanShape::Prefix(rp)) => Self::union_prefix(lp, rp),
                (
                    ScanShape::Range {
                        start: ls,
                        end: le,
                    },
                    ScanShape::Range {
                        start: rs,
                        end: re,
                    },
                ) => Self::union_range(ls, le, rs, re),
                (l, _) => l,
            };
        }
        let (lp, hp) = if l.rank() < r.rank() { (l, r) } else { (r, l) };
        match (lp, hp) {
            (ScanShape::MGet(keys), ScanShape::Prefix(prefix)) => {
                if keys.iter().all(|k| k.starts_with(&prefix)) {
                    ScanShape::Prefix(prefix)
                } else {
                    ScanShape::Full
                }
            }
            (ScanShape::MGet(keys), ScanShape::Range { start, end }) => {
                Self::union_mget_range(&keys, &start, &end)
            }
            (ScanShape::Prefix(prefix), ScanShape::Range { start, end }) => {
                Self::union_prefix_range(prefix, start, end)
            }
            (_, hp) => hp,
        }
    }

    fn intersect_mget(l: Vec<Vec<u8>>, r: Vec<Vec<u8>>) -> ScanShape {
        let kept: Vec<Vec<u8>> = l.into_iter().filter(|k| r.contains(k)).collect();
        if kept.is_empty() {
            ScanShape::Empty
        } else {
            ScanShape::MGet(kept)
        }
    }

    fn union_mget(mut l: Vec<Vec<u8>>, r: Vec<Vec<u8>>) -> ScanShape {
        for k in r {
            if !l.contains(&k) {
                l.push(k);
            }
        }
        if l.is_empty() {
            ScanShape::Empty
        } else {
            ScanShape::MGet(l)
        }
    }

    fn intersect_prefix(l: Vec<u8>, r: Vec<u8>) -> ScanShape {
        if l == r {
            return ScanShape::Prefix(l);
        }
        // One must extend the other; the longer prefix wins. Disjoint
        // prefixes match nothing.
        if r.starts_with(&l) {
            return ScanShape::Prefix(r);
        }
        if l.starts_with(&r) {
            return ScanShape::Prefix(l);
        }
        ScanShape::Empty
    }

    fn union_prefix(l: Vec<u8>, r: Vec<u8>) -> ScanShape {
        if l == r {
            return ScanShape::Prefix(l);
        }
        if r.starts_with(&l) {
            return ScanShape::Prefix(l);
        }
        if l.starts_with(&r) {
            return ScanShape::Prefix(r);
        }
        ScanShape::Full
    }

    fn normalize_range(
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
    ) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
        let inverted = matches!((&start, &end), (Some(s), Some(e)) if s > e);
        if inverted {
            (end, start)
        } else {
            (start, end)
        }
    }

    fn range_or_point(start: Option<Vec<u8>>, end: Option<Vec<u8>>) -> ScanShape {
        if start.is_none() && end.is_none() {
            return ScanShape::Full;
        }
        if let (Some(s), Some(e)) = (&start, &end) {
            if s == e {
                return ScanShape::MGet(vec![s.clone()]);
            }
        }
        ScanShape::Range { start, end }
    }

    fn intersect_range(
        ls: Option<Vec<u8>>,
        le: Option<Vec<u8>>,
        rs: Option<Vec<u8>>,
        re: Option<Vec<u8>>,
    ) -> ScanShape {
        let (ls, le) = Self::normalize_range(ls, le);
        let (rs, re) = Self::normalize_range(rs, re);
        if ls == rs && le == re {
            return Self::range_or_point(ls, le);
        }
        if ls.is_none() && rs.is_none() && le.is_none() && re.is_none() {
            return ScanShape::Full;
        }
        let (lsd, led) = (as_deref(&ls), as_deref(&le));
        let (rsd, red) = (as_deref(&rs), as_deref(&re));
        let rs_inside = in_range(lsd, led, rsd, false);
        let re_inside = in_range(lsd, led, red, true);
        let ls_inside = in_range(rsd, red, lsd, false);
        let le_inside = in_range(rsd, red, led, true);
        if rs_inside && !re_inside {
            // | LS | RS | LE | RE |
            Self::range_or_point(rs, le)
        } else if ls_inside && !le_inside {
            // | RS | LS | RE | LE |
            Self::range_or_point(ls, re)
        } else if rs_inside && re_inside {
            // | LS | RS | RE | LE |
            Self::range_or_point(rs, re)
        } else if ls_inside && le_inside {
            // | RS | LS | LE | RE |
            Self::range_or_point(ls, le)
        } else {
            // Disjoint intervals.
            ScanShape::Empty
        }
    }

    fn union_range(
        ls: Option<Vec<u8>>,
        le: Option<Vec<u8>>,
        rs: Option<Vec<u8>>,
        re: Option<Vec<u8>>,
    ) -> ScanShape {
        let (ls, le) = Self::normalize_range(ls, le);
        let (rs, re) = Self::normalize_range(rs, re);
        if ls == rs && le == re {
            return Self::range_or_point(ls, le);
        }
        if ls.is_none() && rs.is_none() && le.is_none() && re.is_none() {
            return ScanShape::Full;
        }
        let (lsd, led) = (as_deref(&ls), as_deref(&le));
        let (rsd, red) = (as_deref(&rs), as_deref(&re));
        let rs_inside = in_range(lsd, led, rsd, false);
        let re_inside = in_range(lsd, led, red, true);
        let ls_inside = in_range(rsd, red, lsd, false);
        let le_inside = in_range(rsd, red, led, true);
        if rs_inside && !re_inside {
            // | LS | RS | LE | RE |
            Self::range_or_point(ls, re)
        } else if ls_inside && !le_inside {
            // | RS | LS | RE | LE |
            Self::range_or_point(rs, le)
        } else if rs_inside && re_inside {
            // | LS | RS | RE | LE |
            Self::range_or_point(ls, le)
        } else if ls_inside && le_inside {
            // | RS | LS | LE | RE |
            Self::range_or_point(rs, re)
        } else if in_range(lsd, rsd, led, true) {
            // | LS | LE | RS | RE | overlapping-adjacent hull
            Self::range_or_point(ls, re)
        } else if in_range(rsd, lsd, red, true) {
            // | RS | RE | LS | LE |
            Self::range_or_point(rs, le)
        } else {
            ScanShape::Full
        }
    }

    fn intersect_prefix_range(
        prefix: Vec<u8>,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
    ) -> ScanShape {
        let prefix_in_range = in_range(as_deref(&start), as_deref(&end), Some(prefix.as_slice()), false);
        if prefix_in_range {
            // Prefix begins inside the range.
            let end_in_prefix_region = end.as_ref().is_some_and(|e| e.starts_with(&prefix));
            if end_in_prefix_region {
                if end.as_deref() == Some(prefix.as_slice()) {
                    ScanShape::MGet(vec![prefix])
                } else {
                    ScanShape::Range {
                        start: Some(prefix),
                        end,
                    }
                }
            } else {
                ScanShape::Prefix(prefix)
            }
        } else {
            if start.as_ref().is_some_and(|s| s.starts_with(&prefix)) {
                // Range begins inside the prefix region.
                return ScanShape::Range { start, end };
            }
            if end.as_ref().is_some_and(|e| e.as_slice() < prefix.as_slice()) {
                return ScanShape::Empty;
            }
            if start
                .as_ref()
                .is_some_and(|s| prefix.as_slice() < s.as_slice())
            {
                return ScanShape::Empty;
            }
            ScanShape::Full
        }
    }

    fn union_mget_range(
        keys: &[Vec<u8>],
        start: &Option<Vec<u8>>,
        end: &Option<Vec<u8>>,
    ) -> ScanShape {
        let sd = as_deref(start);
        let ed = as_deref(end);
        let any_outside = keys.iter().any(|k| !in_range(sd, ed, Some(k.as_slice()), false));
        if !any_outside {
            return ScanShape::Range {
                start: start.clone(),
                end: end.clone(),
            };
        }
        // A single stray key widens the range to reach it; anything more
        // degrades to a full scan.
        if keys.len() == 1 {
            let key = &keys[0];
            if let Some(s) = sd {
                if key.as_slice() < s {
                    return ScanShape::Range {
                        start: Some(key.clone()),
                        end: end.clone(),
                    };
                }
            }
            if let Some(e) = ed {
                if e < key.as_slice() {
                    return ScanShape::Range {
                        start: start.clone(),
                        end: Some(key.clone()),
                    };
                }
            }
        }
        ScanShape::Full
    }

    fn union_prefix_range(
        prefix: Vec<u8>,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
    ) -> ScanShape {
        let prefix_in_range = in_range(as_deref(&start), as_deref(&end), Some(prefix.as_slice()), false);
        if prefix_in_range {
            if end.as_ref().is_some_and(|e| e.starts_with(&prefix)) {
                // The prefix region extends past the range end.
                ScanShape::Range { start, end: None }
            } else {
                ScanShape::Range { start, end }
            }
        } else {
            let prefix_before_start = start
                .as_ref()
                .is_some_and(|s| prefix.as_slice() < s.as_slice() && !s.starts_with(&prefix));
            if prefix_before_start {
                return if end.as_deref() == Some(prefix.as_slice()) {
                    ScanShape::MGet(vec![prefix])
                } else {
                    ScanShape::Range {
                        start: Some(prefix),
                        end,
                    }
                };
            }
            let start_in_region = start.as_ref().is_some_and(|s| s.starts_with(&prefix));
            let end_in_region = end.as_ref().is_some_and(|e| e.starts_with(&prefix));
            if start_in_region && end.is_some() && !end_in_region {
                return if end.as_deref() == Some(prefix.as_slice()) {
                    ScanShape::MGet(vec![prefix])
                } else {
                    ScanShape::Range {
                        start: Some(prefix),
                        end,
                    }
                };
            }
            if start_in_region && end_in_region {
                return ScanShape::Prefix(prefix);
            }
            if end.as_ref().is_some_and(|e| e.as_slice() < prefix.as_slice()) {
                return ScanShape::Range { start, end: None };
            }
            ScanShape::Full
        }
    }
}

fn is_key_field(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Field {
            which: FieldKeyword::Key,
            ..
        }
    )
}

/// For `key OP literal` / `literal OP key`, the literal's bytes.
fn key_and_literal(left: &Expr, right: &Expr) -> Option<Vec<u8>> {
    let mut field_is_key = false;
    let mut key: Option<Vec<u8>> = None;
    for side in [left, right] {
        match side {
            Expr::Field { which, .. } => {
                field_is_key = *which == FieldKeyword::Key;
            }
            Expr::StringLit { value, .. } => {
                key = Some(value.clone().into_bytes());
            }
            _ => {}
        }
    }
    if field_is_key {
        key
    } else {
        None
    }
}

/// Build the scan plan for a resolved shape.
pub fn build_scan_plan<'a>(
    shape: ScanShape,
    storage: &'a dyn Storage,
    filter: Rc<FilterExec>,
) -> Box<dyn Plan + 'a> {
    tracing::debug!(shape = ?shape, "scan shape selected");
    match shape {
        ScanShape::Empty => Box::new(EmptyResultPlan),
        ScanShape::MGet(keys) => Box::new(MultiGetPlan::new(storage, filter, keys)),
        ScanShape::Prefix(prefix) => Box::new(PrefixScanPlan::new(storage, filter, prefix)),
        ScanShape::Range { start, end } => {
            Box::new(RangeScanPlan::new(storage, filter, start, end))
        }
        ScanShape::Full => Box::new(FullScanPlan::new(storage, filter)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::Parser;

    // Shape derivation is purely structural; parse without the statement
    // checks so boolean literal operands (as produced by constant folding)
    // can be exercised directly.
    fn shape(query: &str) -> ScanShape {
        let expr = Parser::new(query).parse_expr().unwrap();
        FilterOptimizer::shape_of(&expr)
    }

    fn mget(keys: &[&str]) -> ScanShape {
        ScanShape::MGet(keys.iter().map(|k| k.as_bytes().to_vec()).collect())
    }

    fn range(start: Option<&str>, end: Option<&str>) -> ScanShape {
        ScanShape::Range {
            start: start.map(|s| s.as_bytes().to_vec()),
            end: end.map(|s| s.as_bytes().to_vec()),
        }
    }

    #[test]
    fn test_leaf_shapes() {
        assert_eq!(shape("true"), ScanShape::Full);
        assert_eq!(shape("false"), ScanShape::Empty);
        assert_eq!(shape("key = 'x'"), mget(&["x"]));
        assert_eq!(shape("'x' = key"), mget(&["x"]));
        assert_eq!(shape("value = 'x'"), ScanShape::Full);
        assert_eq!(shape("key ^= 'p'"), ScanShape::Prefix(b"p".to_vec()));
        assert_eq!(shape("key > 'v'"), range(Some("v"), None));
        assert_eq!(shape("key >= ''"), ScanShape::Full);
        assert_eq!(shape("key < 'v'"), range(None, Some("v")));
        assert_eq!(shape("key <= ''"), ScanShape::Empty);
        assert_eq!(shape("key in ('a', 'b')"), mget(&["a", "b"]));
        assert_eq!(shape("key between 'a' and 'b'"), range(Some("a"), Some("b")));
        assert_eq!(shape("!(key = 'x')"), ScanShape::Full);
        assert_eq!(shape("value ~= 'x'"), ScanShape::Full);
    }

    #[test]
    fn test_mget_combinations() {
        assert_eq!(
            shape("key in ('a', 'b') & key in ('b', 'c')"),
            mget(&["b"])
        );
        assert_eq!(shape("key = 'a' & key = 'b'"), ScanShape::Empty);
        let got = shape("key in ('a', 'b') | key in ('b', 'c')");
        match got {
            ScanShape::MGet(mut keys) => {
                keys.sort();
                assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
            }
            other => panic!("expected mget, got {other:?}"),
        }
    }

    #[test]
    fn test_prefix_combinations() {
        assert_eq!(
            shape("key ^= 'ab' & key ^= 'abc'"),
            ScanShape::Prefix(b"abc".to_vec())
        );
        assert_eq!(shape("key ^= 'ab' & key ^= 'cd'"), ScanShape::Empty);
        assert_eq!(
            shape("key ^= 'ab' | key ^= 'abc'"),
            ScanShape::Prefix(b"ab".to_vec())
        );
        assert_eq!(shape("key ^= 'ab' | key ^= 'cd'"), ScanShape::Full);
    }

    #[test]
    fn test_range_combinations() {
        assert_eq!(
            shape("key between 'a' and 'm' & key between 'g' and 'z'"),
            range(Some("g"), Some("m"))
        );
        assert_eq!(
            shape("key between 'a' and 'g' | key between 'c' and 'z'"),
            range(Some("a"), Some("z"))
        );
        assert_eq!(
            shape("key between 'a' and 'c' & key between 'x' and 'z'"),
            ScanShape::Empty
        );
        // single-point intersection collapses to a point get
        assert_eq!(
            shape("key between 'a' and 'g' & key between 'g' and 'z'"),
            mget(&["g"])
        );
        // open ends
        assert_eq!(
            shape("key > 'c' & key < 'x'"),
            range(Some("c"), Some("x"))
        );
        assert_eq!(shape("key > 'c' & key > 'f'"), range(Some("f"), None));
        assert_eq!(shape("key < 'c' | key < 'f'"), range(None, Some("f")));
    }

    #[test]
    fn test_mixed_mget_prefix() {
        assert_eq!(shape("key in ('ab1', 'zz') & key ^= 'ab'"), mget(&["ab1"]));
        assert_eq!(shape("key in ('zz') & key ^= 'ab'"), ScanShape::Empty);
        assert_eq!(
            shape("key in ('ab1', 'ab2') | key ^= 'ab'"),
            ScanShape::Prefix(b"ab".to_vec())
        );
        assert_eq!(shape("key in ('ab1', 'zz') | key ^= 'ab'"), ScanShape::Full);
    }

    #[test]
    fn test_mixed_mget_range() {
        assert_eq!(
            shape("key in ('b', 'c', 'z') & key between 'a' and 'd'"),
            mget(&["b", "c"])
        );
        assert_eq!(
            shape("key in ('x') & key between 'a' and 'd'"),
            ScanShape::Empty
        );
        assert_eq!(
            shape("key in ('b', 'c') | key between 'a' and 'd'"),
            range(Some("a"), Some("d"))
        );
        // one stray key widens the range toward it
        assert_eq!(
            shape("key = 'z' | key between 'a' and 'd'"),
            range(Some("a"), Some("z"))
        );
        assert_eq!(
            shape("key = 'A' | key between 'a' and 'd'"),
            range(Some("A"), Some("d"))
        );
        // several strays degrade to a full scan
        assert_eq!(
            shape("key in ('x', 'z') | key between 'a' and 'd'"),
            ScanShape::Full
        );
    }

    #[test]
    fn test_mixed_prefix_range() {
        // prefix inside the range, range end outside the prefix region
        assert_eq!(
            shape("key ^= 'b' & key between 'a' and 'c'"),
            ScanShape::Prefix(b"b".to_vec())
        );
        // range entirely below the prefix region
        assert_eq!(
            shape("key ^= 'x' & key between 'a' and 'c'"),
            ScanShape::Empty
        );
        // range starts inside the prefix region
        assert_eq!(
            shape("key ^= 'b' & key between 'b1' and 'c'"),
            range(Some("b1"), Some("c"))
        );
        // union keeps the hull
        assert_eq!(
            shape("key ^= 'b' | key between 'a' and 'c'"),
            range(Some("a"), Some("c"))
        );
    }

    #[test]
    fn test_full_and_narrow() {
        assert_eq!(shape("key = 'a' & value = 'x'"), mget(&["a"]));
        assert_eq!(shape("key = 'a' | value = 'x'"), ScanShape::Full);
        assert_eq!(shape("key ^= 'p' & value ~= 'z'"), ScanShape::Prefix(b"p".to_vec()));
        // word operators push down exactly like their symbol forms
        assert_eq!(shape("key = 'a' and value = 'x'"), mget(&["a"]));
        assert_eq!(shape("key = 'a' or value = 'x'"), ScanShape::Full);
    }

    #[test]
    fn test_empty_absorbs_and_dominates() {
        assert_eq!(shape("false & key = 'a'"), ScanShape::Empty);
        assert_eq!(shape("false | key = 'a'"), mget(&["a"]));
        assert_eq!(shape("true | key = 'a'"), ScanShape::Full);
        assert_eq!(shape("true & key = 'a'"), mget(&["a"]));
    }
}
