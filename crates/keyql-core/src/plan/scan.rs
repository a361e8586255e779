//! Scan plans: the leaves of every read pipeline. Each drives the store
//! cursor (or point gets) and applies the residual filter, in row or
//! batch mode.

use std::rc::Rc;

use crate::config;
use crate::error::Result;
use crate::exec::ctx::ExecuteCtx;
use crate::exec::eval::FilterExec;
use crate::kv::{Cursor, KVPair, Storage};
use crate::plan::Plan;

fn display_bound(bound: &Option<Vec<u8>>) -> String {
    match bound {
        Some(b) => String::from_utf8_lossy(b).into_owned(),
        None => "<nil>".to_string(),
    }
}

pub struct FullScanPlan<'a> {
    storage: &'a dyn Storage,
    filter: Rc<FilterExec>,
    cursor: Option<Box<dyn Cursor + 'a>>,
}

impl<'a> FullScanPlan<'a> {
    pub fn new(storage: &'a dyn Storage, filter: Rc<FilterExec>) -> Self {
        FullScanPlan {
            storage,
            filter,
            cursor: None,
        }
    }
}

impl Plan for FullScanPlan<'_> {
    fn init(&mut self) -> Result<()> {
        let mut cursor = self.storage.cursor()?;
        cursor.seek(b"")?;
        self.cursor = Some(cursor);
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecuteCtx) -> Result<Option<KVPair>> {
        let cursor = self.cursor.as_mut().expect("scan not initialized");
        while let Some(kvp) = cursor.next()? {
            // Cached field results belong to one candidate row only.
            ctx.clear();
            if self.filter.filter(&kvp, ctx)? {
                return Ok(Some(kvp));
            }
        }
        Ok(None)
    }

    fn batch(&mut self, ctx: &mut ExecuteCtx) -> Result<Vec<KVPair>> {
        scan_batch(ctx, &self.filter, |_| {
            self.cursor.as_mut().expect("scan not initialized").next()
        })
    }

    fn explain(&self) -> Vec<String> {
        vec![format!("FullScanPlan{{Filter = '{}'}}", self.filter.explain())]
    }
}

pub struct PrefixScanPlan<'a> {
    storage: &'a dyn Storage,
    filter: Rc<FilterExec>,
    prefix: Vec<u8>,
    cursor: Option<Box<dyn Cursor + 'a>>,
}

impl<'a> PrefixScanPlan<'a> {
    pub fn new(storage: &'a dyn Storage, filter: Rc<FilterExec>, prefix: Vec<u8>) -> Self {
        PrefixScanPlan {
            storage,
            filter,
            prefix,
            cursor: None,
        }
    }
}

impl Plan for PrefixScanPlan<'_> {
    fn init(&mut self) -> Result<()> {
        let mut cursor = self.storage.cursor()?;
        cursor.seek(&self.prefix)?;
        self.cursor = Some(cursor);
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecuteCtx) -> Result<Option<KVPair>> {
        let cursor = self.cursor.as_mut().expect("scan not initialized");
        while let Some(kvp) = cursor.next()? {
            if !kvp.key.starts_with(&self.prefix) {
                break;
            }
            ctx.clear();
            if self.filter.filter(&kvp, ctx)? {
                return Ok(Some(kvp));
            }
        }
        Ok(None)
    }

    fn batch(&mut self, ctx: &mut ExecuteCtx) -> Result<Vec<KVPair>> {
        let prefix = self.prefix.clone();
        let cursor = self.cursor.as_mut().expect("scan not initialized");
        scan_batch(ctx, &self.filter, move |_| match cursor.next()? {
            Some(kvp) if kvp.key.starts_with(&prefix) => Ok(Some(kvp)),
            _ => Ok(None),
        })
    }

    fn explain(&self) -> Vec<String> {
        vec![format!(
            "PrefixScanPlan{{Prefix = '{}', Filter = '{}'}}",
            String::from_utf8_lossy(&self.prefix),
            self.filter.explain()
        )]
    }
}

/// Inclusive range scan; either bound may be open.
pub struct RangeScanPlan<'a> {
    storage: &'a dyn Storage,
    filter: Rc<FilterExec>,
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    cursor: Option<Box<dyn Cursor + 'a>>,
}

impl<'a> RangeScanPlan<'a> {
    pub fn new(
        storage: &'a dyn Storage,
        filter: Rc<FilterExec>,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
    ) -> Self {
        RangeScanPlan {
            storage,
            filter,
            start,
            end,
            cursor: None,
        }
    }
}

impl Plan for RangeScanPlan<'_> {
    fn init(&mut self) -> Result<()> {
        let mut cursor = self.storage.cursor()?;
        match &self.start {
            Some(start) => cursor.seek(start)?,
            None => cursor.seek(b"")?,
        }
        self.cursor = Some(cursor);
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecuteCtx) -> Result<Option<KVPair>> {
        let cursor = self.cursor.as_mut().expect("scan not initialized");
        while let Some(kvp) = cursor.next()? {
            if let Some(end) = &self.end {
                if kvp.key.as_slice() > end.as_slice() {
                    break;
                }
            }
            ctx.clear();
            if self.filter.filter(&kvp, ctx)? {
                return Ok(Some(kvp));
            }
        }
        Ok(None)
    }

    fn batch(&mut self, ctx: &mut ExecuteCtx) -> Result<Vec<KVPair>> {
        let end = self.end.clone();
        let cursor = self.cursor.as_mut().expect("scan not initialized");
        scan_batch(ctx, &self.filter, move |_| match cursor.next()? {
            Some(kvp) => match &end {
                Some(end) if kvp.key.as_slice() > end.as_slice() => Ok(None),
                _ => Ok(Some(kvp)),
            },
            None => Ok(None),
        })
    }

    fn explain(&self) -> Vec<String> {
        vec![format!(
            "RangeScanPlan{{Start = '{}', End = '{}', Filter = '{}'}}",
            display_bound(&self.start),
            display_bound(&self.end),
            self.filter.explain()
        )]
    }
}

/// Point gets over an explicit key set. Keys are processed in ascending
/// order so a downstream order-by-key-asc can elide its sort; misses are
/// skipped.
pub struct MultiGetPlan<'a> {
    storage: &'a dyn Storage,
    filter: Rc<FilterExec>,
    keys: Vec<Vec<u8>>,
    idx: usize,
}

impl<'a> MultiGetPlan<'a> {
    pub fn new(storage: &'a dyn Storage, filter: Rc<FilterExec>, mut keys: Vec<Vec<u8>>) -> Self {
        keys.sort();
        MultiGetPlan {
            storage,
            filter,
            keys,
            idx: 0,
        }
    }

    pub fn keys(&self) -> &[Vec<u8>] {
        &self.keys
    }

    fn fetch_next(&mut self) -> Result<Option<KVPair>> {
        while self.idx < self.keys.len() {
            let key = self.keys[self.idx].clone();
            self.idx += 1;
            if let Some(value) = self.storage.get(&key)? {
                return Ok(Some(KVPair::new(key, value)));
            }
        }
        Ok(None)
    }
}

impl Plan for MultiGetPlan<'_> {
    fn init(&mut self) -> Result<()> {
        self.idx = 0;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecuteCtx) -> Result<Option<KVPair>> {
        while let Some(kvp) = self.fetch_next()? {
            ctx.clear();
            if self.filter.filter(&kvp, ctx)? {
                return Ok(Some(kvp));
            }
        }
        Ok(None)
    }

    fn batch(&mut self, ctx: &mut ExecuteCtx) -> Result<Vec<KVPair>> {
        let filter = self.filter.clone();
        let mut fetch = |_: usize| self.fetch_next();
        scan_batch(ctx, &filter, &mut fetch)
    }

    fn explain(&self) -> Vec<String> {
        let keys: Vec<String> = self
            .keys
            .iter()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect();
        vec![format!(
            "MultiGetPlan{{Keys = <{}>, Filter = '{}'}}",
            keys.join(", "),
            self.filter.explain()
        )]
    }
}

/// Shared batch pump: pull chunks from `fetch` (which returns `None` at
/// the scan's stop condition), filter each chunk vectorized, and align the
/// context's chunk caches with the surviving rows.
fn scan_batch(
    ctx: &mut ExecuteCtx,
    filter: &FilterExec,
    mut fetch: impl FnMut(usize) -> Result<Option<KVPair>>,
) -> Result<Vec<KVPair>> {
    let batch_size = config::plan_batch_size();
    let mut out = Vec::with_capacity(batch_size);
    let mut chunk = Vec::with_capacity(batch_size);
    let mut chosen = Vec::with_capacity(2 * batch_size);
    let mut bidx = 0;
    let mut count = 0;
    let mut finished = false;
    while !finished {
        chunk.clear();
        for i in 0..batch_size {
            match fetch(i)? {
                Some(kvp) => chunk.push(kvp),
                None => {
                    finished = true;
                    break;
                }
            }
        }
        if !chunk.is_empty() {
            let matches = filter.filter_batch(&chunk, ctx)?;
            for (i, matched) in matches.iter().enumerate() {
                if *matched {
                    out.push(chunk[i].clone());
                    chosen.push(bidx);
                    count += 1;
                }
                bidx += 1;
            }
            if count >= batch_size {
                finished = true;
            }
        }
    }
    ctx.adjust_chunk_cache(&chosen);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemStore;
    use crate::query::parser::parse_where_expr;

    fn filter_of(query: &str) -> Rc<FilterExec> {
        Rc::new(FilterExec::new(parse_where_expr(query).unwrap()))
    }

    fn seeded() -> MemStore {
        MemStore::from_pairs([
            ("a1", "1"),
            ("a2", "2"),
            ("b1", "3"),
            ("b2", "4"),
            ("c1", "5"),
        ])
    }

    fn drain(plan: &mut dyn Plan) -> Vec<String> {
        let mut ctx = ExecuteCtx::new();
        plan.init().unwrap();
        let mut keys = Vec::new();
        while let Some(kvp) = plan.next(&mut ctx).unwrap() {
            keys.push(String::from_utf8(kvp.key).unwrap());
        }
        keys
    }

    fn drain_batch(plan: &mut dyn Plan) -> Vec<String> {
        let mut ctx = ExecuteCtx::new();
        plan.init().unwrap();
        let mut keys = Vec::new();
        loop {
            let rows = plan.batch(&mut ctx).unwrap();
            if rows.is_empty() {
                break;
            }
            for kvp in rows {
                keys.push(String::from_utf8(kvp.key).unwrap());
            }
        }
        keys
    }

    #[test]
    fn test_full_scan() {
        let store = seeded();
        let mut plan = FullScanPlan::new(&store, filter_of("true"));
        assert_eq!(drain(&mut plan), ["a1", "a2", "b1", "b2", "c1"]);
        let mut plan = FullScanPlan::new(&store, filter_of("value > '2'"));
        assert_eq!(drain(&mut plan), ["b1", "b2", "c1"]);
    }

    #[test]
    fn test_prefix_scan_stops_at_first_miss() {
        let store = seeded();
        let mut plan = PrefixScanPlan::new(&store, filter_of("true"), b"b".to_vec());
        assert_eq!(drain(&mut plan), ["b1", "b2"]);
    }

    #[test]
    fn test_range_scan_inclusive_bounds() {
        let store = seeded();
        let mut plan = RangeScanPlan::new(
            &store,
            filter_of("true"),
            Some(b"a2".to_vec()),
            Some(b"b2".to_vec()),
        );
        assert_eq!(drain(&mut plan), ["a2", "b1", "b2"]);
        let mut plan = RangeScanPlan::new(&store, filter_of("true"), None, Some(b"a2".to_vec()));
        assert_eq!(drain(&mut plan), ["a1", "a2"]);
        let mut plan = RangeScanPlan::new(&store, filter_of("true"), Some(b"b2".to_vec()), None);
        assert_eq!(drain(&mut plan), ["b2", "c1"]);
    }

    #[test]
    fn test_multi_get_sorts_and_skips_misses() {
        let store = seeded();
        let keys = vec![b"b1".to_vec(), b"a1".to_vec(), b"zz".to_vec(), b"c1".to_vec()];
        let mut plan = MultiGetPlan::new(&store, filter_of("true"), keys);
        assert_eq!(drain(&mut plan), ["a1", "b1", "c1"]);
    }

    #[test]
    fn test_batch_matches_row_mode() {
        let store = seeded();
        let mut row = FullScanPlan::new(&store, filter_of("value > '1'"));
        let mut batch = FullScanPlan::new(&store, filter_of("value > '1'"));
        assert_eq!(drain(&mut row), drain_batch(&mut batch));

        let mut row = PrefixScanPlan::new(&store, filter_of("true"), b"a".to_vec());
        let mut batch = PrefixScanPlan::new(&store, filter_of("true"), b"a".to_vec());
        assert_eq!(drain(&mut row), drain_batch(&mut batch));
    }
}
