use std::collections::{HashMap, HashSet};

use crate::config;
use crate::exec::value::Value;

/// Per-execution state. Owns the field-result caches that deduplicate
/// evaluation of aliased subexpressions; one context per statement
/// execution, cleared by the projection plan between pulls.
#[derive(Debug, Default)]
pub struct ExecuteCtx {
    /// Cache hits observed so far.
    pub hit: usize,
    enable_cache: bool,
    /// Row mode: alias name -> value for the current row.
    field_caches: HashMap<String, Value>,
    /// Batch mode: (alias, first-row key) -> results for that chunk.
    chunk_key_caches: HashMap<(String, Vec<u8>), Vec<Value>>,
    /// Batch mode: alias -> results accumulated across the chunks of one
    /// scan batch, aligned to the emitted rows by `adjust_chunk_cache`.
    chunk_caches: HashMap<String, Vec<Value>>,
}

impl ExecuteCtx {
    pub fn new() -> Self {
        ExecuteCtx {
            hit: 0,
            enable_cache: config::global().enable_field_cache,
            ..Default::default()
        }
    }

    /// A context with caching off; used where the engine must not reuse
    /// results across rows (constant folding, aggregate row-mode prepare).
    pub fn disabled() -> Self {
        ExecuteCtx {
            enable_cache: false,
            ..Default::default()
        }
    }

    pub fn cache_enabled(&self) -> bool {
        self.enable_cache
    }

    pub fn set_cache_enabled(&mut self, enable: bool) {
        self.enable_cache = enable;
    }

    pub fn update_hit(&mut self) {
        self.hit += 1;
    }

    pub fn get_field_result(&self, name: &str) -> Option<&Value> {
        if !self.enable_cache {
            return None;
        }
        self.field_caches.get(name)
    }

    pub fn set_field_result(&mut self, name: &str, value: Value) {
        if !self.enable_cache {
            return;
        }
        self.field_caches.insert(name.to_string(), value);
    }

    pub fn get_chunk_field_result(&self, name: &str, first_key: &[u8]) -> Option<&Vec<Value>> {
        if !self.enable_cache {
            return None;
        }
        self.chunk_key_caches
            .get(&(name.to_string(), first_key.to_vec()))
    }

    /// Store one chunk's results for an alias and append them to the
    /// alias's accumulated batch results. Stores are first-write-wins per
    /// (alias, chunk) so re-evaluation cannot duplicate the accumulation.
    pub fn set_chunk_field_result(&mut self, name: &str, first_key: &[u8], chunk: Vec<Value>) {
        if !self.enable_cache {
            return;
        }
        let key = (name.to_string(), first_key.to_vec());
        if self.chunk_key_caches.contains_key(&key) {
            return;
        }
        self.chunk_caches
            .entry(name.to_string())
            .or_default()
            .extend(chunk.iter().cloned());
        self.chunk_key_caches.insert(key, chunk);
    }

    /// The accumulated batch results for an alias, aligned to the rows the
    /// scan emitted.
    pub fn get_chunk_field_final_result(&self, name: &str) -> Option<&Vec<Value>> {
        if !self.enable_cache {
            return None;
        }
        self.chunk_caches.get(name)
    }

    /// Keep only the chosen in-batch indexes in the accumulated results so
    /// they line up with the rows that survived the residual filter.
    pub fn adjust_chunk_cache(&mut self, chosen: &[usize]) {
        if !self.enable_cache {
            return;
        }
        let keep: HashSet<usize> = chosen.iter().copied().collect();
        for results in self.chunk_caches.values_mut() {
            let mut next = Vec::with_capacity(chosen.len());
            for (i, item) in results.drain(..).enumerate() {
                if keep.contains(&i) {
                    next.push(item);
                }
            }
            *results = next;
        }
    }

    /// Invalidate everything; callers do this between unrelated rows or
    /// batches.
    pub fn clear(&mut self) {
        if !self.enable_cache {
            return;
        }
        self.field_caches.clear();
        self.chunk_key_caches.clear();
        self.chunk_caches.clear();
    }
}
