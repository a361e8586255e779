use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::error::Result;
use crate::kv::{Cursor, KVPair, Storage};

/// Ordered in-memory store. Backs the test suite and benchmarks and is a
/// reasonable default for embedding; it is not a durable database.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from string pairs. Test convenience.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            for (k, v) in pairs {
                inner.insert(k.into(), v.into());
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl Storage for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn batch_put(&self, pairs: &[KVPair]) -> Result<()> {
        let mut inner = self.inner.write();
        for kvp in pairs {
            inner.insert(kvp.key.clone(), kvp.value.clone());
        }
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.write().remove(key);
        Ok(())
    }

    fn batch_delete(&self, keys: &[Vec<u8>]) -> Result<()> {
        let mut inner = self.inner.write();
        for key in keys {
            inner.remove(key);
        }
        Ok(())
    }

    fn cursor(&self) -> Result<Box<dyn Cursor + '_>> {
        Ok(Box::new(MemCursor {
            store: self,
            pos: Vec::new(),
        }))
    }
}

/// Cursor over a `MemStore`. Holds no lock between steps: each `next`
/// re-acquires the read lock and resumes from the last returned key, so a
/// scan stays valid while the same store is mutated (the DELETE plan does
/// exactly that).
struct MemCursor<'a> {
    store: &'a MemStore,
    pos: Vec<u8>,
}

impl Cursor for MemCursor<'_> {
    fn seek(&mut self, prefix: &[u8]) -> Result<()> {
        self.pos = prefix.to_vec();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<KVPair>> {
        let inner = self.store.inner.read();
        let mut range = inner.range::<Vec<u8>, _>((Bound::Included(&self.pos), Bound::Unbounded));
        match range.next() {
            Some((k, v)) => {
                // Resume past this key on the following step.
                self.pos = k.clone();
                self.pos.push(0);
                Ok(Some(KVPair::new(k.clone(), v.clone())))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_ops() {
        let store = MemStore::new();
        store.put(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), None);
        store.delete(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_cursor_order_and_seek() {
        let store = MemStore::from_pairs([("b", "2"), ("a", "1"), ("c", "3")]);
        let mut cur = store.cursor().unwrap();
        cur.seek(b"").unwrap();
        let mut keys = Vec::new();
        while let Some(kvp) = cur.next().unwrap() {
            keys.push(String::from_utf8(kvp.key).unwrap());
        }
        assert_eq!(keys, ["a", "b", "c"]);

        let mut cur = store.cursor().unwrap();
        cur.seek(b"b").unwrap();
        let first = cur.next().unwrap().unwrap();
        assert_eq!(first.key, b"b");
    }

    #[test]
    fn test_cursor_survives_concurrent_delete() {
        let store = MemStore::from_pairs([("a", "1"), ("b", "2"), ("c", "3")]);
        let mut cur = store.cursor().unwrap();
        cur.seek(b"").unwrap();
        assert_eq!(cur.next().unwrap().unwrap().key, b"a");
        store.batch_delete(&[b"b".to_vec()]).unwrap();
        assert_eq!(cur.next().unwrap().unwrap().key, b"c");
        assert!(cur.next().unwrap().is_none());
    }

    #[test]
    fn test_batch_put() {
        let store = MemStore::new();
        store
            .batch_put(&[KVPair::new("x", "1"), KVPair::new("y", "2")])
            .unwrap();
        assert_eq!(store.len(), 2);
    }
}
