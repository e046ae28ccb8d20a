//! Weight-bounded LRU cache for parsed objects.
//!
//! Eviction is by total byte weight rather than entry count, so one large
//! blob cannot silently dominate a count-bounded cache.

use lru::LruCache;
use ugit_hash::ObjectId;

use crate::Object;

pub struct ObjectCache {
    cache: LruCache<ObjectId, Object>,
    /// Approximate total weight of cached objects in bytes.
    weight: usize,
    /// Eviction threshold in bytes.
    capacity: usize,
}

impl ObjectCache {
    /// Create with a byte-weight capacity.
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            cache: LruCache::unbounded(),
            weight: 0,
            capacity: capacity_bytes.max(1),
        }
    }

    /// Get a cached object, promoting it to most-recently-used.
    pub fn get(&mut self, oid: &ObjectId) -> Option<&Object> {
        self.cache.get(oid)
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.cache.contains(oid)
    }

    /// Insert, evicting least-recently-used entries until under capacity.
    /// Objects heavier than the whole capacity are not cached at all.
    pub fn insert(&mut self, oid: ObjectId, obj: Object) {
        let w = obj.weight();
        if w > self.capacity {
            return;
        }
        if let Some(old) = self.cache.put(oid, obj) {
            self.weight -= old.weight();
        }
        self.weight += w;
        while self.weight > self.capacity {
            match self.cache.pop_lru() {
                Some((_, evicted)) => self.weight -= evicted.weight(),
                None => break,
            }
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.weight = 0;
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Current total weight in bytes.
    pub fn weight(&self) -> usize {
        self.weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Blob;
    use ugit_hash::HashAlgorithm;

    fn blob_entry(n: u8, size: usize) -> (ObjectId, Object) {
        let mut bytes = [0u8; 20];
        bytes[0] = n;
        let oid = ObjectId::from_bytes(&bytes, HashAlgorithm::Sha1).unwrap();
        (oid, Object::Blob(Blob::new(vec![n; size])))
    }

    #[test]
    fn insert_and_get() {
        let mut cache = ObjectCache::new(1024);
        let (oid, obj) = blob_entry(1, 10);
        cache.insert(oid, obj.clone());
        assert_eq!(cache.get(&oid), Some(&obj));
        assert_eq!(cache.weight(), 10);
    }

    #[test]
    fn weight_eviction() {
        let mut cache = ObjectCache::new(100);
        let (oid1, obj1) = blob_entry(1, 60);
        let (oid2, obj2) = blob_entry(2, 60);
        cache.insert(oid1, obj1);
        cache.insert(oid2, obj2);
        // 120 > 100, so the older entry goes.
        assert!(!cache.contains(&oid1));
        assert!(cache.contains(&oid2));
        assert_eq!(cache.weight(), 60);
    }

    #[test]
    fn oversized_object_not_cached() {
        let mut cache = ObjectCache::new(50);
        let (oid, obj) = blob_entry(1, 51);
        cache.insert(oid, obj);
        assert!(cache.is_empty());
    }

    #[test]
    fn access_protects_from_eviction() {
        let mut cache = ObjectCache::new(100);
        let (oid1, obj1) = blob_entry(1, 40);
        let (oid2, obj2) = blob_entry(2, 40);
        let (oid3, obj3) = blob_entry(3, 40);
        cache.insert(oid1, obj1);
        cache.insert(oid2, obj2);
        cache.get(&oid1);
        cache.insert(oid3, obj3);
        assert!(cache.contains(&oid1));
        assert!(!cache.contains(&oid2));
    }

    #[test]
    fn reinsert_same_key_adjusts_weight() {
        let mut cache = ObjectCache::new(100);
        let (oid, obj) = blob_entry(1, 40);
        cache.insert(oid, obj);
        let (_, bigger) = blob_entry(1, 80);
        cache.insert(oid, bigger);
        assert_eq!(cache.weight(), 80);
        assert_eq!(cache.len(), 1);
    }
}
