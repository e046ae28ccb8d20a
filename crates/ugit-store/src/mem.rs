//! In-memory backend, used by tests and by bare extraction flows that never
//! touch disk.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::{Storage, StoreError};

#[derive(Default)]
pub struct MemStore {
    map: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStore {
    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.map
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.map
            .write()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn write_exclusive(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut map = self.map.write().unwrap();
        if map.contains_key(key) {
            return Err(StoreError::already_exists(key));
        }
        map.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.map
            .write()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(key))
    }

    fn has(&self, key: &str) -> bool {
        self.map.read().unwrap().contains_key(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .map
            .read()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let mut map = self.map.write().unwrap();
        let value = map.remove(from).ok_or_else(|| StoreError::not_found(from))?;
        map.insert(to.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_is_a_move() {
        let store = MemStore::new();
        store.write("a", b"1").unwrap();
        store.rename("a", "b").unwrap();
        assert!(!store.has("a"));
        assert_eq!(store.read("b").unwrap(), b"1");
    }

    #[test]
    fn list_is_sorted() {
        let store = MemStore::new();
        store.write("k/c", b"").unwrap();
        store.write("k/a", b"").unwrap();
        store.write("k/b", b"").unwrap();
        assert_eq!(store.list("k/").unwrap(), vec!["k/a", "k/b", "k/c"]);
    }
}
