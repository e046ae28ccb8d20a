//! Embedded relational backend.
//!
//! Values are stored as chunk rows so a single oversized payload (a large
//! packfile) never materializes as one blob: anything above
//! [`CHUNK_THRESHOLD`] is split into [`CHUNK_SIZE`] rows, and
//! `read_chunks` streams them lazily.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use crate::{Storage, StoreError};

/// Values at or above this size are chunked (≈100 MiB).
pub const CHUNK_THRESHOLD: usize = 100 * 1024 * 1024;
/// Chunk row size (≈10 MiB).
pub const CHUNK_SIZE: usize = 10 * 1024 * 1024;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                 key   TEXT NOT NULL,
                 chunk INTEGER NOT NULL,
                 data  BLOB NOT NULL,
                 PRIMARY KEY (key, chunk)
             );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// An in-memory database, handy for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                 key   TEXT NOT NULL,
                 chunk INTEGER NOT NULL,
                 data  BLOB NOT NULL,
                 PRIMARY KEY (key, chunk)
             );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn chunk_count(conn: &Connection, key: &str) -> Result<usize, StoreError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM kv WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn insert_chunks(conn: &Connection, key: &str, data: &[u8]) -> Result<(), StoreError> {
        if data.len() >= CHUNK_THRESHOLD {
            for (i, chunk) in data.chunks(CHUNK_SIZE).enumerate() {
                conn.execute(
                    "INSERT INTO kv (key, chunk, data) VALUES (?1, ?2, ?3)",
                    params![key, i as i64, chunk],
                )?;
            }
        } else {
            conn.execute(
                "INSERT INTO kv (key, chunk, data) VALUES (?1, 0, ?2)",
                params![key, data],
            )?;
        }
        Ok(())
    }
}

impl Storage for SqliteStore {
    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare_cached("SELECT data FROM kv WHERE key = ?1 ORDER BY chunk")?;
        let mut rows = stmt.query(params![key])?;
        let mut out: Option<Vec<u8>> = None;
        while let Some(row) = rows.next()? {
            let chunk: Vec<u8> = row.get(0)?;
            out.get_or_insert_with(Vec::new).extend_from_slice(&chunk);
        }
        out.ok_or_else(|| StoreError::not_found(key))
    }

    fn read_chunks(
        &self,
        key: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<Vec<u8>, StoreError>> + '_>, StoreError> {
        let total = {
            let conn = self.conn.lock().unwrap();
            let n = Self::chunk_count(&conn, key)?;
            if n == 0 {
                return Err(StoreError::not_found(key));
            }
            n
        };
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        Ok(Box::new((0..total).map(move |i| {
            let conn = conn.lock().unwrap();
            conn.query_row(
                "SELECT data FROM kv WHERE key = ?1 AND chunk = ?2",
                params![key, i as i64],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .map_err(StoreError::from)
        })))
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Self::insert_chunks(&tx, key, data)?;
        tx.commit()?;
        Ok(())
    }

    fn write_exclusive(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        if Self::chunk_count(&tx, key)? > 0 {
            return Err(StoreError::already_exists(key));
        }
        Self::insert_chunks(&tx, key, data)?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        if removed == 0 {
            return Err(StoreError::not_found(key));
        }
        Ok(())
    }

    fn has(&self, key: &str) -> bool {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT 1 FROM kv WHERE key = ?1 LIMIT 1",
            params![key],
            |_| Ok(()),
        )
        .optional()
        .map(|o| o.is_some())
        .unwrap_or(false)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT key FROM kv WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key",
        )?;
        let rows = stmt.query_map(params![pattern], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        if Self::chunk_count(&tx, from)? == 0 {
            return Err(StoreError::not_found(from));
        }
        tx.execute("DELETE FROM kv WHERE key = ?1", params![to])?;
        tx.execute(
            "UPDATE kv SET key = ?2 WHERE key = ?1",
            params![from, to],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_values_use_one_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.write("config", b"[core]\n").unwrap();
        let conn = store.conn.lock().unwrap();
        assert_eq!(SqliteStore::chunk_count(&conn, "config").unwrap(), 1);
    }

    #[test]
    fn chunked_read_streams_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        // Force chunking without a 100 MiB fixture by writing rows directly.
        {
            let conn = store.conn.lock().unwrap();
            for i in 0..3i64 {
                conn.execute(
                    "INSERT INTO kv (key, chunk, data) VALUES ('big', ?1, ?2)",
                    params![i, vec![i as u8; 4]],
                )
                .unwrap();
            }
        }
        let chunks: Vec<Vec<u8>> = store
            .read_chunks("big")
            .unwrap()
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(chunks, vec![vec![0u8; 4], vec![1u8; 4], vec![2u8; 4]]);
        assert_eq!(store.read("big").unwrap(), [vec![0u8; 4], vec![1u8; 4], vec![2u8; 4]].concat());
    }

    #[test]
    fn like_wildcards_in_keys_are_escaped() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.write("refs/heads/a_b", b"1").unwrap();
        store.write("refs/heads/axb", b"2").unwrap();
        assert_eq!(store.list("refs/heads/a_").unwrap(), vec!["refs/heads/a_b"]);
    }
}
