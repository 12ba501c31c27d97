use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::{get_connection, init_db};
use crate::error::{Result, TallyError};
use crate::lock::DEFAULT_LOCK_TTL_SECS;
use crate::paths::parent_of;

/// Maximum number of operations a single atomic batch may carry.
pub const MAX_BATCH_OPS: usize = 50;

#[derive(Debug, Clone)]
enum WriteOp {
    Set { path: String, body: String },
    Create { path: String, body: String },
    CreateIfAbsent { path: String, body: String },
    Delete { path: String },
}

/// A set of writes applied all-or-nothing by [`Store::commit`].
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite the document at `path`.
    pub fn set<T: Serialize>(&mut self, path: &str, doc: &T) -> Result<()> {
        self.ops.push(WriteOp::Set {
            path: path.to_string(),
            body: serde_json::to_string(doc)?,
        });
        Ok(())
    }

    /// Create the document; the whole batch fails if it already exists.
    pub fn create<T: Serialize>(&mut self, path: &str, doc: &T) -> Result<()> {
        self.ops.push(WriteOp::Create {
            path: path.to_string(),
            body: serde_json::to_string(doc)?,
        });
        Ok(())
    }

    /// Create the document unless something already lives at `path`, in
    /// which case the existing document is left untouched.
    pub fn create_if_absent<T: Serialize>(&mut self, path: &str, doc: &T) -> Result<()> {
        self.ops.push(WriteOp::CreateIfAbsent {
            path: path.to_string(),
            body: serde_json::to_string(doc)?,
        });
        Ok(())
    }

    pub fn delete(&mut self, path: &str) {
        self.ops.push(WriteOp::Delete {
            path: path.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub struct Store {
    conn: Connection,
    lock_ttl_secs: i64,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = get_connection(db_path)?;
        init_db(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
        }
    }

    pub fn with_lock_ttl(mut self, secs: i64) -> Self {
        self.lock_ttl_secs = secs;
        self
    }

    pub fn lock_ttl_secs(&self) -> i64 {
        self.lock_ttl_secs
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let body: Option<String> = self
            .conn
            .query_row("SELECT body FROM documents WHERE path = ?1", [path], |row| {
                row.get(0)
            })
            .optional()?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    #[cfg(test)]
    pub fn exists(&self, path: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM documents WHERE path = ?1")?;
        Ok(stmt.exists([path])?)
    }

    pub fn set<T: Serialize>(&self, path: &str, doc: &T) -> Result<()> {
        let body = serde_json::to_string(doc)?;
        upsert(&self.conn, path, &body)?;
        Ok(())
    }

    /// Create the document only if nothing lives at `path`. Returns whether
    /// this call created it.
    pub fn create<T: Serialize>(&self, path: &str, doc: &T) -> Result<bool> {
        let body = serde_json::to_string(doc)?;
        let changed = self.conn.execute(
            "INSERT INTO documents (path, collection, body) VALUES (?1, ?2, ?3) \
             ON CONFLICT(path) DO NOTHING",
            rusqlite::params![path, parent_of(path), body],
        )?;
        Ok(changed == 1)
    }

    /// Create the document if `path` is empty, or replace the existing one if
    /// its integer field `expiry_field` is at or before `now_ms`. A single
    /// statement, so two callers can never both win.
    pub fn create_or_replace_expired<T: Serialize>(
        &self,
        path: &str,
        doc: &T,
        expiry_field: &str,
        now_ms: i64,
    ) -> Result<bool> {
        let body = serde_json::to_string(doc)?;
        let changed = self.conn.execute(
            "INSERT INTO documents (path, collection, body) VALUES (?1, ?2, ?3) \
             ON CONFLICT(path) DO UPDATE SET body = excluded.body, \
                 created_at = datetime('now'), updated_at = datetime('now') \
             WHERE json_extract(documents.body, ?4) <= ?5",
            rusqlite::params![path, parent_of(path), body, format!("$.{expiry_field}"), now_ms],
        )?;
        Ok(changed == 1)
    }

    /// Delete the document only while its string field `field` equals `value`.
    pub fn delete_where(&self, path: &str, field: &str, value: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM documents WHERE path = ?1 AND json_extract(body, ?2) = ?3",
            rusqlite::params![path, format!("$.{field}"), value],
        )?;
        Ok(changed == 1)
    }

    /// Direct children of `collection`, ordered by path.
    pub fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<(String, T)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, body FROM documents WHERE collection = ?1 ORDER BY path")?;
        let rows: Vec<(String, String)> = stmt
            .query_map([collection], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        decode_all(rows)
    }

    pub fn list_paths(&self, collection: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM documents WHERE collection = ?1 ORDER BY path")?;
        let paths = stmt
            .query_map([collection], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(paths)
    }

    /// Documents in `collection` whose string field `field` equals `value`.
    pub fn query_eq<T: DeserializeOwned>(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<(String, T)>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, body FROM documents \
             WHERE collection = ?1 AND json_extract(body, ?2) = ?3 ORDER BY path",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map(
                rusqlite::params![collection, format!("$.{field}"), value],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        decode_all(rows)
    }

    /// Number of documents stored under `prefix` (at any depth).
    pub fn count_under(&self, prefix: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM documents WHERE substr(path, 1, length(?1) + 1) = ?1 || '/'",
            [prefix],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Apply every operation of `batch` atomically. Returns the number of rows
    /// the batch actually touched (deletes of absent paths count zero).
    pub fn commit(&self, batch: WriteBatch) -> Result<usize> {
        if batch.len() > MAX_BATCH_OPS {
            return Err(TallyError::Capacity {
                needed: batch.len(),
                limit: MAX_BATCH_OPS,
            });
        }
        if batch.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.unchecked_transaction()?;
        let mut touched = 0usize;
        for op in &batch.ops {
            touched += match op {
                WriteOp::Set { path, body } => upsert(&tx, path, body)?,
                WriteOp::Create { path, body } => {
                    let changed = tx.execute(
                        "INSERT INTO documents (path, collection, body) VALUES (?1, ?2, ?3) \
                         ON CONFLICT(path) DO NOTHING",
                        rusqlite::params![path, parent_of(path), body],
                    )?;
                    if changed == 0 {
                        // Dropping `tx` rolls back everything written so far.
                        return Err(TallyError::InvalidState(format!("{path} already exists")));
                    }
                    changed
                }
                WriteOp::CreateIfAbsent { path, body } => tx.execute(
                    "INSERT INTO documents (path, collection, body) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(path) DO NOTHING",
                    rusqlite::params![path, parent_of(path), body],
                )?,
                WriteOp::Delete { path } => {
                    tx.execute("DELETE FROM documents WHERE path = ?1", [path])?
                }
            };
        }
        tx.commit()?;
        Ok(touched)
    }

    /// Atomically delete up to [`MAX_BATCH_OPS`] paths.
    pub fn delete_batch(&self, paths: &[String]) -> Result<usize> {
        let mut batch = WriteBatch::new();
        for path in paths {
            batch.delete(path);
        }
        self.commit(batch)
    }
}

fn upsert(conn: &Connection, path: &str, body: &str) -> Result<usize> {
    let changed = conn.execute(
        "INSERT INTO documents (path, collection, body) VALUES (?1, ?2, ?3) \
         ON CONFLICT(path) DO UPDATE SET body = excluded.body, updated_at = datetime('now')",
        rusqlite::params![path, parent_of(path), body],
    )?;
    Ok(changed)
}

fn decode_all<T: DeserializeOwned>(rows: Vec<(String, String)>) -> Result<Vec<(String, T)>> {
    rows.into_iter()
        .map(|(path, body)| Ok((path, serde_json::from_str(&body)?)))
        .collect()
}
