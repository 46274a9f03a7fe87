//! StateStore — SQLite-backed storage facade for EdgeFleet.
//!
//! Typed operations live on [`Db`], a borrowed handle that is only reachable
//! through [`StateStore::run`] (autocommit) or [`StateStore::transaction`]
//! (all-or-nothing). The store is `Clone` and shared across async tasks;
//! calls are short and synchronous.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use edgefleet_core::{Page, PageQuery};
use rusqlite::{Connection, Params, Row};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::schema::{FILE_PRAGMAS_SQL, PRAGMAS_SQL, SCHEMA_SQL};

/// Thread-safe state store backed by a single SQLite connection.
#[derive(Clone)]
pub struct StateStore {
    conn: Arc<Mutex<Connection>>,
}

/// Borrowed connection handed to store closures.
///
/// Closures must not call back into the owning [`StateStore`]; the
/// connection lock is held for the closure's duration.
pub struct Db<'a> {
    pub(crate) conn: &'a Connection,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StateError::Open(format!("{}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| StateError::Open(format!("{}: {e}", path.display())))?;
        conn.execute_batch(FILE_PRAGMAS_SQL)?;
        let store = Self::init(conn)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open(e.to_string()))?;
        let store = Self::init(conn)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn init(conn: Connection) -> StateResult<Self> {
        conn.execute_batch(PRAGMAS_SQL)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic in another holder leaves SQLite itself consistent.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` with autocommit semantics: each statement commits on its own.
    pub fn run<T, E>(&self, f: impl FnOnce(&Db<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StateError>,
    {
        let conn = self.lock();
        f(&Db { conn: &conn })
    }

    /// Run `f` inside a transaction; any `Err` rolls every statement back.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&Db<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StateError>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(StateError::from)?;
        let out = f(&Db { conn: &tx })?;
        tx.commit().map_err(StateError::from)?;
        Ok(out)
    }
}

// ── Row helpers ────────────────────────────────────────────────────

pub(crate) fn id_col(row: &Row<'_>, idx: &str) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
}

pub(crate) fn sql_id(id: u64) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}

impl Db<'_> {
    pub(crate) fn query_one<T, P: Params>(
        &self,
        sql: &str,
        params: P,
        what: impl FnOnce() -> String,
        map: impl FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StateResult<T> {
        match self.conn.query_row(sql, params, map) {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StateError::NotFound(what())),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn query_opt<T, P: Params>(
        &self,
        sql: &str,
        params: P,
        map: impl FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StateResult<Option<T>> {
        match self.conn.query_row(sql, params, map) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn query_all<T, P: Params>(
        &self,
        sql: &str,
        params: P,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StateResult<Vec<T>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, map)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub(crate) fn count<P: Params>(&self, sql: &str, params: P) -> StateResult<u64> {
        let n: i64 = self.conn.query_row(sql, params, |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    pub(crate) fn execute<P: Params>(&self, sql: &str, params: P) -> StateResult<usize> {
        Ok(self.conn.execute(sql, params)?)
    }

    pub(crate) fn last_id(&self) -> u64 {
        self.conn.last_insert_rowid().max(0) as u64
    }

    /// Paginated listing over `table` filtered by a case-sensitive substring
    /// of `name_col`. `extra` is an additional SQL predicate without params.
    pub(crate) fn page<T>(
        &self,
        table: &str,
        name_col: &str,
        extra: &str,
        order: &str,
        query: &PageQuery,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StateResult<Page<T>> {
        let filter = format!("instr({name_col}, ?1) > 0 {extra}");
        let total = self.count(
            &format!("SELECT COUNT(*) FROM {table} WHERE {filter}"),
            [&query.name],
        )?;
        let items = self.query_all(
            &format!("SELECT * FROM {table} WHERE {filter} ORDER BY {order} LIMIT ?2 OFFSET ?3"),
            rusqlite::params![
                query.name,
                sql_id(query.size),
                sql_id(query.offset())
            ],
            map,
        )?;
        Ok(Page { total, items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewNode;

    fn test_store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn node(name: &str) -> NewNode {
        NewNode {
            node_name: name.to_string(),
            unique_name: name.to_string(),
            is_managed: true,
            ..Default::default()
        }
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = test_store();
        let result: StateResult<()> = store.transaction(|db| {
            db.insert_node(&node("edge-01"))?;
            db.insert_node(&node("edge-01"))?;
            Ok(())
        });
        assert!(matches!(result, Err(StateError::UniqueViolation(_))));
        let count = store.run(|db| db.count_nodes()).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn transaction_commits_on_success() {
        let store = test_store();
        store
            .transaction(|db| -> StateResult<()> {
                db.insert_node(&node("edge-01"))?;
                db.insert_node(&node("edge-02"))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.run(|db| db.count_nodes()).unwrap(), 2);
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fleet.db");
        {
            let store = StateStore::open(&path).unwrap();
            store.run(|db| db.insert_node(&node("edge-01"))).unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        let found = store
            .run(|db| db.find_node_by_unique_name("edge-01"))
            .unwrap();
        assert_eq!(found.unwrap().node_name, "edge-01");
    }
}
