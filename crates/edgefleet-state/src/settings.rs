//! Configmaps, the bootstrap token, and software key/value blobs.

use edgefleet_core::time::now_timestamp;
use edgefleet_core::{Page, PageQuery};
use rusqlite::{Row, params};

use crate::error::StateResult;
use crate::store::{Db, id_col, sql_id};
use crate::types::{ConfigmapInfo, SoftwareRecord, TokenInfo};

fn configmap_from_row(row: &Row<'_>) -> rusqlite::Result<ConfigmapInfo> {
    Ok(ConfigmapInfo {
        configmap_id: id_col(row, "configmap_id")?,
        configmap_name: row.get("configmap_name")?,
        description: row.get("description")?,
        configmap_content: row.get("configmap_content")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<TokenInfo> {
    Ok(TokenInfo {
        token: row.get("token")?,
        salt: row.get("salt")?,
        expire_time: row.get("expire_time")?,
    })
}

fn software_from_row(row: &Row<'_>) -> rusqlite::Result<SoftwareRecord> {
    Ok(SoftwareRecord {
        key: row.get("key")?,
        value: row.get("value")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Db<'_> {
    // ── Configmaps ─────────────────────────────────────────────────

    pub fn insert_configmap(&self, name: &str, description: &str, content: &str) -> StateResult<u64> {
        let now = now_timestamp();
        self.execute(
            "INSERT INTO configmap_infos (configmap_name, description, configmap_content, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![name, description, content, now],
        )?;
        Ok(self.last_id())
    }

    pub fn get_configmap(&self, id: u64) -> StateResult<ConfigmapInfo> {
        self.query_one(
            "SELECT * FROM configmap_infos WHERE configmap_id = ?1",
            [sql_id(id)],
            || format!("configmap {id}"),
            configmap_from_row,
        )
    }

    pub fn find_configmap_by_name(&self, name: &str) -> StateResult<Option<ConfigmapInfo>> {
        self.query_opt(
            "SELECT * FROM configmap_infos WHERE configmap_name = ?1",
            [name],
            configmap_from_row,
        )
    }

    pub fn list_configmaps(&self, query: &PageQuery) -> StateResult<Page<ConfigmapInfo>> {
        self.page(
            "configmap_infos",
            "configmap_name",
            "",
            "configmap_id",
            query,
            configmap_from_row,
        )
    }

    pub fn count_configmaps(&self) -> StateResult<u64> {
        self.count("SELECT COUNT(*) FROM configmap_infos", [])
    }

    pub fn update_configmap(&self, id: u64, description: &str, content: &str) -> StateResult<usize> {
        self.execute(
            "UPDATE configmap_infos SET description = ?2, configmap_content = ?3, \
             updated_at = ?4 WHERE configmap_id = ?1",
            params![sql_id(id), description, content, now_timestamp()],
        )
    }

    pub fn delete_configmap(&self, id: u64) -> StateResult<bool> {
        let n = self.execute(
            "DELETE FROM configmap_infos WHERE configmap_id = ?1",
            [sql_id(id)],
        )?;
        Ok(n > 0)
    }

    // ── Token ──────────────────────────────────────────────────────

    /// Delete-then-insert. Run inside a transaction to keep the table at
    /// zero or one row.
    pub fn replace_token(&self, token: &TokenInfo) -> StateResult<()> {
        self.execute("DELETE FROM token_infos", [])?;
        self.execute(
            "INSERT INTO token_infos (token, salt, expire_time) VALUES (?1, ?2, ?3)",
            params![token.token, token.salt, token.expire_time],
        )?;
        Ok(())
    }

    pub fn get_token(&self) -> StateResult<TokenInfo> {
        self.query_one(
            "SELECT * FROM token_infos LIMIT 1",
            [],
            || "token".to_string(),
            token_from_row,
        )
    }

    pub fn delete_tokens(&self) -> StateResult<usize> {
        self.execute("DELETE FROM token_infos", [])
    }

    pub fn count_tokens(&self) -> StateResult<u64> {
        self.count("SELECT COUNT(*) FROM token_infos", [])
    }

    // ── Software ───────────────────────────────────────────────────

    pub fn put_software(&self, key: &str, value: &str) -> StateResult<()> {
        let now = now_timestamp();
        self.execute(
            "INSERT INTO software_infos (key, value, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn get_software(&self, key: &str) -> StateResult<Option<SoftwareRecord>> {
        self.query_opt(
            "SELECT * FROM software_infos WHERE key = ?1",
            [key],
            software_from_row,
        )
    }

    pub fn delete_software(&self, key: &str) -> StateResult<bool> {
        let n = self.execute("DELETE FROM software_infos WHERE key = ?1", [key])?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::StateError;
    use crate::store::StateStore;
    use crate::types::TokenInfo;

    fn test_store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn token(expire_time: i64) -> TokenInfo {
        TokenInfo {
            token: vec![1; 32],
            salt: vec![2; 16],
            expire_time,
        }
    }

    #[test]
    fn token_table_holds_at_most_one_row() {
        let store = test_store();
        for expire in [10, 20, 30] {
            store
                .transaction(|db| db.replace_token(&token(expire)))
                .unwrap();
        }
        assert_eq!(store.run(|db| db.count_tokens()).unwrap(), 1);
        assert_eq!(store.run(|db| db.get_token()).unwrap().expire_time, 30);
    }

    #[test]
    fn missing_token_is_not_found() {
        let store = test_store();
        let err = store.run(|db| db.get_token()).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn configmap_crud() {
        let store = test_store();
        let id = store
            .run(|db| db.insert_configmap("cm-1", "", r#"[{"name":"a","value":"b"}]"#))
            .unwrap();
        store
            .run(|db| db.update_configmap(id, "updated", "[]"))
            .unwrap();
        let cm = store.run(|db| db.get_configmap(id)).unwrap();
        assert_eq!(cm.description, "updated");
        assert_eq!(cm.configmap_content, "[]");
        assert!(store.run(|db| db.find_configmap_by_name("cm-1")).unwrap().is_some());
        assert!(store.run(|db| db.delete_configmap(id)).unwrap());
        assert_eq!(store.run(|db| db.count_configmaps()).unwrap(), 0);
    }

    #[test]
    fn software_upsert() {
        let store = test_store();
        store.run(|db| db.put_software("edgecore", "[]")).unwrap();
        store.run(|db| db.put_software("edgecore", "[1]")).unwrap();
        let rec = store.run(|db| db.get_software("edgecore")).unwrap().unwrap();
        assert_eq!(rec.value, "[1]");
        assert!(store.run(|db| db.get_software("missing")).unwrap().is_none());
    }
}
