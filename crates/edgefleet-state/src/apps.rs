//! Applications, templates, daemon-set records, and instances.

use edgefleet_core::time::now_timestamp;
use edgefleet_core::{Page, PageQuery};
use rusqlite::{Row, params};
use tracing::debug;

use crate::error::StateResult;
use crate::store::{Db, id_col, sql_id};
use crate::types::{AppDaemonSet, AppInfo, AppInstance, InstanceRecord, NewDaemonSet};

/// Applications and templates share a row shape but live in separate tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppTable {
    Apps,
    Templates,
}

impl AppTable {
    fn name(self) -> &'static str {
        match self {
            AppTable::Apps => "app_infos",
            AppTable::Templates => "app_templates",
        }
    }

    fn label(self) -> &'static str {
        match self {
            AppTable::Apps => "app",
            AppTable::Templates => "app template",
        }
    }
}

fn app_from_row(row: &Row<'_>) -> rusqlite::Result<AppInfo> {
    Ok(AppInfo {
        id: id_col(row, "id")?,
        app_name: row.get("app_name")?,
        description: row.get("description")?,
        containers: row.get("containers")?,
        created_at: row.get("created_at")?,
        modified_at: row.get("modified_at")?,
    })
}

fn daemon_set_from_row(row: &Row<'_>) -> rusqlite::Result<AppDaemonSet> {
    Ok(AppDaemonSet {
        id: id_col(row, "id")?,
        daemon_set_name: row.get("daemon_set_name")?,
        app_id: id_col(row, "app_id")?,
        node_group_id: id_col(row, "node_group_id")?,
        node_group_name: row.get("node_group_name")?,
    })
}

fn instance_from_row(row: &Row<'_>) -> rusqlite::Result<AppInstance> {
    Ok(AppInstance {
        id: id_col(row, "id")?,
        pod_name: row.get("pod_name")?,
        node_unique_name: row.get("node_unique_name")?,
        node_id: id_col(row, "node_id")?,
        node_name: row.get("node_name")?,
        node_group_id: id_col(row, "node_group_id")?,
        app_name: row.get("app_name")?,
        app_id: id_col(row, "app_id")?,
        container_info: row.get("container_info")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Db<'_> {
    // ── Applications and templates ─────────────────────────────────

    pub fn insert_app(
        &self,
        table: AppTable,
        app_name: &str,
        description: &str,
        containers: &str,
    ) -> StateResult<u64> {
        let now = now_timestamp();
        self.execute(
            &format!(
                "INSERT INTO {} (app_name, description, containers, created_at, modified_at) \
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                table.name()
            ),
            params![app_name, description, containers, now],
        )?;
        let id = self.last_id();
        debug!(id, %app_name, table = table.name(), "app stored");
        Ok(id)
    }

    pub fn get_app(&self, table: AppTable, id: u64) -> StateResult<AppInfo> {
        self.query_one(
            &format!("SELECT * FROM {} WHERE id = ?1", table.name()),
            [sql_id(id)],
            || format!("{} {id}", table.label()),
            app_from_row,
        )
    }

    pub fn find_app_by_name(&self, table: AppTable, app_name: &str) -> StateResult<Option<AppInfo>> {
        self.query_opt(
            &format!("SELECT * FROM {} WHERE app_name = ?1", table.name()),
            [app_name],
            app_from_row,
        )
    }

    pub fn list_apps(&self, table: AppTable, query: &PageQuery) -> StateResult<Page<AppInfo>> {
        self.page(table.name(), "app_name", "", "id", query, app_from_row)
    }

    pub fn all_apps(&self, table: AppTable) -> StateResult<Vec<AppInfo>> {
        self.query_all(
            &format!("SELECT * FROM {} ORDER BY id", table.name()),
            [],
            app_from_row,
        )
    }

    pub fn count_apps(&self, table: AppTable) -> StateResult<u64> {
        self.count(&format!("SELECT COUNT(*) FROM {}", table.name()), [])
    }

    pub fn update_app(
        &self,
        table: AppTable,
        id: u64,
        description: &str,
        containers: &str,
    ) -> StateResult<usize> {
        self.execute(
            &format!(
                "UPDATE {} SET description = ?2, containers = ?3, modified_at = ?4 WHERE id = ?1",
                table.name()
            ),
            params![sql_id(id), description, containers, now_timestamp()],
        )
    }

    pub fn delete_app(&self, table: AppTable, id: u64) -> StateResult<bool> {
        let n = self.execute(
            &format!("DELETE FROM {} WHERE id = ?1", table.name()),
            [sql_id(id)],
        )?;
        Ok(n > 0)
    }

    // ── Daemon sets ────────────────────────────────────────────────

    pub fn insert_daemon_set(&self, ds: &NewDaemonSet) -> StateResult<u64> {
        self.execute(
            "INSERT INTO app_daemon_sets (daemon_set_name, app_id, node_group_id, \
             node_group_name) VALUES (?1, ?2, ?3, ?4)",
            params![
                ds.daemon_set_name,
                sql_id(ds.app_id),
                sql_id(ds.node_group_id),
                ds.node_group_name
            ],
        )?;
        Ok(self.last_id())
    }

    pub fn find_daemon_set(&self, app_id: u64, group_id: u64) -> StateResult<Option<AppDaemonSet>> {
        self.query_opt(
            "SELECT * FROM app_daemon_sets WHERE app_id = ?1 AND node_group_id = ?2",
            [sql_id(app_id), sql_id(group_id)],
            daemon_set_from_row,
        )
    }

    pub fn find_daemon_set_by_name(&self, name: &str) -> StateResult<Option<AppDaemonSet>> {
        self.query_opt(
            "SELECT * FROM app_daemon_sets WHERE daemon_set_name = ?1",
            [name],
            daemon_set_from_row,
        )
    }

    pub fn all_daemon_sets(&self) -> StateResult<Vec<AppDaemonSet>> {
        self.query_all("SELECT * FROM app_daemon_sets ORDER BY id", [], daemon_set_from_row)
    }

    pub fn daemon_sets_of_app(&self, app_id: u64) -> StateResult<Vec<AppDaemonSet>> {
        self.query_all(
            "SELECT * FROM app_daemon_sets WHERE app_id = ?1 ORDER BY id",
            [sql_id(app_id)],
            daemon_set_from_row,
        )
    }

    pub fn daemon_sets_of_group(&self, group_id: u64) -> StateResult<Vec<AppDaemonSet>> {
        self.query_all(
            "SELECT * FROM app_daemon_sets WHERE node_group_id = ?1 ORDER BY id",
            [sql_id(group_id)],
            daemon_set_from_row,
        )
    }

    pub fn count_daemon_sets_of_group(&self, group_id: u64) -> StateResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM app_daemon_sets WHERE node_group_id = ?1",
            [sql_id(group_id)],
        )
    }

    pub fn delete_daemon_set_by_name(&self, name: &str) -> StateResult<bool> {
        let n = self.execute(
            "DELETE FROM app_daemon_sets WHERE daemon_set_name = ?1",
            [name],
        )?;
        Ok(n > 0)
    }

    pub fn truncate_daemon_sets(&self) -> StateResult<usize> {
        self.execute("DELETE FROM app_daemon_sets", [])
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or replace the instance keyed by pod name.
    pub fn upsert_instance(&self, rec: &InstanceRecord) -> StateResult<()> {
        let now = now_timestamp();
        self.execute(
            "INSERT INTO app_instances (pod_name, node_unique_name, node_id, node_name, \
             node_group_id, app_name, app_id, container_info, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9) \
             ON CONFLICT(pod_name) DO UPDATE SET node_unique_name = excluded.node_unique_name, \
             node_id = excluded.node_id, node_name = excluded.node_name, \
             node_group_id = excluded.node_group_id, app_name = excluded.app_name, \
             app_id = excluded.app_id, container_info = excluded.container_info, \
             updated_at = excluded.updated_at",
            params![
                rec.pod_name,
                rec.node_unique_name,
                sql_id(rec.node_id),
                rec.node_name,
                sql_id(rec.node_group_id),
                rec.app_name,
                sql_id(rec.app_id),
                rec.container_info,
                now
            ],
        )?;
        Ok(())
    }

    pub fn delete_instance(&self, pod_name: &str) -> StateResult<bool> {
        let n = self.execute("DELETE FROM app_instances WHERE pod_name = ?1", [pod_name])?;
        Ok(n > 0)
    }

    pub fn find_instance(&self, pod_name: &str) -> StateResult<Option<AppInstance>> {
        self.query_opt(
            "SELECT * FROM app_instances WHERE pod_name = ?1",
            [pod_name],
            instance_from_row,
        )
    }

    /// Instances paged with an app-name substring filter.
    pub fn list_instances(&self, query: &PageQuery) -> StateResult<Page<AppInstance>> {
        self.page("app_instances", "app_name", "", "id", query, instance_from_row)
    }

    pub fn instances_of_app(&self, app_id: u64) -> StateResult<Vec<AppInstance>> {
        self.query_all(
            "SELECT * FROM app_instances WHERE app_id = ?1 ORDER BY id",
            [sql_id(app_id)],
            instance_from_row,
        )
    }

    pub fn instances_of_node(&self, node_id: u64) -> StateResult<Vec<AppInstance>> {
        self.query_all(
            "SELECT * FROM app_instances WHERE node_id = ?1 ORDER BY id",
            [sql_id(node_id)],
            instance_from_row,
        )
    }

    pub fn count_instances(&self) -> StateResult<u64> {
        self.count("SELECT COUNT(*) FROM app_instances", [])
    }

    pub fn count_instances_of_group(&self, group_id: u64) -> StateResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM app_instances WHERE node_group_id = ?1",
            [sql_id(group_id)],
        )
    }

    pub fn truncate_instances(&self) -> StateResult<usize> {
        self.execute("DELETE FROM app_instances", [])
    }
}
