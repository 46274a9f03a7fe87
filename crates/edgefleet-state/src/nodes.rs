//! Nodes, node groups, and their membership relations.

use edgefleet_core::time::now_timestamp;
use edgefleet_core::{Page, PageQuery, ResourceList};
use rusqlite::{Row, params};
use tracing::debug;

use crate::error::StateResult;
use crate::store::{Db, id_col, sql_id};
use crate::types::{NewNode, NodeGroup, NodeInfo, NodeRelation};

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<NodeInfo> {
    Ok(NodeInfo {
        id: id_col(row, "id")?,
        node_name: row.get("node_name")?,
        unique_name: row.get("unique_name")?,
        serial_number: row.get("serial_number")?,
        ip_address: row.get("ip_address")?,
        description: row.get("description")?,
        is_managed: row.get::<_, i64>("is_managed")? != 0,
        software_info: row.get("software_info")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<NodeGroup> {
    let raw: String = row.get("resources_request")?;
    // A malformed accumulator reads back as empty rather than failing every query.
    let resources_request = serde_json::from_str(&raw).unwrap_or_default();
    Ok(NodeGroup {
        id: id_col(row, "id")?,
        group_name: row.get("group_name")?,
        description: row.get("description")?,
        resources_request,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn relation_from_row(row: &Row<'_>) -> rusqlite::Result<NodeRelation> {
    Ok(NodeRelation {
        group_id: id_col(row, "group_id")?,
        node_id: id_col(row, "node_id")?,
        created_at: row.get("created_at")?,
    })
}

impl Db<'_> {
    // ── Nodes ──────────────────────────────────────────────────────

    pub fn insert_node(&self, node: &NewNode) -> StateResult<u64> {
        let now = now_timestamp();
        self.execute(
            "INSERT INTO node_infos (node_name, unique_name, serial_number, ip_address, \
             description, is_managed, software_info, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '', ?7, ?7)",
            params![
                node.node_name,
                node.unique_name,
                node.serial_number,
                node.ip_address,
                node.description,
                node.is_managed as i64,
                now
            ],
        )?;
        let id = self.last_id();
        debug!(id, unique_name = %node.unique_name, managed = node.is_managed, "node stored");
        Ok(id)
    }

    pub fn get_node(&self, id: u64) -> StateResult<NodeInfo> {
        self.query_one(
            "SELECT * FROM node_infos WHERE id = ?1",
            [sql_id(id)],
            || format!("node {id}"),
            node_from_row,
        )
    }

    pub fn find_node_by_unique_name(&self, unique_name: &str) -> StateResult<Option<NodeInfo>> {
        self.query_opt(
            "SELECT * FROM node_infos WHERE unique_name = ?1",
            [unique_name],
            node_from_row,
        )
    }

    pub fn find_node_by_serial(&self, serial_number: &str) -> StateResult<Option<NodeInfo>> {
        self.query_opt(
            "SELECT * FROM node_infos WHERE serial_number = ?1 AND serial_number != ''",
            [serial_number],
            node_from_row,
        )
    }

    pub fn list_nodes(&self, managed: bool, query: &PageQuery) -> StateResult<Page<NodeInfo>> {
        let extra = if managed {
            "AND is_managed = 1"
        } else {
            "AND is_managed = 0"
        };
        self.page("node_infos", "node_name", extra, "id", query, node_from_row)
    }

    pub fn all_nodes(&self) -> StateResult<Vec<NodeInfo>> {
        self.query_all("SELECT * FROM node_infos ORDER BY id", [], node_from_row)
    }

    pub fn count_nodes(&self) -> StateResult<u64> {
        self.count("SELECT COUNT(*) FROM node_infos", [])
    }

    /// Update user-editable columns of a managed node. Returns rows affected.
    pub fn update_node(&self, id: u64, node_name: &str, description: &str) -> StateResult<usize> {
        self.execute(
            "UPDATE node_infos SET node_name = ?2, description = ?3, updated_at = ?4 \
             WHERE id = ?1 AND is_managed = 1",
            params![sql_id(id), node_name, description, now_timestamp()],
        )
    }

    /// Flip an unmanaged node to managed. Returns rows affected (0 if it
    /// was already managed or does not exist).
    pub fn promote_node(&self, id: u64, node_name: &str, description: &str) -> StateResult<usize> {
        self.execute(
            "UPDATE node_infos SET is_managed = 1, node_name = ?2, description = ?3, \
             updated_at = ?4 WHERE id = ?1 AND is_managed = 0",
            params![sql_id(id), node_name, description, now_timestamp()],
        )
    }

    pub fn update_node_software(&self, id: u64, software_info: &str) -> StateResult<usize> {
        self.execute(
            "UPDATE node_infos SET software_info = ?2, updated_at = ?3 WHERE id = ?1",
            params![sql_id(id), software_info, now_timestamp()],
        )
    }

    pub fn update_node_address(&self, id: u64, ip_address: &str) -> StateResult<usize> {
        self.execute(
            "UPDATE node_infos SET ip_address = ?2 WHERE id = ?1 AND ip_address != ?2",
            params![sql_id(id), ip_address],
        )
    }

    /// Drop every unmanaged row; the node informer re-creates them from the
    /// cluster on its next sync.
    pub fn delete_unmanaged_nodes(&self) -> StateResult<usize> {
        self.execute("DELETE FROM node_infos WHERE is_managed = 0", [])
    }

    /// Delete a node; its relations cascade. Returns true if it existed.
    pub fn delete_node(&self, id: u64) -> StateResult<bool> {
        let n = self.execute("DELETE FROM node_infos WHERE id = ?1", [sql_id(id)])?;
        debug!(id, existed = n > 0, "node deleted");
        Ok(n > 0)
    }

    // ── Node groups ────────────────────────────────────────────────

    pub fn insert_group(&self, group_name: &str, description: &str) -> StateResult<u64> {
        let now = now_timestamp();
        self.execute(
            "INSERT INTO node_groups (group_name, description, resources_request, created_at, \
             updated_at) VALUES (?1, ?2, '{}', ?3, ?3)",
            params![group_name, description, now],
        )?;
        Ok(self.last_id())
    }

    pub fn get_group(&self, id: u64) -> StateResult<NodeGroup> {
        self.query_one(
            "SELECT * FROM node_groups WHERE id = ?1",
            [sql_id(id)],
            || format!("node group {id}"),
            group_from_row,
        )
    }

    pub fn groups_by_ids(&self, ids: &[u64]) -> StateResult<Vec<NodeGroup>> {
        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(group) = self.query_opt(
                "SELECT * FROM node_groups WHERE id = ?1",
                [sql_id(*id)],
                group_from_row,
            )? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    pub fn list_groups(&self, query: &PageQuery) -> StateResult<Page<NodeGroup>> {
        self.page("node_groups", "group_name", "", "id", query, group_from_row)
    }

    pub fn all_groups(&self) -> StateResult<Vec<NodeGroup>> {
        self.query_all("SELECT * FROM node_groups ORDER BY id", [], group_from_row)
    }

    pub fn count_groups(&self) -> StateResult<u64> {
        self.count("SELECT COUNT(*) FROM node_groups", [])
    }

    pub fn update_group(&self, id: u64, group_name: &str, description: &str) -> StateResult<usize> {
        self.execute(
            "UPDATE node_groups SET group_name = ?2, description = ?3, updated_at = ?4 \
             WHERE id = ?1",
            params![sql_id(id), group_name, description, now_timestamp()],
        )
    }

    pub fn set_group_resources(&self, id: u64, resources: &ResourceList) -> StateResult<usize> {
        let json = serde_json::to_string(resources)?;
        self.execute(
            "UPDATE node_groups SET resources_request = ?2, updated_at = ?3 WHERE id = ?1",
            params![sql_id(id), json, now_timestamp()],
        )
    }

    /// Add (or, with `subtract`, remove) `per_pod` scaled by the group's
    /// member count. Returns the new total, or `None` if the group is gone.
    pub fn adjust_group_resources(
        &self,
        id: u64,
        per_pod: &ResourceList,
        subtract: bool,
    ) -> StateResult<Option<ResourceList>> {
        let mut total = match self.get_group(id) {
            Ok(group) => group.resources_request,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let delta = per_pod.scaled(self.count_group_members(id)?);
        if subtract {
            total.sub(&delta);
        } else {
            total.add(&delta);
        }
        self.set_group_resources(id, &total)?;
        Ok(Some(total))
    }

    /// Zero every group accumulator.
    pub fn reset_group_resources(&self) -> StateResult<usize> {
        self.execute("UPDATE node_groups SET resources_request = '{}'", [])
    }

    /// Delete a group; its relations cascade. Returns true if it existed.
    pub fn delete_group(&self, id: u64) -> StateResult<bool> {
        let n = self.execute("DELETE FROM node_groups WHERE id = ?1", [sql_id(id)])?;
        Ok(n > 0)
    }

    // ── Relations ──────────────────────────────────────────────────

    pub fn insert_relation(&self, group_id: u64, node_id: u64) -> StateResult<()> {
        self.execute(
            "INSERT INTO node_relations (group_id, node_id, created_at) VALUES (?1, ?2, ?3)",
            params![sql_id(group_id), sql_id(node_id), now_timestamp()],
        )?;
        Ok(())
    }

    /// Returns true if the relation existed.
    pub fn delete_relation(&self, group_id: u64, node_id: u64) -> StateResult<bool> {
        let n = self.execute(
            "DELETE FROM node_relations WHERE group_id = ?1 AND node_id = ?2",
            params![sql_id(group_id), sql_id(node_id)],
        )?;
        Ok(n > 0)
    }

    pub fn relations_of_group(&self, group_id: u64) -> StateResult<Vec<NodeRelation>> {
        self.query_all(
            "SELECT * FROM node_relations WHERE group_id = ?1 ORDER BY node_id",
            [sql_id(group_id)],
            relation_from_row,
        )
    }

    pub fn relations_of_node(&self, node_id: u64) -> StateResult<Vec<NodeRelation>> {
        self.query_all(
            "SELECT * FROM node_relations WHERE node_id = ?1 ORDER BY group_id",
            [sql_id(node_id)],
            relation_from_row,
        )
    }

    pub fn count_group_members(&self, group_id: u64) -> StateResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM node_relations WHERE group_id = ?1",
            [sql_id(group_id)],
        )
    }

    pub fn count_node_groups(&self, node_id: u64) -> StateResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM node_relations WHERE node_id = ?1",
            [sql_id(node_id)],
        )
    }

    /// Member nodes of a group.
    pub fn group_members(&self, group_id: u64) -> StateResult<Vec<NodeInfo>> {
        self.query_all(
            "SELECT n.* FROM node_infos n JOIN node_relations r ON r.node_id = n.id \
             WHERE r.group_id = ?1 ORDER BY n.id",
            [sql_id(group_id)],
            node_from_row,
        )
    }

    /// Groups a node belongs to.
    pub fn node_groups(&self, node_id: u64) -> StateResult<Vec<NodeGroup>> {
        self.query_all(
            "SELECT g.* FROM node_groups g JOIN node_relations r ON r.group_id = g.id \
             WHERE r.node_id = ?1 ORDER BY g.id",
            [sql_id(node_id)],
            group_from_row,
        )
    }
}
