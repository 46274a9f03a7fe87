//! SQLite schema. Every statement is idempotent so it runs on each open.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS node_infos (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    node_name     VARCHAR(255) NOT NULL UNIQUE,
    unique_name   VARCHAR(255) NOT NULL UNIQUE,
    serial_number VARCHAR(255) NOT NULL DEFAULT '',
    ip_address    VARCHAR(255) NOT NULL DEFAULT '',
    description   TEXT NOT NULL DEFAULT '',
    is_managed    INTEGER NOT NULL DEFAULT 0,
    software_info TEXT NOT NULL DEFAULT '',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS node_groups (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    group_name        VARCHAR(255) NOT NULL UNIQUE,
    description       TEXT NOT NULL DEFAULT '',
    resources_request TEXT NOT NULL DEFAULT '{}',
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS node_relations (
    group_id   INTEGER NOT NULL REFERENCES node_groups(id) ON DELETE CASCADE,
    node_id    INTEGER NOT NULL REFERENCES node_infos(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    PRIMARY KEY (group_id, node_id)
);
CREATE INDEX IF NOT EXISTS idx_node_relations_node ON node_relations(node_id);

CREATE TABLE IF NOT EXISTS app_infos (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    app_name    VARCHAR(255) NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    containers  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    modified_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS app_templates (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    app_name    VARCHAR(255) NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    containers  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    modified_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS app_daemon_sets (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    daemon_set_name  VARCHAR(255) NOT NULL UNIQUE,
    app_id           INTEGER NOT NULL REFERENCES app_infos(id),
    node_group_id    INTEGER NOT NULL REFERENCES node_groups(id),
    node_group_name  VARCHAR(255) NOT NULL,
    UNIQUE (app_id, node_group_id)
);

CREATE TABLE IF NOT EXISTS app_instances (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    pod_name         VARCHAR(255) NOT NULL UNIQUE,
    node_unique_name VARCHAR(255) NOT NULL,
    node_id          INTEGER NOT NULL,
    node_name        VARCHAR(255) NOT NULL,
    node_group_id    INTEGER NOT NULL,
    app_name         VARCHAR(255) NOT NULL,
    app_id           INTEGER NOT NULL,
    container_info   TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_app_instances_app ON app_instances(app_id);
CREATE INDEX IF NOT EXISTS idx_app_instances_group ON app_instances(node_group_id);

CREATE TABLE IF NOT EXISTS configmap_infos (
    configmap_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    configmap_name    VARCHAR(255) NOT NULL UNIQUE,
    description       TEXT NOT NULL DEFAULT '',
    configmap_content TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS token_infos (
    token       BLOB NOT NULL,
    salt        BLOB NOT NULL,
    expire_time INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS software_infos (
    key        VARCHAR(255) PRIMARY KEY,
    value      TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub const PRAGMAS_SQL: &str = r#"
PRAGMA foreign_keys = ON;
PRAGMA temp_store = MEMORY;
"#;

pub const FILE_PRAGMAS_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
"#;
