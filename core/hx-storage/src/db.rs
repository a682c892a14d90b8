//! Database open and schema initialization.

use crate::error::StorageResult;
use duckdb::Connection;
use std::path::Path;

/// Opens or creates the database at `path`, creating the parent directory
/// and running schema initialization.
pub fn open(path: &Path) -> StorageResult<Connection> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    // Cap memory/threads — DuckDB defaults to ~80% RAM per connection
    conn.execute_batch("PRAGMA memory_limit='256MB'; PRAGMA threads=2;")?;
    initialize_schema(&conn)?;
    Ok(conn)
}

/// Opens an in-memory database (for testing).
pub fn open_in_memory() -> StorageResult<Connection> {
    let conn = Connection::open_in_memory()?;
    initialize_schema(&conn)?;
    Ok(conn)
}

fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE SEQUENCE IF NOT EXISTS hx_event_ids;
        CREATE SEQUENCE IF NOT EXISTS hx_cmd_ids;
        CREATE SEQUENCE IF NOT EXISTS hx_artifact_ids;

        CREATE TABLE IF NOT EXISTS sessions (
            session_id VARCHAR PRIMARY KEY,
            started_at DOUBLE NOT NULL,
            ended_at DOUBLE,
            host VARCHAR NOT NULL,
            tty VARCHAR,
            shell VARCHAR DEFAULT 'zsh',
            initial_cwd VARCHAR,
            origin VARCHAR NOT NULL DEFAULT 'live',
            pinned BOOLEAN NOT NULL DEFAULT FALSE
        );

        CREATE TABLE IF NOT EXISTS command_dict (
            cmd_id BIGINT PRIMARY KEY DEFAULT nextval('hx_cmd_ids'),
            cmd_hash VARCHAR UNIQUE NOT NULL,
            cmd_text VARCHAR NOT NULL,
            first_seen_at DOUBLE NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cmd_hash ON command_dict(cmd_hash);

        CREATE TABLE IF NOT EXISTS events (
            event_id BIGINT PRIMARY KEY DEFAULT nextval('hx_event_ids'),
            session_id VARCHAR NOT NULL,
            seq BIGINT NOT NULL,
            started_at DOUBLE NOT NULL,
            ended_at DOUBLE,
            duration_ms BIGINT,
            exit_code INTEGER,
            pipe_status_json VARCHAR DEFAULT '[]',
            cwd VARCHAR,
            cmd_id BIGINT,
            origin VARCHAR NOT NULL DEFAULT 'live',
            UNIQUE(session_id, seq)
        );
        CREATE INDEX IF NOT EXISTS idx_events_session_seq ON events(session_id, seq);
        CREATE INDEX IF NOT EXISTS idx_events_started ON events(started_at);

        -- Derived full-text companion, maintained on every insert/delete path.
        CREATE TABLE IF NOT EXISTS events_fts (
            event_id BIGINT PRIMARY KEY,
            cmd_text VARCHAR,
            cwd VARCHAR
        );

        CREATE TABLE IF NOT EXISTS blobs (
            sha256 VARCHAR PRIMARY KEY,
            storage_path VARCHAR NOT NULL,
            byte_len BIGINT NOT NULL,
            compression VARCHAR DEFAULT 'zstd',
            created_at DOUBLE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS artifacts (
            artifact_id BIGINT PRIMARY KEY DEFAULT nextval('hx_artifact_ids'),
            created_at DOUBLE NOT NULL,
            kind VARCHAR,
            sha256 VARCHAR NOT NULL,
            byte_len BIGINT NOT NULL,
            blob_path VARCHAR NOT NULL,
            linked_session_id VARCHAR,
            linked_event_id BIGINT,
            summary VARCHAR
        );
        CREATE INDEX IF NOT EXISTS idx_artifacts_linked ON artifacts(linked_session_id);

        CREATE TABLE IF NOT EXISTS sync_vaults (
            vault_id VARCHAR PRIMARY KEY,
            name VARCHAR,
            store_type VARCHAR NOT NULL,
            store_path VARCHAR,
            encrypt BOOLEAN NOT NULL DEFAULT TRUE
        );

        CREATE TABLE IF NOT EXISTS sync_published_events (
            event_id BIGINT NOT NULL,
            vault_id VARCHAR NOT NULL,
            node_id VARCHAR NOT NULL,
            segment_id VARCHAR NOT NULL,
            PRIMARY KEY (event_id, vault_id)
        );

        CREATE TABLE IF NOT EXISTS sync_published_tombstones (
            tombstone_id VARCHAR NOT NULL,
            vault_id VARCHAR NOT NULL,
            node_id VARCHAR NOT NULL,
            created_at DOUBLE NOT NULL,
            PRIMARY KEY (tombstone_id, vault_id)
        );

        CREATE TABLE IF NOT EXISTS imported_segments (
            vault_id VARCHAR NOT NULL,
            node_id VARCHAR NOT NULL,
            segment_id VARCHAR NOT NULL,
            segment_hash VARCHAR,
            imported_at DOUBLE NOT NULL,
            PRIMARY KEY (vault_id, node_id, segment_id)
        );

        CREATE TABLE IF NOT EXISTS applied_tombstones (
            tombstone_id VARCHAR NOT NULL,
            vault_id VARCHAR NOT NULL,
            applied_at DOUBLE NOT NULL,
            node_id VARCHAR,
            start_ts DOUBLE NOT NULL,
            end_ts DOUBLE NOT NULL,
            PRIMARY KEY (tombstone_id, vault_id)
        );

        CREATE TABLE IF NOT EXISTS sync_node_manifests (
            vault_id VARCHAR NOT NULL,
            node_id VARCHAR NOT NULL,
            manifest_seq BIGINT NOT NULL,
            applied_at DOUBLE NOT NULL,
            PRIMARY KEY (vault_id, node_id)
        );
        "#,
    )?;
    Ok(())
}
