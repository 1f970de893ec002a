use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

use super::types::AgentRow;
use super::{Store, now_timestamp, parse_timestamp};

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<AgentRow> {
    let created_at: String = row.get(2)?;
    let updated_at: String = row.get(3)?;
    Ok(AgentRow {
        name: row.get(0)?,
        settings_json: row.get(1)?,
        created_at: parse_timestamp(2, &created_at)?,
        updated_at: parse_timestamp(3, &updated_at)?,
    })
}

impl Store {
    /// Insert or replace an agent by name; an existing row keeps its `created_at`.
    pub async fn upsert_agent(&self, name: &str, settings_json: &str) -> Result<()> {
        let now = now_timestamp();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO agents (name, settings_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(name) DO UPDATE SET
                settings_json = excluded.settings_json,
                updated_at = excluded.updated_at",
            params![name, settings_json, now],
        )?;
        Ok(())
    }

    pub async fn get_agent_row(&self, name: &str) -> Result<Option<AgentRow>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                "SELECT name, settings_json, created_at, updated_at FROM agents WHERE name = ?1",
                params![name],
                agent_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub async fn list_agent_rows(&self) -> Result<Vec<AgentRow>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT name, settings_json, created_at, updated_at FROM agents ORDER BY name ASC",
        )?;
        let rows = stmt.query_map([], agent_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn delete_agent_row(&self, name: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute("DELETE FROM agents WHERE name = ?1", params![name])?;
        Ok(rows > 0)
    }
}
