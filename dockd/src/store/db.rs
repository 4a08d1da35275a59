use std::path::Path;
use anyhow::{Context, Result};
use rusqlite::{Connection, params, OptionalExtension};
use shared::types::{Dock, DockStatus};
use crate::store::seed::seed_docks;

const DOCK_COLUMNS: &str = "id, location, number, name, status";

pub struct DockDb {
    conn: Connection,
}

impl DockDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // In-memory databases answer "memory" here, which is fine
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .context("Failed to enable WAL mode")?;
        tracing::debug!("SQLite journal mode: {}", mode);

        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("Failed to set synchronous mode")?;

        // AUTOINCREMENT keeps ids from ever being reused
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS docks (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                location TEXT NOT NULL,
                number   INTEGER NOT NULL,
                name     TEXT,
                status   TEXT NOT NULL,
                UNIQUE(location, number)
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Write the fixed dock table if the store is empty. Returns the number of rows inserted.
    pub fn seed_if_empty(&self) -> Result<usize> {
        let existing: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM docks", [], |row| row.get(0))
            .context("Failed to count docks")?;

        if existing > 0 {
            tracing::info!("Found {} existing docks, skipping seed", existing);
            return Ok(0);
        }

        let seeds = seed_docks();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin seed transaction")?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO docks (location, number, name, status) VALUES (?1, ?2, ?3, ?4)")
                .context("Failed to prepare seed insert")?;
            for seed in &seeds {
                stmt.execute(params![
                    seed.location.as_str(),
                    seed.number,
                    seed.name,
                    DockStatus::Available.as_str(),
                ])
                .with_context(|| format!("Failed to seed {} dock {}", seed.location, seed.number))?;
            }
        }
        tx.commit().context("Failed to commit seed transaction")?;

        tracing::info!("Seeded {} docks", seeds.len());
        Ok(seeds.len())
    }

    /// Get all docks ordered by id
    pub fn get_all_docks(&self) -> Result<Vec<Dock>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {DOCK_COLUMNS} FROM docks ORDER BY id"))
            .context("Failed to prepare query")?;

        let docks = stmt
            .query_map([], Self::row_to_dock)
            .context("Failed to query docks")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect docks")?;

        Ok(docks)
    }

    /// Get a single dock by id
    pub fn get_dock(&self, id: i64) -> Result<Option<Dock>> {
        let dock = self
            .conn
            .query_row(
                &format!("SELECT {DOCK_COLUMNS} FROM docks WHERE id = ?1"),
                params![id],
                Self::row_to_dock,
            )
            .optional()
            .context("Failed to query dock")?;

        Ok(dock)
    }

    /// Set a dock's status and return the new row, or `None` if no dock has this id.
    /// One statement, so there is no window between the write and the read-back.
    pub fn update_status(&self, id: i64, status: DockStatus) -> Result<Option<Dock>> {
        let dock = self
            .conn
            .query_row(
                &format!("UPDATE docks SET status = ?1 WHERE id = ?2 RETURNING {DOCK_COLUMNS}"),
                params![status.as_str(), id],
                Self::row_to_dock,
            )
            .optional()
            .context("Failed to update dock status")?;

        Ok(dock)
    }

    fn row_to_dock(row: &rusqlite::Row) -> Result<Dock, rusqlite::Error> {
        let location: String = row.get(1)?;
        let status: String = row.get(4)?;

        let location = location.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let status = status.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Dock {
            id: row.get(0)?,
            location,
            number: row.get(2)?,
            name: row.get(3)?,
            status,
        })
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::DockLocation;

    fn seeded() -> DockDb {
        let db = DockDb::open(":memory:").unwrap();
        db.seed_if_empty().unwrap();
        db
    }

    #[test]
    fn test_seed_is_idempotent() {
        let db = DockDb::open(":memory:").unwrap();
        assert_eq!(db.seed_if_empty().unwrap(), 24);
        assert_eq!(db.seed_if_empty().unwrap(), 0);
        assert_eq!(db.get_all_docks().unwrap().len(), 24);
    }

    #[test]
    fn test_list_is_ordered_and_available() {
        let db = seeded();
        let docks = db.get_all_docks().unwrap();

        assert!(docks.windows(2).all(|w| w[0].id < w[1].id));
        assert!(docks.iter().all(|d| d.status == DockStatus::Available));

        let first = &docks[0];
        assert_eq!(first.location, DockLocation::Southeast);
        assert_eq!(first.number, 1);
        assert_eq!(first.name, None);

        let h84 = docks.iter().find(|d| d.name.as_deref() == Some("H84")).unwrap();
        assert_eq!(h84.location, DockLocation::Southwest);
        assert_eq!(h84.number, 1);
    }

    #[test]
    fn test_update_status_returns_new_row() {
        let db = seeded();
        let target = db.get_all_docks().unwrap()[5].clone();

        let updated = db.update_status(target.id, DockStatus::OutOfService).unwrap().unwrap();
        assert_eq!(updated.id, target.id);
        assert_eq!(updated.status, DockStatus::OutOfService);
        assert_eq!(updated.location, target.location);
        assert_eq!(updated.number, target.number);

        let reread = db.get_dock(target.id).unwrap().unwrap();
        assert_eq!(reread, updated);
    }

    #[test]
    fn test_update_missing_dock() {
        let db = seeded();
        assert!(db.update_status(9999, DockStatus::Occupied).unwrap().is_none());
        assert!(db.get_dock(9999).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_status_is_an_error() {
        let db = seeded();
        db.execute_raw("UPDATE docks SET status = 'flooded' WHERE id = 1").unwrap();
        assert!(db.get_all_docks().is_err());
    }
}
