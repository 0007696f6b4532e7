//! Generation (named cache partition) bookkeeping.

use super::connection::CacheDb;
use crate::Error;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};
use tokio_rusqlite::params;

/// Look up a generation id by name inside an open connection.
pub(crate) fn generation_id(conn: &rusqlite::Connection, name: &str) -> Result<Option<i64>, Error> {
    conn.query_row("SELECT id FROM generations WHERE name = ?1", params![name], |row| row.get(0))
        .optional()
        .map_err(Error::from)
}

impl CacheDb {
    /// Create the generation if it does not exist yet.
    ///
    /// Returns true when a new generation was created.
    pub async fn open_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let created = conn.execute(
                    "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
                    params![name, chrono::Utc::now().to_rfc3339()],
                )?;
                Ok(created == 1)
            })
            .await
            .map_err(Error::from)
    }

    /// All generation names, oldest first.
    pub async fn generation_names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM generations ORDER BY id ASC")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn has_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> { Ok(generation_id(conn, &name)?.is_some()) })
            .await
            .map_err(Error::from)
    }

    /// Delete a generation and, through the cascade, all of its entries.
    ///
    /// Returns false if no such generation existed.
    pub async fn delete_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM generations WHERE name = ?1", params![name])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }
}
