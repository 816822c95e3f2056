//! `log_buffer`: holds telemetry-shaped log records that failed to publish
//! live, drained in insertion order once the broker is reachable again
//! (spec §3, §4.3).

use super::{with_retry, SqliteStore, StoreError};

pub struct LogBuffer {
    store: SqliteStore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedLog {
    pub id: i64,
    pub log_level: String,
    pub message: String,
    pub timestamp_ms: i64,
}

impl LogBuffer {
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self, StoreError> {
        let store = SqliteStore::open(path)?;
        store.migrate(
            "CREATE TABLE IF NOT EXISTS log_buffer (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                log_level TEXT NOT NULL,
                message TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL
            );",
        )?;
        Ok(Self { store })
    }

    pub fn has_rows(&self) -> bool {
        self.store.has_rows("log_buffer")
    }

    pub fn push(&self, log_level: &str, message: &str, timestamp_ms: i64) -> Result<(), StoreError> {
        with_retry(&self.store, (), |conn| {
            conn.execute(
                "INSERT INTO log_buffer (log_level, message, timestamp_ms) VALUES (?1, ?2, ?3)",
                rusqlite::params![log_level, message, timestamp_ms],
            )?;
            Ok(())
        })
    }

    pub fn oldest(&self) -> Result<Option<BufferedLog>, StoreError> {
        with_retry(&self.store, None, |conn| {
            conn.query_row(
                "SELECT id, log_level, message, timestamp_ms FROM log_buffer ORDER BY id LIMIT 1",
                [],
                |row| {
                    Ok(BufferedLog {
                        id: row.get(0)?,
                        log_level: row.get(1)?,
                        message: row.get(2)?,
                        timestamp_ms: row.get(3)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(None) } else { Err(e) })
        })
    }

    pub fn delete(&self, id: i64) -> Result<(), StoreError> {
        with_retry(&self.store, (), |conn| {
            conn.execute("DELETE FROM log_buffer WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn close(&self) {
        self.store.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_insertion_order() {
        let buf = LogBuffer::open(":memory:").unwrap();
        buf.push("INFO", "first", 100).unwrap();
        buf.push("WARN", "second", 101).unwrap();

        let first = buf.oldest().unwrap().unwrap();
        assert_eq!(first.message, "first");
        buf.delete(first.id).unwrap();

        let second = buf.oldest().unwrap().unwrap();
        assert_eq!(second.message, "second");
        buf.delete(second.id).unwrap();

        assert!(!buf.has_rows());
    }
}
