//! `controller_archive`: the authoritative historical record of every
//! non-log controller message, kept in its own database file so a reset of
//! the communication queue (spec §4.1's "delete the file and recreate")
//! can never take historical data down with it (spec §9, "Aggressive DB
//! recovery").

use super::{with_retry, SqliteStore, StoreError};

pub struct Archive {
    store: SqliteStore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedMessage {
    pub id: i64,
    pub timestamp_ms: i64,
    pub message: String,
}

/// Archive rows are streamed out in batches rather than loaded wholesale,
/// so `archive_republish_messages` on a large range doesn't hold the whole
/// result set in memory (spec §4.9).
const REPUBLISH_BATCH_SIZE: i64 = 200;

impl Archive {
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self, StoreError> {
        let store = SqliteStore::open(path)?;
        store.migrate(
            "CREATE TABLE IF NOT EXISTS controller_archive (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_ms INTEGER NOT NULL,
                message TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS controller_archive_ts_index
                ON controller_archive (timestamp_ms);",
        )?;
        Ok(Self { store })
    }

    pub fn insert(&self, timestamp_ms: i64, message: &str) -> Result<(), StoreError> {
        with_retry(&self.store, (), |conn| {
            conn.execute(
                "INSERT INTO controller_archive (timestamp_ms, message) VALUES (?1, ?2)",
                rusqlite::params![timestamp_ms, message],
            )?;
            Ok(())
        })
    }

    /// Rows with `timestamp_ms` strictly between `start` and `end`, in
    /// non-decreasing timestamp order, fetched one batch of
    /// [`REPUBLISH_BATCH_SIZE`] at a time via `offset`.
    pub fn batch_in_range(
        &self,
        start: i64,
        end: i64,
        offset: i64,
    ) -> Result<Vec<ArchivedMessage>, StoreError> {
        with_retry(&self.store, Vec::new(), |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp_ms, message FROM controller_archive
                 WHERE timestamp_ms > ?1 AND timestamp_ms < ?2
                 ORDER BY timestamp_ms ASC
                 LIMIT ?3 OFFSET ?4",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![start, end, REPUBLISH_BATCH_SIZE, offset],
                    |row| {
                        Ok(ArchivedMessage {
                            id: row.get(0)?,
                            timestamp_ms: row.get(1)?,
                            message: row.get(2)?,
                        })
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn count_in_range(&self, start: i64, end: i64) -> Result<i64, StoreError> {
        with_retry(&self.store, 0, |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM controller_archive WHERE timestamp_ms > ?1 AND timestamp_ms < ?2",
                rusqlite::params![start, end],
                |row| row.get(0),
            )
        })
    }

    pub fn discard_range(&self, start: i64, end: i64) -> Result<(), StoreError> {
        with_retry(&self.store, (), |conn| {
            conn.execute(
                "DELETE FROM controller_archive WHERE timestamp_ms > ?1 AND timestamp_ms < ?2",
                rusqlite::params![start, end],
            )?;
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

    fn seed(archive: &Archive) {
        for ts in [100, 200, 300, 400] {
            archive.insert(ts, &format!("{{\"n\":{ts}}}")).unwrap();
        }
    }

    #[test]
    fn range_is_exclusive_on_both_ends() {
        let archive = Archive::open(":memory:").unwrap();
        seed(&archive);
        let rows = archive.batch_in_range(150, 350, 0).unwrap();
        let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(timestamps, vec![200, 300]);
    }

    #[test]
    fn discard_range_only_removes_rows_strictly_inside() {
        let archive = Archive::open(":memory:").unwrap();
        seed(&archive);
        archive.discard_range(150, 350).unwrap();
        let remaining = archive.batch_in_range(0, 1000, 0).unwrap();
        let timestamps: Vec<i64> = remaining.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(timestamps, vec![100, 400]);
    }

    #[test]
    fn republish_batches_cover_more_than_one_page() {
        let archive = Archive::open(":memory:").unwrap();
        for ts in 0..450 {
            archive.insert(ts, "{}").unwrap();
        }
        let first = archive.batch_in_range(-1, 1000, 0).unwrap();
        assert_eq!(first.len(), 200);
        let second = archive.batch_in_range(-1, 1000, 200).unwrap();
        assert_eq!(second.len(), 200);
        let third = archive.batch_in_range(-1, 1000, 400).unwrap();
        assert_eq!(third.len(), 50);
    }
}
