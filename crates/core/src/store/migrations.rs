//! Schema migrations for the durable tier.
//!
//! Applied versions are recorded in `_migrations`; opening a store applies
//! whatever is newer than the highest recorded version, in order, each in its
//! own transaction.

use tokio_rusqlite::{Connection, params, rusqlite};

use crate::Error;

/// (version, SQL), ascending.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_entries.sql"))];

/// Bring the schema up to the latest version.
///
/// # Errors
///
/// `MigrationFailed` naming the version whose SQL did not apply.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current: i64 =
            conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

        for &(version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
            tracing::debug!(version, "applying migration");
            apply(conn, version, sql).map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}

fn apply(conn: &mut rusqlite::Connection, version: i64, sql: &str) -> Result<(), rusqlite::Error> {
    let tx = conn.transaction()?;
    tx.execute_batch(sql)?;
    tx.execute(
        "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
        params![version, chrono::Utc::now().to_rfc3339()],
    )?;
    tx.commit()
}
