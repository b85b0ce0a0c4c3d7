//! Record of which articles earlier runs already delivered.
//!
//! The on-disk ledger is a small SQLite file. A run loads it once into a
//! [`SeenRecord`], marks articles in memory, and writes everything back in a
//! single transaction at the end. Rows are only ever inserted, so the set of
//! guids per feed can only grow.

use crate::types::{AggregatorError, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous};
use sqlx::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SCHEMA_VERSION: &str = "1";

/// Delivered guids, keyed by feed identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenRecord {
    feeds: BTreeMap<String, BTreeSet<String>>,
}

impl SeenRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, feed_identifier: &str, guid: &str) -> bool {
        self.feeds
            .get(feed_identifier)
            .map(|guids| guids.contains(guid))
            .unwrap_or(false)
    }

    /// Returns `true` if the guid was not recorded before.
    pub fn mark_seen(&mut self, feed_identifier: &str, guid: &str) -> bool {
        self.feeds
            .entry(feed_identifier.to_string())
            .or_default()
            .insert(guid.to_string())
    }

    pub fn guids(&self, feed_identifier: &str) -> Option<&BTreeSet<String>> {
        self.feeds.get(feed_identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.feeds.iter()
    }

    /// Total number of guids across all feeds.
    pub fn len(&self) -> usize {
        self.feeds.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every guid in `other` is also in `self`.
    pub fn is_superset_of(&self, other: &SeenRecord) -> bool {
        other
            .iter()
            .all(|(feed, guids)| guids.iter().all(|guid| self.contains(feed, guid)))
    }
}

pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole ledger. A ledger that does not exist yet is empty; one
    /// that exists but cannot be read is reported as corrupt.
    pub async fn load(&self) -> Result<SeenRecord> {
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.len() == 0 => {
                debug!("Ledger {} is empty", self.path.display());
                return Ok(SeenRecord::new());
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No ledger at {}, treating every article as new", self.path.display());
                return Ok(SeenRecord::new());
            }
            Err(e) => return Err(self.corrupt(e)),
        }

        // Opened writable so a journal left by a crashed persist is rolled back.
        let mut conn = SqliteConnection::connect_with(&connect_options(&self.path))
            .await
            .map_err(|e| self.corrupt(e))?;

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT feed_identifier, guid FROM seen_articles")
                .fetch_all(&mut conn)
                .await
                .map_err(|e| self.corrupt(e))?;
        conn.close().await?;

        let mut record = SeenRecord::new();
        for (feed_identifier, guid) in rows {
            record.mark_seen(&feed_identifier, &guid);
        }

        info!(
            "Loaded ledger {}: {} guids across {} feeds",
            self.path.display(),
            record.len(),
            record.feeds.len()
        );
        Ok(record)
    }

    /// Write `record` back. Either every new guid lands or none does.
    ///
    /// Returns the number of guids that were not in the ledger before.
    pub async fn persist(&self, record: &SeenRecord) -> Result<u64> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = connect_options(&self.path).create_if_missing(true);
        let mut conn = SqliteConnection::connect_with(&options).await?;

        let mut tx = conn.begin().await?;
        let inserted = write_record(&mut *tx, record).await?;
        tx.commit().await?;
        conn.close().await?;

        info!("Persisted ledger {}: {} new guids", self.path.display(), inserted);
        Ok(inserted)
    }

    fn corrupt(&self, reason: impl std::fmt::Display) -> AggregatorError {
        warn!("Ledger {} is unreadable: {}", self.path.display(), reason);
        AggregatorError::LedgerCorrupt {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

// Rollback journal rather than WAL keeps the ledger a single file.
fn connect_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false)
        .journal_mode(SqliteJournalMode::Delete)
        .synchronous(SqliteSynchronous::Full)
}

async fn write_record(conn: &mut SqliteConnection, record: &SeenRecord) -> Result<u64> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ledger_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS seen_articles (
            feed_identifier TEXT NOT NULL,
            guid TEXT NOT NULL,
            first_seen_at TEXT NOT NULL,
            PRIMARY KEY (feed_identifier, guid)
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO ledger_meta (key, value) VALUES ('schema_version', ?1)")
        .bind(SCHEMA_VERSION)
        .execute(&mut *conn)
        .await?;

    let now = Utc::now().to_rfc3339();
    let mut inserted = 0;
    for (feed_identifier, guids) in record.iter() {
        for guid in guids {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO seen_articles (feed_identifier, guid, first_seen_at) VALUES (?1, ?2, ?3)",
            )
            .bind(feed_identifier)
            .bind(guid)
            .bind(&now)
            .execute(&mut *conn)
            .await?;
            inserted += result.rows_affected();
        }
    }

    Ok(inserted)
}

/// Exclusive marker that one run is in progress. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(ledger_path: &Path) -> Result<Self> {
        let path = ledger_path.with_extension("lock");
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                debug!("Acquired run lock {}", path.display());
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(AggregatorError::Locked { path }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove run lock {}: {}", self.path.display(), e);
        }
    }
}
