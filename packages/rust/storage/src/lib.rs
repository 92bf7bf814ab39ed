//! libSQL storage layer for classification results and batch metadata.
//!
//! The [`Storage`] struct wraps a local libSQL database holding one row per
//! classified domain per batch, plus one row per batch run.
//!
//! **Access rules:**
//! - Pipeline runs: read-write via [`Storage::open`]. Writes are serialized
//!   through a single async lock; reads run concurrently.
//! - Reporting commands: read-only via [`Storage::open_readonly`]

mod export;
mod migrations;

pub use export::{CSV_COLUMNS, export_results_csv, write_results_csv};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Value, params, params_from_iter};
use serde::Serialize;
use tokio::sync::Mutex;

use sitesort_shared::{
    BatchId, BatchRecord, BatchStatus, ClassificationLabel, ClassificationResult, Domain,
    ExtractionMethod, ProcessingConfig, Result, SitesortError,
};

/// Columns selected for [`row_to_result`], in order.
const RESULT_COLUMNS: &str = "domain, classification_label, summary, confidence_level, snippet, \
     extraction_method, processed_at, batch_id";

/// Columns selected for [`row_to_batch`], in order.
const BATCH_COLUMNS: &str = "batch_id, total_domains, config_json, started_at, completed_at, \
     status, processed, succeeded, failed, skipped";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    path: PathBuf,
    readonly: bool,
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SitesortError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            path: path.to_path_buf(),
            readonly: false,
            write_lock: Mutex::new(()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SitesortError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            path: path.to_path_buf(),
            readonly: true,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        SitesortError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SitesortError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    async fn count(&self, sql: &str, values: Vec<Value>) -> Result<u64> {
        let mut rows = self
            .conn
            .query(sql, params_from_iter(values))
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row
                .get::<i64>(0)
                .map_err(|e| SitesortError::Storage(e.to_string()))? as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(SitesortError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Result operations
    // -----------------------------------------------------------------------

    /// Append one classification result. Returns the new row id.
    pub async fn insert_result(&self, result: &ClassificationResult) -> Result<i64> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        self.conn
            .execute(
                "INSERT INTO classification_results
                 (domain, classification_label, summary, confidence_level, snippet,
                  extraction_method, processed_at, batch_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    result.domain.as_str(),
                    result.classification_label.as_str(),
                    result.summary.as_str(),
                    result.confidence_level,
                    result.snippet.as_str(),
                    result.extraction_method.as_str(),
                    result.processed_at.to_rfc3339(),
                    result.batch_id.as_str(),
                ],
            )
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent non-`Error` result for `domain`, if any.
    pub async fn get_existing(&self, domain: &Domain) -> Result<Option<ClassificationResult>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM classification_results
                     WHERE domain = ?1 AND classification_label != 'Error'
                     ORDER BY processed_at DESC, id DESC LIMIT 1"
                ),
                params![domain.as_str()],
            )
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_result(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(SitesortError::Storage(e.to_string())),
        }
    }

    /// Query results with optional filters, newest first.
    pub async fn get_results(&self, filter: &ResultFilter) -> Result<Vec<ClassificationResult>> {
        let mut sql = format!("SELECT {RESULT_COLUMNS} FROM classification_results WHERE 1=1");
        let mut values: Vec<Value> = Vec::new();

        if let Some(domain) = &filter.domain {
            values.push(Value::Text(format!("%{}%", domain.to_lowercase())));
            sql.push_str(&format!(" AND domain LIKE ?{}", values.len()));
        }
        if let Some(label) = filter.label {
            values.push(Value::Text(label.as_str().to_string()));
            sql.push_str(&format!(" AND classification_label = ?{}", values.len()));
        }
        if let Some(batch_id) = &filter.batch_id {
            values.push(Value::Text(batch_id.as_str().to_string()));
            sql.push_str(&format!(" AND batch_id = ?{}", values.len()));
        }
        if let Some(min_confidence) = filter.min_confidence {
            values.push(Value::Real(min_confidence));
            sql.push_str(&format!(" AND confidence_level >= ?{}", values.len()));
        }

        sql.push_str(" ORDER BY processed_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            values.push(Value::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
            values.push(Value::Integer(filter.offset as i64));
            sql.push_str(&format!(" OFFSET ?{}", values.len()));
        }

        let mut rows = self
            .conn
            .query(&sql, params_from_iter(values))
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_result(&row)?);
        }
        Ok(results)
    }

    /// Result counts, overall or for one batch.
    pub async fn get_statistics(&self, batch_id: Option<&BatchId>) -> Result<Statistics> {
        let (filter, values) = match batch_id {
            Some(id) => (
                " WHERE batch_id = ?1",
                vec![Value::Text(id.as_str().to_string())],
            ),
            None => ("", Vec::new()),
        };

        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT classification_label, COUNT(*) FROM classification_results{filter}
                     GROUP BY classification_label"
                ),
                params_from_iter(values.clone()),
            )
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        let mut by_label = BTreeMap::new();
        while let Ok(Some(row)) = rows.next().await {
            let label = row
                .get::<String>(0)
                .map_err(|e| SitesortError::Storage(e.to_string()))?;
            let count = row
                .get::<i64>(1)
                .map_err(|e| SitesortError::Storage(e.to_string()))?;
            by_label.insert(label, count as u64);
        }

        let total = self
            .count(
                &format!("SELECT COUNT(*) FROM classification_results{filter}"),
                values,
            )
            .await?;

        Ok(Statistics { total, by_label })
    }

    /// Keep only the newest row per domain. Returns the number of rows removed.
    pub async fn remove_duplicate_results(&self) -> Result<u64> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let removed = self
            .conn
            .execute(
                "DELETE FROM classification_results WHERE id NOT IN (
                     SELECT MAX(id) FROM classification_results GROUP BY domain
                 )",
                params![],
            )
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        tracing::info!(removed, "removed duplicate results");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Batch operations
    // -----------------------------------------------------------------------

    /// Record a newly started batch.
    pub async fn create_batch(&self, batch: &BatchRecord) -> Result<()> {
        self.check_writable()?;
        let config_json = serde_json::to_string(&batch.config)
            .map_err(|e| SitesortError::Storage(format!("failed to encode config: {e}")))?;

        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO batch_metadata
                 (batch_id, total_domains, config_json, started_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    batch.batch_id.as_str(),
                    batch.total_domains as i64,
                    config_json,
                    batch.started_at.to_rfc3339(),
                    batch.status.as_str(),
                ],
            )
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Write a batch's final counters, status and completion time.
    pub async fn complete_batch(&self, batch: &BatchRecord) -> Result<()> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let updated = self
            .conn
            .execute(
                "UPDATE batch_metadata
                 SET completed_at = ?2, status = ?3, processed = ?4,
                     succeeded = ?5, failed = ?6, skipped = ?7
                 WHERE batch_id = ?1",
                params![
                    batch.batch_id.as_str(),
                    batch.completed_at.map(|t| t.to_rfc3339()),
                    batch.status.as_str(),
                    batch.processed as i64,
                    batch.succeeded as i64,
                    batch.failed as i64,
                    batch.skipped as i64,
                ],
            )
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        if updated == 0 {
            return Err(SitesortError::Storage(format!(
                "batch {} not found",
                batch.batch_id
            )));
        }
        Ok(())
    }

    /// Get one batch by id.
    pub async fn get_batch(&self, batch_id: &BatchId) -> Result<Option<BatchRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {BATCH_COLUMNS} FROM batch_metadata WHERE batch_id = ?1"),
                params![batch_id.as_str()],
            )
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_batch(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(SitesortError::Storage(e.to_string())),
        }
    }

    /// All batches with their stored result counts, newest first.
    pub async fn list_batches(&self) -> Result<Vec<BatchSummary>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {BATCH_COLUMNS},
                            (SELECT COUNT(*) FROM classification_results r
                             WHERE r.batch_id = b.batch_id)
                     FROM batch_metadata b
                     ORDER BY started_at DESC"
                ),
                params![],
            )
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        let mut batches = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let record = row_to_batch(&row)?;
            let result_count = row
                .get::<i64>(10)
                .map_err(|e| SitesortError::Storage(e.to_string()))?;
            batches.push(BatchSummary {
                record,
                result_count: result_count as u64,
            });
        }
        Ok(batches)
    }

    /// Delete a batch and its results. Returns the number of results removed.
    pub async fn delete_batch(&self, batch_id: &BatchId) -> Result<u64> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let removed = self
            .conn
            .execute(
                "DELETE FROM classification_results WHERE batch_id = ?1",
                params![batch_id.as_str()],
            )
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        self.conn
            .execute(
                "DELETE FROM batch_metadata WHERE batch_id = ?1",
                params![batch_id.as_str()],
            )
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        tracing::info!(%batch_id, removed, "deleted batch");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// File location, size and row counts.
    pub async fn database_info(&self) -> Result<DatabaseInfo> {
        let size_bytes = std::fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|e| SitesortError::io(&self.path, e))?;

        Ok(DatabaseInfo {
            path: self.path.clone(),
            size_bytes,
            total_results: self
                .count("SELECT COUNT(*) FROM classification_results", Vec::new())
                .await?,
            total_batches: self
                .count("SELECT COUNT(*) FROM batch_metadata", Vec::new())
                .await?,
            schema_version: self.get_schema_version().await,
        })
    }

    /// Reclaim unused space in the database file.
    pub async fn vacuum(&self) -> Result<()> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute("VACUUM", params![])
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Delete every result and batch. Returns what was removed.
    pub async fn clear_all(&self) -> Result<ClearedCounts> {
        self.check_writable()?;

        let results = self
            .count("SELECT COUNT(*) FROM classification_results", Vec::new())
            .await?;
        let batches = self
            .count("SELECT COUNT(*) FROM batch_metadata", Vec::new())
            .await?;

        let _guard = self.write_lock.lock().await;
        self.conn
            .execute_batch(
                "DELETE FROM classification_results;
                 DELETE FROM batch_metadata;
                 DELETE FROM sqlite_sequence WHERE name = 'classification_results';",
            )
            .await
            .map_err(|e| SitesortError::Storage(e.to_string()))?;

        tracing::info!(results, batches, "cleared database");
        Ok(ClearedCounts { results, batches })
    }
}

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// Filters for [`Storage::get_results`].
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    /// Substring match on the domain.
    pub domain: Option<String>,
    pub label: Option<ClassificationLabel>,
    pub batch_id: Option<BatchId>,
    pub min_confidence: Option<f64>,
    pub limit: Option<u64>,
    /// Only applied together with `limit`.
    pub offset: u64,
}

/// Result counts by label.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub total: u64,
    pub by_label: BTreeMap<String, u64>,
}

/// A batch row with the number of results currently stored for it.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    #[serde(flatten)]
    pub record: BatchRecord,
    pub result_count: u64,
}

/// Overview of the database file.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub total_results: u64,
    pub total_batches: u64,
    pub schema_version: u32,
}

/// Rows removed by [`Storage::clear_all`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClearedCounts {
    pub results: u64,
    pub batches: u64,
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SitesortError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row selected with [`RESULT_COLUMNS`].
fn row_to_result(row: &libsql::Row) -> Result<ClassificationResult> {
    let label: String = row
        .get(1)
        .map_err(|e| SitesortError::Storage(e.to_string()))?;
    let method: String = row
        .get(5)
        .map_err(|e| SitesortError::Storage(e.to_string()))?;
    let processed_at: String = row
        .get(6)
        .map_err(|e| SitesortError::Storage(e.to_string()))?;

    Ok(ClassificationResult {
        domain: Domain::new(
            row.get::<String>(0)
                .map_err(|e| SitesortError::Storage(e.to_string()))?,
        ),
        classification_label: label
            .parse::<ClassificationLabel>()
            .map_err(|e| SitesortError::Storage(e.cause()))?,
        summary: row
            .get::<String>(2)
            .map_err(|e| SitesortError::Storage(e.to_string()))?,
        confidence_level: row
            .get::<f64>(3)
            .map_err(|e| SitesortError::Storage(e.to_string()))?,
        snippet: row.get::<String>(4).unwrap_or_default(),
        extraction_method: method
            .parse::<ExtractionMethod>()
            .map_err(|e| SitesortError::Storage(e.cause()))?,
        processed_at: parse_timestamp(&processed_at)?,
        batch_id: BatchId::from(
            row.get::<String>(7)
                .map_err(|e| SitesortError::Storage(e.to_string()))?,
        ),
    })
}

/// Convert a database row selected with [`BATCH_COLUMNS`].
fn row_to_batch(row: &libsql::Row) -> Result<BatchRecord> {
    let config_json: String = row
        .get(2)
        .map_err(|e| SitesortError::Storage(e.to_string()))?;
    let config: ProcessingConfig = serde_json::from_str(&config_json)
        .map_err(|e| SitesortError::Storage(format!("invalid batch config: {e}")))?;
    let started_at: String = row
        .get(3)
        .map_err(|e| SitesortError::Storage(e.to_string()))?;
    let status: String = row
        .get(5)
        .map_err(|e| SitesortError::Storage(e.to_string()))?;
    let counter = |idx: i32| -> Result<usize> {
        row.get::<i64>(idx)
            .map(|v| v as usize)
            .map_err(|e| SitesortError::Storage(e.to_string()))
    };

    Ok(BatchRecord {
        batch_id: BatchId::from(
            row.get::<String>(0)
                .map_err(|e| SitesortError::Storage(e.to_string()))?,
        ),
        total_domains: counter(1)?,
        config,
        started_at: parse_timestamp(&started_at)?,
        completed_at: match row.get::<String>(4).ok() {
            Some(s) => Some(parse_timestamp(&s)?),
            None => None,
        },
        status: status
            .parse::<BatchStatus>()
            .map_err(|e| SitesortError::Storage(e.cause()))?,
        processed: counter(6)?,
        succeeded: counter(7)?,
        failed: counter(8)?,
        skipped: counter(9)?,
    })
}
