//! SQL migration definitions for the sitesort database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: classification_results, batch_metadata",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per classified domain per batch
CREATE TABLE IF NOT EXISTS classification_results (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    domain               TEXT NOT NULL,
    classification_label TEXT NOT NULL,
    summary              TEXT NOT NULL,
    confidence_level     REAL NOT NULL,
    snippet              TEXT NOT NULL DEFAULT '',
    extraction_method    TEXT NOT NULL,
    processed_at         TEXT NOT NULL,
    batch_id             TEXT NOT NULL,
    created_at           TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_results_domain ON classification_results(domain);
CREATE INDEX IF NOT EXISTS idx_results_label ON classification_results(classification_label);
CREATE INDEX IF NOT EXISTS idx_results_batch ON classification_results(batch_id);
CREATE INDEX IF NOT EXISTS idx_results_processed_at ON classification_results(processed_at);

-- Batch runs and their final counters
CREATE TABLE IF NOT EXISTS batch_metadata (
    batch_id      TEXT PRIMARY KEY,
    total_domains INTEGER NOT NULL,
    config_json   TEXT NOT NULL,
    started_at    TEXT NOT NULL,
    completed_at  TEXT,
    status        TEXT NOT NULL DEFAULT 'processing',
    processed     INTEGER NOT NULL DEFAULT 0,
    succeeded     INTEGER NOT NULL DEFAULT 0,
    failed        INTEGER NOT NULL DEFAULT 0,
    skipped       INTEGER NOT NULL DEFAULT 0
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
