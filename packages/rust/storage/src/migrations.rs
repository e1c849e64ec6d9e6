//! SQL migration definitions for the cvportal database.
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
    vec![
        Migration {
            version: 1,
            description: "Initial schema: jobs, portal_configs",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Generation jobs: the parsed profile plus the companion status document
CREATE TABLE IF NOT EXISTS jobs (
    id                TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL,
    profile_json      TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'parsed',
    portal_data_json  TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_user_id ON jobs(user_id);

-- One portal document per job, keyed portal-{jobId}
CREATE TABLE IF NOT EXISTS portal_configs (
    id          TEXT PRIMARY KEY,
    job_id      TEXT NOT NULL,
    status      TEXT NOT NULL,
    config_json TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_portal_configs_job ON portal_configs(job_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Stored chunk embeddings per job",
            sql: r#"
CREATE TABLE IF NOT EXISTS embeddings (
    id            TEXT PRIMARY KEY,
    job_id        TEXT NOT NULL,
    chunk_key     TEXT NOT NULL,
    content       TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    vector_json   TEXT NOT NULL,
    dimension     INTEGER NOT NULL,
    tokens        INTEGER NOT NULL,
    created_at    TEXT NOT NULL,
    UNIQUE(job_id, chunk_key)
);

CREATE INDEX IF NOT EXISTS idx_embeddings_job ON embeddings(job_id);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
