use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use vulnboard_core::FilterState;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS filter_profiles (
  name TEXT PRIMARY KEY,
  search_query TEXT NOT NULL,
  filters_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
";

const MIGRATION_002_CREATE_V2_TABLES_SQL: &str = r"
CREATE TABLE IF NOT EXISTS filter_profiles_v2 (
  name TEXT PRIMARY KEY,
  search_query TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profile_filters_v2 (
  profile_name TEXT NOT NULL,
  filter_id TEXT NOT NULL,
  PRIMARY KEY (profile_name, filter_id),
  FOREIGN KEY (profile_name) REFERENCES filter_profiles_v2(name) ON DELETE CASCADE
);
";

const MIGRATION_002_REPLACE_TABLES_SQL: &str = r"
DROP TABLE filter_profiles;

ALTER TABLE filter_profiles_v2 RENAME TO filter_profiles;
ALTER TABLE profile_filters_v2 RENAME TO profile_filters;
";

const MIGRATION_002_FINAL_INDEXES_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_profile_filters_profile ON profile_filters(profile_name);
";

/// SQLite-backed persistence for named filter profiles: snapshots of a
/// session's active predicate set and search query, applied back onto an
/// engine at startup. Datasets and filtered results are never persisted.
pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterProfile {
    pub name: String,
    pub search_query: String,
    pub active_filters: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl FilterProfile {
    /// Rebuild the engine-facing filter state this profile snapshots.
    #[must_use]
    pub fn to_state(&self) -> FilterState {
        FilterState::from_parts(self.search_query.clone(), self.active_filters.iter().cloned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed profile store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step
    /// fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 2 {
            self.apply_migration_2()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn bootstrap_schema_version(&self) -> Result<i64> {
        let has_profiles = table_exists(&self.conn, "filter_profiles")?;

        if !has_profiles {
            apply_migration_1(&self.conn)?;
            return Ok(1);
        }

        if table_has_column(&self.conn, "filter_profiles", "filters_json")? {
            // Legacy v1 table exists; mark version 1 and allow the standard
            // v2 upgrade.
            record_schema_version(&self.conn, 1)?;
            return Ok(1);
        }

        // Database already in v2 shape (created by an older scaffold) but
        // missing migration records.
        record_schema_version(&self.conn, 1)?;
        record_schema_version(&self.conn, 2)?;
        Ok(2)
    }

    fn apply_migration_2(&mut self) -> Result<()> {
        if !table_has_column(&self.conn, "filter_profiles", "filters_json")? {
            record_schema_version(&self.conn, 2)?;
            return Ok(());
        }

        let tx = self.conn.transaction().context("failed to start migration v2 transaction")?;

        tx.execute_batch(MIGRATION_002_CREATE_V2_TABLES_SQL)
            .context("failed to create v2 staging tables")?;

        {
            let mut stmt = tx.prepare(
                "SELECT name, search_query, filters_json, created_at, updated_at
                 FROM filter_profiles
                 ORDER BY name ASC",
            )?;

            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;

            for row in rows {
                let (name, search_query, filters_json, created_at, updated_at) = row?;
                let filters: Vec<String> = serde_json::from_str(&filters_json)
                    .with_context(|| format!("invalid filters_json for profile `{name}`"))?;

                tx.execute(
                    "INSERT INTO filter_profiles_v2(name, search_query, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![name, search_query, created_at, updated_at],
                )
                .context("failed to copy profile to v2 table")?;

                for filter_id in filters {
                    tx.execute(
                        "INSERT OR IGNORE INTO profile_filters_v2(profile_name, filter_id)
                         VALUES (?1, ?2)",
                        params![name, filter_id],
                    )
                    .context("failed to copy profile filter to v2 table")?;
                }
            }
        }

        tx.execute_batch(MIGRATION_002_REPLACE_TABLES_SQL)
            .context("failed to replace legacy v1 tables")?;
        tx.execute_batch(MIGRATION_002_FINAL_INDEXES_SQL)
            .context("failed to create v2 indexes")?;

        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![2_i64, now_rfc3339()?],
        )
        .context("failed to record schema version 2")?;

        tx.commit().context("failed to commit migration v2 transaction")
    }

    /// Upsert one named profile from the given filter state. A re-save keeps
    /// the original `created_at` and replaces the filter rows.
    ///
    /// # Errors
    /// Returns an error when the name is empty or persistence fails.
    pub fn save_profile(&mut self, name: &str, state: &FilterState) -> Result<FilterProfile> {
        if name.trim().is_empty() {
            return Err(anyhow!("profile name MUST be provided"));
        }

        let now = now_rfc3339()?;
        let tx = self.conn.transaction().context("failed to start transaction")?;

        let created_at: Option<String> = tx
            .query_row(
                "SELECT created_at FROM filter_profiles WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        let created_at = created_at.unwrap_or_else(|| now.clone());

        tx.execute(
            "INSERT INTO filter_profiles(name, search_query, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET search_query = ?2, updated_at = ?4",
            params![name, state.search_query, created_at, now],
        )
        .context("failed to upsert filter profile")?;

        tx.execute("DELETE FROM profile_filters WHERE profile_name = ?1", params![name])
            .context("failed to clear previous profile filters")?;
        for filter_id in &state.active_filters {
            tx.execute(
                "INSERT INTO profile_filters(profile_name, filter_id) VALUES (?1, ?2)",
                params![name, filter_id],
            )
            .context("failed to insert profile filter")?;
        }

        tx.commit().context("failed to commit profile transaction")?;

        Ok(FilterProfile {
            name: name.to_string(),
            search_query: state.search_query.clone(),
            active_filters: state.active_filters.iter().cloned().collect(),
            created_at,
            updated_at: now,
        })
    }

    /// Fetch one profile by name; filter ids come back sorted.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read from `SQLite`.
    pub fn get_profile(&self, name: &str) -> Result<Option<FilterProfile>> {
        let header: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT search_query, created_at, updated_at
                 FROM filter_profiles WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((search_query, created_at, updated_at)) = header else {
            return Ok(None);
        };

        Ok(Some(FilterProfile {
            name: name.to_string(),
            search_query,
            active_filters: self.profile_filter_ids(name)?,
            created_at,
            updated_at,
        }))
    }

    /// All persisted profiles in name order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read from `SQLite`.
    pub fn list_profiles(&self) -> Result<Vec<FilterProfile>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, search_query, created_at, updated_at
             FROM filter_profiles
             ORDER BY name ASC",
        )?;

        let headers = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut profiles = Vec::with_capacity(headers.len());
        for (name, search_query, created_at, updated_at) in headers {
            let active_filters = self.profile_filter_ids(&name)?;
            profiles.push(FilterProfile {
                name,
                search_query,
                active_filters,
                created_at,
                updated_at,
            });
        }

        Ok(profiles)
    }

    /// Delete one profile and its filter rows. Returns whether it existed.
    ///
    /// # Errors
    /// Returns an error when deletion fails.
    pub fn delete_profile(&mut self, name: &str) -> Result<bool> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute("DELETE FROM profile_filters WHERE profile_name = ?1", params![name])
            .context("failed to delete profile filters")?;
        let deleted = tx
            .execute("DELETE FROM filter_profiles WHERE name = ?1", params![name])
            .context("failed to delete filter profile")?;
        tx.commit().context("failed to commit delete transaction")?;
        Ok(deleted > 0)
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    fn profile_filter_ids(&self, name: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT filter_id FROM profile_filters
             WHERE profile_name = ?1
             ORDER BY filter_id ASC",
        )?;
        let ids = stmt
            .query_map(params![name], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
    record_schema_version(conn, 1)
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table_name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.iter().any(|name| name == column))
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, "filter_profiles")? {
        return Ok((0, false));
    }

    if table_has_column(conn, "filter_profiles", "filters_json")? {
        return Ok((1, true));
    }

    Ok((2, true))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now_rfc3339()?],
    )
    .with_context(|| format!("failed to record schema version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format current timestamp as RFC3339")
}
