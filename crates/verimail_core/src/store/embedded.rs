//! Embedded verdict store on SQLite.
//!
//! The canonical `verified_emails` schema, keyed by the normalized address.
//! Upserts are last-writer-wins by `verified_at`, enforced in SQL so that
//! concurrent writers through separate handles cannot regress a record.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use crate::model::{Provider, Reachability, Tier, Verdict};
use crate::store::{ScanFilter, StoreError, StoreStats, StoredVerdict, VerdictStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS verified_emails (
    email TEXT PRIMARY KEY,
    normalized TEXT NOT NULL,
    reachability TEXT NOT NULL,
    is_deliverable BOOL,
    is_catch_all BOOL,
    is_disposable BOOL NOT NULL,
    is_role BOOL NOT NULL,
    is_free BOOL NOT NULL,
    mx_host TEXT,
    smtp_code INT NOT NULL,
    smtp_message TEXT,
    provider TEXT,
    domain TEXT,
    verified_at TIMESTAMP NOT NULL,
    error TEXT,
    tier TEXT NOT NULL DEFAULT 'smtp'
);
CREATE INDEX IF NOT EXISTS idx_ve_reachability ON verified_emails(reachability);
CREATE INDEX IF NOT EXISTS idx_ve_domain ON verified_emails(domain);
CREATE INDEX IF NOT EXISTS idx_ve_verified_at ON verified_emails(verified_at);
";

const UPSERT: &str = "
INSERT INTO verified_emails (
    email, normalized, reachability, is_deliverable, is_catch_all,
    is_disposable, is_role, is_free, mx_host, smtp_code,
    smtp_message, provider, domain, verified_at, error, tier
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
ON CONFLICT(email) DO UPDATE SET
    normalized = excluded.normalized,
    reachability = excluded.reachability,
    is_deliverable = excluded.is_deliverable,
    is_catch_all = excluded.is_catch_all,
    is_disposable = excluded.is_disposable,
    is_role = excluded.is_role,
    is_free = excluded.is_free,
    mx_host = excluded.mx_host,
    smtp_code = excluded.smtp_code,
    smtp_message = excluded.smtp_message,
    provider = excluded.provider,
    domain = excluded.domain,
    verified_at = excluded.verified_at,
    error = excluded.error,
    tier = excluded.tier
WHERE excluded.verified_at >= verified_emails.verified_at
";

const COLUMNS: &str = "email, normalized, reachability, is_deliverable, is_catch_all, \
    is_disposable, is_role, is_free, mx_host, smtp_code, smtp_message, provider, \
    domain, verified_at, error, tier";

/// SQLite-backed [`VerdictStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and create if missing) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(sql_err)?;
        Self::init(conn, Some(path.as_ref()))
    }

    /// An in-memory store, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(sql_err)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(sql_err)?;
        if let Some(path) = path {
            info!(path = %path.display(), "opened verdict store");
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means a panic mid-query; the connection itself
        // is still usable for independent statements.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

fn row_to_verdict(row: &Row<'_>) -> rusqlite::Result<Verdict> {
    let reachability: String = row.get("reachability")?;
    let provider: Option<String> = row.get("provider")?;
    let tier: String = row.get("tier")?;
    Ok(Verdict {
        email: row.get("email")?,
        normalized: row.get("normalized")?,
        reachability: reachability.parse().unwrap_or(Reachability::Unknown),
        is_deliverable: row.get("is_deliverable")?,
        is_catch_all: row.get("is_catch_all")?,
        is_disposable: row.get("is_disposable")?,
        is_role: row.get("is_role")?,
        is_free: row.get("is_free")?,
        mx_host: row.get::<_, Option<String>>("mx_host")?.unwrap_or_default(),
        smtp_code: row.get::<_, i64>("smtp_code")? as u16,
        smtp_message: row
            .get::<_, Option<String>>("smtp_message")?
            .unwrap_or_default(),
        provider: provider
            .and_then(|p| p.parse().ok())
            .unwrap_or(Provider::Generic),
        domain: row.get::<_, Option<String>>("domain")?.unwrap_or_default(),
        verified_at: row.get("verified_at")?,
        error: row.get("error")?,
        tier: tier.parse().unwrap_or(Tier::Smtp),
    })
}

#[async_trait]
impl VerdictStore for SqliteStore {
    async fn get(&self, normalized: &str) -> Result<Option<StoredVerdict>, StoreError> {
        let conn = self.lock();
        let verdict = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM verified_emails WHERE email = ?1"),
                params![normalized],
                |row| row_to_verdict(row),
            )
            .optional()
            .map_err(sql_err)?;

        Ok(verdict.map(|verdict| {
            let age = (Utc::now() - verdict.verified_at)
                .to_std()
                .unwrap_or_default();
            StoredVerdict { verdict, age }
        }))
    }

    async fn put(&self, verdict: &Verdict) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            UPSERT,
            params![
                verdict.normalized,
                verdict.normalized,
                verdict.reachability.as_str(),
                verdict.is_deliverable,
                verdict.is_catch_all,
                verdict.is_disposable,
                verdict.is_role,
                verdict.is_free,
                verdict.mx_host,
                i64::from(verdict.smtp_code),
                verdict.smtp_message,
                verdict.provider.as_str(),
                verdict.domain,
                verdict.verified_at,
                verdict.error,
                verdict.tier.as_str(),
            ],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.lock();
        let total: u64 = conn
            .query_row("SELECT COUNT(*) FROM verified_emails", [], |r| r.get(0))
            .map_err(sql_err)?;

        let mut by_reachability = std::collections::HashMap::new();
        let mut stmt = conn
            .prepare("SELECT reachability, COUNT(*) FROM verified_emails GROUP BY reachability")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))
            .map_err(sql_err)?;
        for row in rows {
            let (k, v) = row.map_err(sql_err)?;
            by_reachability.insert(k, v);
        }

        let catch_all: u64 = conn
            .query_row(
                "SELECT COUNT(*) FROM verified_emails WHERE is_catch_all = 1",
                [],
                |r| r.get(0),
            )
            .map_err(sql_err)?;

        Ok(StoreStats {
            total,
            by_reachability,
            catch_all,
        })
    }

    async fn scan(&self, filter: &ScanFilter) -> Result<Vec<Verdict>, StoreError> {
        let mut sql = format!("SELECT {COLUMNS} FROM verified_emails WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(reachability) = filter.reachability {
            sql.push_str(" AND reachability = ?");
            args.push(Box::new(reachability.as_str().to_string()));
        }
        if let Some(domain) = &filter.domain {
            sql.push_str(" AND domain = ?");
            args.push(Box::new(domain.clone()));
        }
        if let Some(before) = filter.verified_before {
            sql.push_str(" AND verified_at < ?");
            args.push(Box::new(before));
        }
        sql.push_str(" ORDER BY verified_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
        let params: Vec<&dyn rusqlite::ToSql> = args.iter().map(AsRef::as_ref).collect();
        let rows = stmt
            .query_map(params.as_slice(), |row| row_to_verdict(row))
            .map_err(sql_err)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(sql_err)?);
        }
        Ok(out)
    }
}
