//! SQLite persistence layer.
//!
//! One database holds publications, license infos, and the lifecycle event
//! journal. Uses WAL mode for concurrent reads during writes and enforces
//! foreign keys. Reads filter soft-deleted rows; deletes set `deleted_at`.
//!
//! Lifecycle mutations run through [`Store::in_transaction`], which takes an
//! immediate transaction so the read-validate-mutate-append sequence of the
//! status state machine is serialized per process and atomic on disk.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::license::types::{Event, EventType, LicenseInfo, LicenseStatus, Publication};

/// Broad listings never return more rows than this.
pub const MAX_LIST: usize = 1000;

/// Event lists are bounded per license.
pub const MAX_EVENTS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Rewrap unique/foreign-key violations as conflicts so the HTTP layer
    /// can answer 400 instead of 500.
    fn from_insert(err: rusqlite::Error) -> StoreError {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(msg.clone().unwrap_or_else(|| "constraint violation".into()))
            }
            _ => StoreError::Database(err),
        }
    }
}

/// Database handle wrapping a SQLite connection.
pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Store {
            db: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Store {
            db: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let db = self.db.lock();
        db.execute_batch("PRAGMA journal_mode=WAL;")?;
        db.execute_batch("PRAGMA foreign_keys=ON;")?;
        db.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS publications (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid           TEXT NOT NULL UNIQUE,
                alt_id         TEXT UNIQUE,
                title          TEXT NOT NULL,
                authors        TEXT,
                publishers     TEXT,
                description    TEXT,
                cover_url      TEXT,
                href           TEXT NOT NULL,
                content_type   TEXT NOT NULL,
                size           INTEGER NOT NULL,
                checksum       TEXT NOT NULL,
                encryption_key BLOB NOT NULL,
                created_at     TEXT NOT NULL,
                updated_at     TEXT,
                deleted_at     TEXT
            );

            CREATE TABLE IF NOT EXISTS licenses (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid           TEXT NOT NULL UNIQUE,
                publication_id TEXT NOT NULL REFERENCES publications(uuid),
                user_id        TEXT NOT NULL,
                user_name      TEXT,
                user_email     TEXT,
                user_encrypted TEXT NOT NULL DEFAULT '[]',
                provider       TEXT,
                created_at     TEXT NOT NULL,
                updated_at     TEXT,
                status         TEXT NOT NULL,
                status_updated TEXT,
                device_count   INTEGER NOT NULL DEFAULT 0,
                start_date     TEXT,
                end_date       TEXT,
                max_end_date   TEXT,
                print_limit    INTEGER NOT NULL DEFAULT -1,
                copy_limit     INTEGER NOT NULL DEFAULT -1,
                deleted_at     TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_licenses_user ON licenses(user_id);
            CREATE INDEX IF NOT EXISTS idx_licenses_publication ON licenses(publication_id);
            CREATE INDEX IF NOT EXISTS idx_licenses_status ON licenses(status);

            CREATE TABLE IF NOT EXISTS events (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                license_id  TEXT NOT NULL REFERENCES licenses(uuid),
                type        TEXT NOT NULL,
                device_id   TEXT NOT NULL,
                device_name TEXT NOT NULL,
                timestamp   TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_license_device
                ON events(license_id, device_id);
            ",
        )?;
        Ok(())
    }

    /// Run work against the store under the connection lock. Each statement
    /// autocommits; use [`Store::in_transaction`] for multi-step atomic work.
    pub fn view<T, E: From<StoreError>>(
        &self,
        f: impl FnOnce(StoreView<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let conn = self.db.lock();
        f(StoreView { conn: &conn })
    }

    /// Run a unit of work inside an immediate transaction. The closure's
    /// error rolls everything back.
    pub fn in_transaction<T, E: From<StoreError>>(
        &self,
        f: impl FnOnce(StoreView<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut conn = self.db.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| E::from(StoreError::from(e)))?;
        let out = f(StoreView { conn: &tx })?;
        tx.commit().map_err(|e| E::from(StoreError::from(e)))?;
        Ok(out)
    }
}

/// A borrowed view over the connection handing out the sub-repositories.
pub struct StoreView<'a> {
    conn: &'a Connection,
}

impl<'a> StoreView<'a> {
    pub fn publications(&self) -> Publications<'_> {
        Publications { conn: self.conn }
    }

    pub fn licenses(&self) -> Licenses<'_> {
        Licenses { conn: self.conn }
    }

    pub fn events(&self) -> Events<'_> {
        Events { conn: self.conn }
    }
}

// ─── Publications ──────────────────────────────────────────────────────

pub struct Publications<'a> {
    conn: &'a Connection,
}

const PUBLICATION_COLS: &str = "uuid, alt_id, title, authors, publishers, description, cover_url,
     href, content_type, size, checksum, encryption_key, created_at, updated_at, deleted_at";

impl<'a> Publications<'a> {
    pub fn create(&self, publication: &Publication) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO publications (uuid, alt_id, title, authors, publishers, description,
                     cover_url, href, content_type, size, checksum, encryption_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    publication.uuid,
                    publication.alt_id,
                    publication.title,
                    publication.authors,
                    publication.publishers,
                    publication.description,
                    publication.cover_url,
                    publication.href,
                    publication.content_type,
                    publication.size as i64,
                    publication.checksum,
                    publication.encryption_key,
                    ts(&publication.created_at),
                    opt_ts(&publication.updated_at),
                ],
            )
            .map_err(StoreError::from_insert)?;
        Ok(())
    }

    /// Fetch a live (not soft-deleted) publication.
    pub fn get(&self, uuid: &str) -> Result<Option<Publication>, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {PUBLICATION_COLS} FROM publications
                     WHERE uuid = ?1 AND deleted_at IS NULL"
                ),
                params![uuid],
                map_publication_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Fetch a publication even if soft-deleted. Licenses issued before a
    /// deletion still need their publication row.
    pub fn get_any(&self, uuid: &str) -> Result<Option<Publication>, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {PUBLICATION_COLS} FROM publications WHERE uuid = ?1"),
                params![uuid],
                map_publication_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_by_alt_id(&self, alt_id: &str) -> Result<Option<Publication>, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {PUBLICATION_COLS} FROM publications
                     WHERE alt_id = ?1 AND deleted_at IS NULL"
                ),
                params![alt_id],
                map_publication_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_all(&self) -> Result<Vec<Publication>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PUBLICATION_COLS} FROM publications
             WHERE deleted_at IS NULL ORDER BY id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![MAX_LIST as i64], map_publication_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Page ordering is stable descending by internal row id.
    pub fn list(&self, page: u32, per_page: u32) -> Result<Vec<Publication>, StoreError> {
        let offset = (page.saturating_sub(1) as i64) * per_page as i64;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PUBLICATION_COLS} FROM publications
             WHERE deleted_at IS NULL ORDER BY id DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![per_page as i64, offset], map_publication_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn find_by_type(&self, content_type: &str) -> Result<Vec<Publication>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PUBLICATION_COLS} FROM publications
             WHERE content_type = ?1 AND deleted_at IS NULL ORDER BY id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![content_type, MAX_LIST as i64], map_publication_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn update(&self, publication: &Publication) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE publications SET alt_id = ?2, title = ?3, authors = ?4, publishers = ?5,
                 description = ?6, cover_url = ?7, href = ?8, content_type = ?9, size = ?10,
                 checksum = ?11, encryption_key = ?12, updated_at = ?13
             WHERE uuid = ?1 AND deleted_at IS NULL",
            params![
                publication.uuid,
                publication.alt_id,
                publication.title,
                publication.authors,
                publication.publishers,
                publication.description,
                publication.cover_url,
                publication.href,
                publication.content_type,
                publication.size as i64,
                publication.checksum,
                publication.encryption_key,
                ts(&Utc::now()),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound("publication"));
        }
        Ok(())
    }

    /// Soft delete. Existing licenses keep referencing the row; only new
    /// license generation is blocked.
    pub fn soft_delete(&self, uuid: &str) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE publications SET deleted_at = ?2 WHERE uuid = ?1 AND deleted_at IS NULL",
            params![uuid, ts(&Utc::now())],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound("publication"));
        }
        Ok(())
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM publications WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        )?)
    }
}

// ─── Licenses ──────────────────────────────────────────────────────────

pub struct Licenses<'a> {
    conn: &'a Connection,
}

const LICENSE_COLS: &str = "uuid, publication_id, user_id, user_name, user_email, user_encrypted,
     provider, created_at, updated_at, status, status_updated, device_count,
     start_date, end_date, max_end_date, print_limit, copy_limit, deleted_at";

impl<'a> Licenses<'a> {
    /// Insert a new license info. The publication row must exist (it may be
    /// soft-deleted; generation-time checks are the caller's concern).
    pub fn create(&self, info: &LicenseInfo) -> Result<(), StoreError> {
        let publication_exists: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM publications WHERE uuid = ?1",
            params![info.publication_id],
            |row| row.get(0),
        )?;
        if publication_exists == 0 {
            return Err(StoreError::NotFound("publication"));
        }
        let user_encrypted = serde_json::to_string(&info.user_encrypted)
            .unwrap_or_else(|_| "[]".to_string());
        self.conn
            .execute(
                "INSERT INTO licenses (uuid, publication_id, user_id, user_name, user_email,
                     user_encrypted, provider, created_at, updated_at, status, status_updated,
                     device_count, start_date, end_date, max_end_date, print_limit, copy_limit)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    info.uuid,
                    info.publication_id,
                    info.user_id,
                    info.user_name,
                    info.user_email,
                    user_encrypted,
                    info.provider,
                    ts(&info.created_at),
                    opt_ts(&info.updated_at),
                    info.status.as_str(),
                    opt_ts(&info.status_updated),
                    info.device_count,
                    opt_ts(&info.start),
                    opt_ts(&info.end),
                    opt_ts(&info.max_end),
                    info.print,
                    info.copy,
                ],
            )
            .map_err(StoreError::from_insert)?;
        Ok(())
    }

    pub fn get(&self, uuid: &str) -> Result<Option<LicenseInfo>, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {LICENSE_COLS} FROM licenses WHERE uuid = ?1 AND deleted_at IS NULL"
                ),
                params![uuid],
                map_license_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Persist every mutable column of a license row.
    pub fn update(&self, info: &LicenseInfo) -> Result<(), StoreError> {
        let user_encrypted = serde_json::to_string(&info.user_encrypted)
            .unwrap_or_else(|_| "[]".to_string());
        let changed = self.conn.execute(
            "UPDATE licenses SET user_id = ?2, user_name = ?3, user_email = ?4,
                 user_encrypted = ?5, provider = ?6, updated_at = ?7, status = ?8,
                 status_updated = ?9, device_count = ?10, start_date = ?11, end_date = ?12,
                 max_end_date = ?13, print_limit = ?14, copy_limit = ?15
             WHERE uuid = ?1 AND deleted_at IS NULL",
            params![
                info.uuid,
                info.user_id,
                info.user_name,
                info.user_email,
                user_encrypted,
                info.provider,
                opt_ts(&info.updated_at),
                info.status.as_str(),
                opt_ts(&info.status_updated),
                info.device_count,
                opt_ts(&info.start),
                opt_ts(&info.end),
                opt_ts(&info.max_end),
                info.print,
                info.copy,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound("license"));
        }
        Ok(())
    }

    pub fn soft_delete(&self, uuid: &str) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE licenses SET deleted_at = ?2 WHERE uuid = ?1 AND deleted_at IS NULL",
            params![uuid, ts(&Utc::now())],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound("license"));
        }
        Ok(())
    }

    pub fn list(&self, page: u32, per_page: u32) -> Result<Vec<LicenseInfo>, StoreError> {
        let offset = (page.saturating_sub(1) as i64) * per_page as i64;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LICENSE_COLS} FROM licenses
             WHERE deleted_at IS NULL ORDER BY id DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![per_page as i64, offset], map_license_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn find_by_user(&self, user_id: &str) -> Result<Vec<LicenseInfo>, StoreError> {
        self.find("user_id = ?1", params![user_id, MAX_LIST as i64])
    }

    pub fn find_by_publication(&self, publication_id: &str) -> Result<Vec<LicenseInfo>, StoreError> {
        self.find("publication_id = ?1", params![publication_id, MAX_LIST as i64])
    }

    pub fn find_by_status(&self, status: LicenseStatus) -> Result<Vec<LicenseInfo>, StoreError> {
        self.find("status = ?1", params![status.as_str(), MAX_LIST as i64])
    }

    pub fn find_by_device_count(&self, min: i64, max: i64) -> Result<Vec<LicenseInfo>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LICENSE_COLS} FROM licenses
             WHERE device_count BETWEEN ?1 AND ?2 AND deleted_at IS NULL
             ORDER BY id DESC LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![min, max, MAX_LIST as i64], map_license_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// `prefix` is `YYYY-MM` or `YYYY-MM-DD`, matched against the issue date.
    pub fn find_by_date(&self, prefix: &str) -> Result<Vec<LicenseInfo>, StoreError> {
        let pattern = format!("{prefix}%");
        self.find("created_at LIKE ?1", params![pattern, MAX_LIST as i64])
    }

    fn find(
        &self,
        predicate: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<LicenseInfo>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LICENSE_COLS} FROM licenses
             WHERE {predicate} AND deleted_at IS NULL ORDER BY id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params, map_license_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM licenses WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        )?)
    }
}

// ─── Events ────────────────────────────────────────────────────────────

pub struct Events<'a> {
    conn: &'a Connection,
}

impl<'a> Events<'a> {
    /// Append an event. Returns its row id.
    pub fn create(&self, event: &Event) -> Result<i64, StoreError> {
        self.conn
            .execute(
                "INSERT INTO events (license_id, type, device_id, device_name, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.license_id,
                    event.event_type.as_str(),
                    event.device_id,
                    event.device_name,
                    ts(&event.timestamp),
                ],
            )
            .map_err(StoreError::from_insert)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Full chronological journal for a license, oldest first, bounded.
    pub fn list(&self, license_id: &str) -> Result<Vec<Event>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT license_id, type, device_id, device_name, timestamp
             FROM events WHERE license_id = ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![license_id, MAX_EVENTS as i64], map_event_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Has this device already registered on this license?
    /// Served by the `(license_id, device_id)` index.
    pub fn get_register_by_device(
        &self,
        license_id: &str,
        device_id: &str,
    ) -> Result<Option<Event>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT license_id, type, device_id, device_name, timestamp
                 FROM events
                 WHERE license_id = ?1 AND device_id = ?2 AND type = 'register'
                 LIMIT 1",
                params![license_id, device_id],
                map_event_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get(&self, id: i64) -> Result<Option<Event>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT license_id, type, device_id, device_name, timestamp
                 FROM events WHERE id = ?1",
                params![id],
                map_event_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Administrative cleanup only; the state machine never removes events.
    pub fn delete(&self, id: i64) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM events WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound("event"));
        }
        Ok(())
    }

    pub fn count(&self, license_id: &str) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM events WHERE license_id = ?1",
            params![license_id],
            |row| row.get(0),
        )?)
    }
}

// ─── Row mapping ───────────────────────────────────────────────────────

fn map_publication_row(row: &Row) -> rusqlite::Result<Publication> {
    Ok(Publication {
        uuid: row.get(0)?,
        alt_id: row.get(1)?,
        title: row.get(2)?,
        authors: row.get(3)?,
        publishers: row.get(4)?,
        description: row.get(5)?,
        cover_url: row.get(6)?,
        href: row.get(7)?,
        content_type: row.get(8)?,
        size: row.get::<_, i64>(9)? as u64,
        checksum: row.get(10)?,
        encryption_key: row.get(11)?,
        created_at: parse_ts_sql(row.get(12)?, 12)?,
        updated_at: parse_opt_ts_sql(row.get(13)?, 13)?,
        deleted_at: parse_opt_ts_sql(row.get(14)?, 14)?,
    })
}

fn map_license_row(row: &Row) -> rusqlite::Result<LicenseInfo> {
    let user_encrypted: String = row.get(5)?;
    let status: String = row.get(9)?;
    Ok(LicenseInfo {
        uuid: row.get(0)?,
        publication_id: row.get(1)?,
        user_id: row.get(2)?,
        user_name: row.get(3)?,
        user_email: row.get(4)?,
        user_encrypted: serde_json::from_str(&user_encrypted).unwrap_or_default(),
        provider: row.get(6)?,
        created_at: parse_ts_sql(row.get(7)?, 7)?,
        updated_at: parse_opt_ts_sql(row.get(8)?, 8)?,
        status: LicenseStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                Type::Text,
                format!("unknown status {status}").into(),
            )
        })?,
        status_updated: parse_opt_ts_sql(row.get(10)?, 10)?,
        device_count: row.get(11)?,
        start: parse_opt_ts_sql(row.get(12)?, 12)?,
        end: parse_opt_ts_sql(row.get(13)?, 13)?,
        max_end: parse_opt_ts_sql(row.get(14)?, 14)?,
        print: row.get(15)?,
        copy: row.get(16)?,
        deleted_at: parse_opt_ts_sql(row.get(17)?, 17)?,
    })
}

fn map_event_row(row: &Row) -> rusqlite::Result<Event> {
    let kind: String = row.get(1)?;
    Ok(Event {
        license_id: row.get(0)?,
        event_type: EventType::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                Type::Text,
                format!("unknown event type {kind}").into(),
            )
        })?,
        device_id: row.get(2)?,
        device_name: row.get(3)?,
        timestamp: parse_ts_sql(row.get(4)?, 4)?,
    })
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn opt_ts(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(ts)
}

fn parse_ts_sql(s: String, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(e)))
}

fn parse_opt_ts_sql(s: Option<String>, col: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts_sql(s, col)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::types::UNLIMITED;

    fn publication(uuid: &str) -> Publication {
        Publication {
            uuid: uuid.into(),
            alt_id: None,
            title: "T".into(),
            authors: Some("A. Author".into()),
            publishers: None,
            description: None,
            cover_url: None,
            href: "https://host/f.epub".into(),
            content_type: "application/epub+zip".into(),
            size: 100,
            checksum: "c2hhLTI1Ng==".into(),
            encryption_key: vec![9u8; 32],
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        }
    }

    fn license(uuid: &str, publication_id: &str) -> LicenseInfo {
        LicenseInfo {
            uuid: uuid.into(),
            publication_id: publication_id.into(),
            user_id: "U1".into(),
            user_name: None,
            user_email: None,
            user_encrypted: vec![],
            provider: None,
            created_at: Utc::now(),
            updated_at: None,
            status: LicenseStatus::Ready,
            status_updated: None,
            device_count: 0,
            start: None,
            end: None,
            max_end: None,
            print: UNLIMITED,
            copy: UNLIMITED,
            deleted_at: None,
        }
    }

    #[test]
    fn publication_round_trip() {
        let store = Store::open_memory().unwrap();
        store
            .view(|s| {
                s.publications().create(&publication("p-1"))?;
                let loaded = s.publications().get("p-1")?.unwrap();
                assert_eq!(loaded.title, "T");
                assert_eq!(loaded.encryption_key, vec![9u8; 32]);
                assert_eq!(loaded.authors.as_deref(), Some("A. Author"));
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn duplicate_uuid_conflicts() {
        let store = Store::open_memory().unwrap();
        let err = store
            .view(|s| {
                s.publications().create(&publication("p-1"))?;
                s.publications().create(&publication("p-1"))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn soft_delete_hides_but_keeps_row() {
        let store = Store::open_memory().unwrap();
        store
            .view(|s| {
                s.publications().create(&publication("p-1"))?;
                s.publications().soft_delete("p-1")?;
                assert!(s.publications().get("p-1")?.is_none());
                let kept = s.publications().get_any("p-1")?.unwrap();
                assert!(kept.deleted_at.is_some());
                assert_eq!(s.publications().count()?, 0);
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn publication_soft_delete_does_not_cascade() {
        let store = Store::open_memory().unwrap();
        store
            .view(|s| {
                s.publications().create(&publication("p-1"))?;
                s.licenses().create(&license("l-1", "p-1"))?;
                s.publications().soft_delete("p-1")?;
                // the license survives and still resolves its publication row
                let info = s.licenses().get("l-1")?.unwrap();
                assert_eq!(info.publication_id, "p-1");
                assert!(s.publications().get_any("p-1")?.is_some());
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn license_requires_existing_publication() {
        let store = Store::open_memory().unwrap();
        let err = store
            .view(|s| s.licenses().create(&license("l-1", "missing")))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound("publication")));
    }

    #[test]
    fn license_update_round_trip() {
        let store = Store::open_memory().unwrap();
        store
            .view(|s| {
                s.publications().create(&publication("p-1"))?;
                s.licenses().create(&license("l-1", "p-1"))?;
                let mut info = s.licenses().get("l-1")?.unwrap();
                info.status = LicenseStatus::Active;
                info.device_count = 2;
                info.end = Some("2026-12-01T00:00:00Z".parse().unwrap());
                s.licenses().update(&info)?;
                let loaded = s.licenses().get("l-1")?.unwrap();
                assert_eq!(loaded.status, LicenseStatus::Active);
                assert_eq!(loaded.device_count, 2);
                assert_eq!(loaded.end, info.end);
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn list_orders_newest_first_and_paginates() {
        let store = Store::open_memory().unwrap();
        store
            .view(|s| {
                for i in 0..5 {
                    s.publications().create(&publication(&format!("p-{i}")))?;
                }
                let first = s.publications().list(1, 2)?;
                assert_eq!(first.len(), 2);
                assert_eq!(first[0].uuid, "p-4");
                assert_eq!(first[1].uuid, "p-3");
                let second = s.publications().list(2, 2)?;
                assert_eq!(second[0].uuid, "p-2");
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn license_filters() {
        let store = Store::open_memory().unwrap();
        store
            .view(|s| {
                s.publications().create(&publication("p-1"))?;
                s.publications().create(&publication("p-2"))?;
                let mut a = license("l-1", "p-1");
                a.user_id = "alice".into();
                a.status = LicenseStatus::Active;
                a.device_count = 3;
                s.licenses().create(&a)?;
                let mut b = license("l-2", "p-2");
                b.user_id = "bob".into();
                s.licenses().create(&b)?;

                assert_eq!(s.licenses().find_by_user("alice")?.len(), 1);
                assert_eq!(s.licenses().find_by_publication("p-2")?.len(), 1);
                assert_eq!(s.licenses().find_by_status(LicenseStatus::Active)?.len(), 1);
                assert_eq!(s.licenses().find_by_device_count(2, 5)?.len(), 1);
                assert_eq!(s.licenses().find_by_device_count(4, 5)?.len(), 0);

                let month = Utc::now().format("%Y-%m").to_string();
                assert_eq!(s.licenses().find_by_date(&month)?.len(), 2);
                assert_eq!(s.licenses().count()?, 2);
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn event_journal_and_register_lookup() {
        let store = Store::open_memory().unwrap();
        store
            .view(|s| {
                s.publications().create(&publication("p-1"))?;
                s.licenses().create(&license("l-1", "p-1"))?;
                let register = Event {
                    license_id: "l-1".into(),
                    event_type: EventType::Register,
                    device_id: "d-1".into(),
                    device_name: "reader".into(),
                    timestamp: Utc::now(),
                };
                let id = s.events().create(&register)?;
                let renew = Event {
                    event_type: EventType::Renew,
                    ..register.clone()
                };
                s.events().create(&renew)?;

                let all = s.events().list("l-1")?;
                assert_eq!(all.len(), 2);
                assert_eq!(all[0].event_type, EventType::Register);
                assert_eq!(all[1].event_type, EventType::Renew);

                assert!(s.events().get_register_by_device("l-1", "d-1")?.is_some());
                assert!(s.events().get_register_by_device("l-1", "d-2")?.is_none());
                assert_eq!(s.events().count("l-1")?, 2);

                assert!(s.events().get(id)?.is_some());
                s.events().delete(id)?;
                assert!(s.events().get(id)?.is_none());
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = Store::open_memory().unwrap();
        store
            .view(|s| s.publications().create(&publication("p-1")))
            .unwrap();
        let result: Result<(), StoreError> = store.in_transaction(|s| {
            s.licenses().create(&license("l-1", "p-1"))?;
            Err(StoreError::Conflict("forced".into()))
        });
        assert!(result.is_err());
        store
            .view(|s| {
                assert!(s.licenses().get("l-1")?.is_none());
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }
}
