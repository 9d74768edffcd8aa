//! SQLite implementation of [`AttendanceStore`].
//!
//! Timestamps are stored as fixed-width UTC text, so lexical order is time
//! order. Each punch also stores the local calendar day it counts towards.

use crate::clock::{Clock, SystemClock};
use crate::{AttendanceStore, NewIdentity, StoreError};
use chrono::{DateTime, Duration, Local, NaiveDate, SecondsFormat, Utc};
use facepunch_core::{
    AttendanceRecord, GalleryEntry, HistoryEntry, Identity, IdentityId, Punch, PunchState,
    PunchType,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const DAY_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path` with the system clock.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock<P: AsRef<Path>>(path: P, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        tracing::debug!(path = %path.as_ref().display(), journal_mode = %mode, "opened attendance database");
        Self::from_connection(conn, clock)
    }

    /// In-memory database, gone when the store is dropped.
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, clock)
    }

    fn from_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&Local).date_naive()
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS identities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            reference_image_path TEXT NOT NULL,
            registered_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS attendance (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity_id INTEGER NOT NULL REFERENCES identities(id),
            punch_type TEXT NOT NULL CHECK (punch_type IN ('ENTRY', 'EXIT')),
            timestamp TEXT NOT NULL,
            day TEXT NOT NULL,
            confidence REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS attendance_identity_day_idx
            ON attendance(identity_id, day, timestamp);
        CREATE INDEX IF NOT EXISTS attendance_timestamp_idx ON attendance(timestamp);
        COMMIT;",
    )?;
    Ok(())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {s:?}: {e}")))
}

fn parse_punch_type(s: &str) -> Result<PunchType, StoreError> {
    PunchType::parse(s).ok_or_else(|| StoreError::Corrupt(format!("punch type {s:?}")))
}

fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn ensure_identity(conn: &Connection, identity_id: IdentityId) -> Result<(), StoreError> {
    let exists = conn
        .query_row("SELECT 1 FROM identities WHERE id = ?1", params![identity_id], |_| Ok(()))
        .optional()?;
    exists.ok_or(StoreError::UnknownIdentity(identity_id))
}

fn query_todays(conn: &Connection, identity_id: IdentityId, day: NaiveDate) -> Result<Vec<Punch>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT punch_type, timestamp FROM attendance
         WHERE identity_id = ?1 AND day = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;
    let rows = stmt
        .query_map(params![identity_id, day.format(DAY_FORMAT).to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.iter()
        .map(|(punch_type, ts)| {
            Ok(Punch {
                punch_type: parse_punch_type(punch_type)?,
                timestamp: parse_ts(ts)?,
            })
        })
        .collect()
}

fn insert_punch(
    conn: &Connection,
    identity_id: IdentityId,
    punch_type: PunchType,
    confidence: f32,
    now: DateTime<Utc>,
    day: NaiveDate,
) -> Result<AttendanceRecord, StoreError> {
    let confidence = clamp_confidence(confidence);
    conn.execute(
        "INSERT INTO attendance (identity_id, punch_type, timestamp, day, confidence)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            identity_id,
            punch_type.as_str(),
            format_ts(now),
            day.format(DAY_FORMAT).to_string(),
            confidence as f64
        ],
    )?;
    Ok(AttendanceRecord {
        id: conn.last_insert_rowid(),
        identity_id,
        punch_type,
        timestamp: now,
        day,
        confidence,
    })
}

impl AttendanceStore for SqliteStore {
    fn create_identity(
        &self,
        name: &str,
        reference_image_path: &Path,
    ) -> Result<NewIdentity, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO identities (name, reference_image_path, registered_at) VALUES (?1, ?2, ?3)",
            params![
                name,
                reference_image_path.to_string_lossy(),
                format_ts(self.clock.now())
            ],
        );
        match inserted {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                tracing::debug!(identity_id = id, name, "identity created");
                Ok(NewIdentity::Created(id))
            }
            Err(e) if is_unique_violation(&e) => Ok(NewIdentity::NameTaken),
            Err(e) => Err(e.into()),
        }
    }

    fn find_identity_by_name(&self, name: &str) -> Result<Option<Identity>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, name, reference_image_path, registered_at FROM identities WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, IdentityId>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, name, path, registered_at)| {
            Ok(Identity {
                id,
                name,
                reference_image_path: PathBuf::from(path),
                registered_at: parse_ts(&registered_at)?,
            })
        })
        .transpose()
    }

    fn list_identities(&self) -> Result<Vec<(IdentityId, String)>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT id, name FROM identities ORDER BY id")?;
        let users = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn gallery(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached("SELECT id, name, reference_image_path FROM identities ORDER BY id")?;
        let gallery = stmt
            .query_map([], |row| {
                Ok(GalleryEntry {
                    identity_id: row.get(0)?,
                    name: row.get(1)?,
                    reference_image_path: PathBuf::from(row.get::<_, String>(2)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(gallery)
    }

    fn record_punch(
        &self,
        identity_id: IdentityId,
        punch_type: PunchType,
        confidence: f32,
    ) -> Result<AttendanceRecord, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        ensure_identity(&tx, identity_id)?;
        let now = self.clock.now();
        let record = insert_punch(&tx, identity_id, punch_type, confidence, now, self.today(now))?;
        tx.commit()?;
        Ok(record)
    }

    fn todays_punches(&self, identity_id: IdentityId) -> Result<Vec<Punch>, StoreError> {
        let conn = self.lock()?;
        query_todays(&conn, identity_id, self.today(self.clock.now()))
    }

    fn punch(&self, identity_id: IdentityId, confidence: f32) -> Result<AttendanceRecord, StoreError> {
        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front, so other connections to the
        // same file cannot interleave between the read and the insert.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_identity(&tx, identity_id)?;

        let now = self.clock.now();
        let day = self.today(now);
        let state = PunchState::from_todays_punches(&query_todays(&tx, identity_id, day)?);
        let punch_type = state.next_punch();

        let record = insert_punch(&tx, identity_id, punch_type, confidence, now, day)?;
        tx.commit()?;

        tracing::debug!(
            identity_id,
            from = ?state,
            to = ?PunchState::after(punch_type),
            record_id = record.id,
            "punch recorded"
        );
        Ok(record)
    }

    fn history(&self, days: u32) -> Result<Vec<HistoryEntry>, StoreError> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(Duration::days(i64::from(days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT i.name, a.punch_type, a.timestamp, a.confidence
             FROM attendance a
             JOIN identities i ON a.identity_id = i.id
             WHERE a.timestamp >= ?1
             ORDER BY a.timestamp DESC, a.id DESC",
        )?;
        let rows = stmt
            .query_map(params![format_ts(cutoff)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(name, punch_type, ts, confidence)| {
                Ok(HistoryEntry {
                    name,
                    punch_type: parse_punch_type(&punch_type)?,
                    timestamp: parse_ts(&ts)?,
                    confidence: confidence as f32,
                })
            })
            .collect()
    }
}
