//! SQLite-backed student directory and attendance store.

use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::persistence::{
    AttendanceStore, RecordFailure, StoreError, StudentDirectory, UpsertReport,
};
use rollcall_core::{AttendanceRecord, Student};
use rusqlite::{params, Connection, Row, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const CURRENT_SCHEMA_VERSION: i32 = 1;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true).map_err(query_err)?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Add a student or replace the existing row with the same id.
    pub fn upsert_student(&self, student: &Student) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT INTO students (id, name, reg_no, class, photo_path)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 reg_no = excluded.reg_no,
                 class = excluded.class,
                 photo_path = excluded.photo_path",
            params![
                student.id,
                student.name,
                student.reg_no,
                student.class,
                student
                    .photo
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }
}

fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(query_err)?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::Unavailable(format!(
            "database version ({version}) is newer than supported schema ({CURRENT_SCHEMA_VERSION})"
        )));
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction().map_err(query_err)?;
    for next in version + 1..=CURRENT_SCHEMA_VERSION {
        apply_migration(&tx, next)?;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .map_err(query_err)?;
    tx.commit().map_err(query_err)?;

    tracing::info!(from = version, to = CURRENT_SCHEMA_VERSION, "database migrated");
    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<(), StoreError> {
    let sql = match version {
        1 => include_str!("schemas/schema_v1.sql"),
        other => {
            return Err(StoreError::Unavailable(format!(
                "no migration for schema version {other}"
            )))
        }
    };
    tx.execute_batch(sql)
        .map_err(|e| StoreError::Query(format!("migration to version {version} failed: {e}")))
}

fn query_err(e: rusqlite::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn row_to_record(row: &Row) -> Result<AttendanceRecord, StoreError> {
    let student_id: String = row.get("student_id").map_err(query_err)?;
    let date: String = row.get("date").map_err(query_err)?;
    let period: u32 = row.get("period").map_err(query_err)?;
    let status: String = row.get("status").map_err(query_err)?;
    let recorded_by: String = row.get("recorded_by").map_err(query_err)?;
    let recorded_at: String = row.get("recorded_at").map_err(query_err)?;

    Ok(AttendanceRecord {
        date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
            .map_err(|e| StoreError::Corrupt(format!("date {date:?} for {student_id}: {e}")))?,
        status: status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("status for {student_id}: {e}")))?,
        recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt(format!("recorded_at for {student_id}: {e}")))?,
        student_id,
        period,
        recorded_by,
    })
}

fn row_to_student(row: &Row) -> Result<Student, StoreError> {
    let photo: Option<String> = row.get("photo_path").map_err(query_err)?;
    Ok(Student {
        id: row.get("id").map_err(query_err)?,
        name: row.get("name").map_err(query_err)?,
        reg_no: row.get("reg_no").map_err(query_err)?,
        class: row.get("class").map_err(query_err)?,
        photo: photo.filter(|p| !p.is_empty()).map(PathBuf::from),
    })
}

impl AttendanceStore for SqliteStore {
    fn upsert_records(&self, records: &[AttendanceRecord]) -> Result<UpsertReport, StoreError> {
        let mut conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let tx = conn.transaction().map_err(query_err)?;
        let mut report = UpsertReport::default();

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO attendance (student_id, date, period, status, recorded_by, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(student_id, date, period) DO UPDATE SET
                         status = excluded.status,
                         recorded_by = excluded.recorded_by,
                         recorded_at = excluded.recorded_at",
                )
                .map_err(query_err)?;

            // A failed row leaves the rest of the batch untouched.
            for record in records {
                let result = stmt.execute(params![
                    record.student_id,
                    record.date.format(DATE_FORMAT).to_string(),
                    record.period,
                    record.status.as_str(),
                    record.recorded_by,
                    record.recorded_at.to_rfc3339(),
                ]);
                match result {
                    Ok(_) => report.written += 1,
                    Err(e) => {
                        tracing::warn!(key = %record.key(), error = %e, "attendance row rejected");
                        report.failed.push(RecordFailure {
                            key: record.key(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        tx.commit().map_err(query_err)?;
        Ok(report)
    }

    fn records_for(&self, date: NaiveDate, period: u32) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn
            .prepare(
                "SELECT student_id, date, period, status, recorded_by, recorded_at
                 FROM attendance
                 WHERE date = ?1 AND period = ?2
                 ORDER BY student_id",
            )
            .map_err(query_err)?;
        let mut rows = stmt
            .query(params![date.format(DATE_FORMAT).to_string(), period])
            .map_err(query_err)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(query_err)? {
            records.push(row_to_record(row)?);
        }
        Ok(records)
    }
}

impl StudentDirectory for SqliteStore {
    fn enrolled_students(&self, class: Option<&str>) -> Result<Vec<Student>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn
            .prepare(
                "SELECT id, name, reg_no, class, photo_path
                 FROM students
                 WHERE ?1 IS NULL OR class = ?1
                 ORDER BY id",
            )
            .map_err(query_err)?;
        let mut rows = stmt.query(params![class]).map_err(query_err)?;

        let mut students = Vec::new();
        while let Some(row) = rows.next().map_err(query_err)? {
            students.push(row_to_student(row)?);
        }
        Ok(students)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::AttentivenessStatus;

    fn student(id: &str, class: &str) -> Student {
        Student {
            id: id.into(),
            name: format!("Student {id}"),
            reg_no: format!("REG-{id}"),
            class: class.into(),
            photo: Some(PathBuf::from(format!("/srv/photos/{id}.jpg"))),
        }
    }

    fn record(student: &str, status: AttentivenessStatus, by: &str) -> AttendanceRecord {
        AttendanceRecord {
            student_id: student.into(),
            date: NaiveDate::from_ymd_opt(2026, 2, 24).unwrap(),
            period: 2,
            status,
            recorded_by: by.into(),
            recorded_at: Utc::now(),
        }
    }

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_student(&student("s1", "CSE-A")).unwrap();
        store.upsert_student(&student("s2", "CSE-A")).unwrap();
        store.upsert_student(&student("s3", "CSE-B")).unwrap();
        store
    }

    #[test]
    fn test_directory_by_class() {
        let store = seeded();
        let cse_a = store.enrolled_students(Some("CSE-A")).unwrap();
        assert_eq!(cse_a.len(), 2);
        assert_eq!(cse_a[0].photo, Some(PathBuf::from("/srv/photos/s1.jpg")));
        assert_eq!(store.enrolled_students(None).unwrap().len(), 3);
    }

    #[test]
    fn test_upsert_replaces_existing_key() {
        let store = seeded();
        store
            .upsert_records(&[
                record("s1", AttentivenessStatus::Absent, "f1"),
                record("s2", AttentivenessStatus::Present, "f1"),
            ])
            .unwrap();
        let report = store
            .upsert_records(&[record("s1", AttentivenessStatus::Talking, "f2")])
            .unwrap();
        assert_eq!(report.written, 1);

        let date = NaiveDate::from_ymd_opt(2026, 2, 24).unwrap();
        let records = store.records_for(date, 2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].student_id, "s1");
        assert_eq!(records[0].status, AttentivenessStatus::Talking);
        assert_eq!(records[0].recorded_by, "f2");
        assert!(store.records_for(date, 3).unwrap().is_empty());
    }

    #[test]
    fn test_failed_row_does_not_roll_back_batch() {
        let store = seeded();
        let report = store
            .upsert_records(&[
                record("s1", AttentivenessStatus::Present, "f1"),
                record("ghost", AttentivenessStatus::Present, "f1"),
                record("s2", AttentivenessStatus::Sleepy, "f1"),
            ])
            .unwrap();

        assert_eq!(report.written, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key.student_id, "ghost");

        let date = NaiveDate::from_ymd_opt(2026, 2, 24).unwrap();
        assert_eq!(store.records_for(date, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/attendance.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_student(&student("s1", "CSE-A")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.enrolled_students(None).unwrap().len(), 1);
    }
}
