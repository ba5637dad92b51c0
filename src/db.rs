use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

use crate::auth;

/// Open (and if needed create) the store under `data_dir`. The returned
/// connection is the single storage handle for the process; it is built
/// here at startup and injected into the request state.
pub fn open_db(data_dir: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("transportd.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            full_name TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            is_admin INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            user_id TEXT NOT NULL,
            city TEXT,
            town TEXT,
            neighborhood TEXT,
            address TEXT,
            phone TEXT,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schools_user ON schools(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS vehicles(
            id TEXT PRIMARY KEY,
            plate_number TEXT NOT NULL UNIQUE,
            route TEXT,
            driver_name TEXT,
            driver_phone TEXT,
            capacity INTEGER NOT NULL DEFAULT 0,
            occupancy INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            classroom INTEGER,
            city TEXT,
            town TEXT,
            neighborhood TEXT,
            address TEXT,
            parent1_name TEXT,
            parent1_phone TEXT,
            parent2_name TEXT,
            parent2_phone TEXT,
            national_id TEXT,
            parent1_national_id TEXT,
            parent2_national_id TEXT,
            vehicle_id TEXT,
            school_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL,
            FOREIGN KEY(vehicle_id) REFERENCES vehicles(id) ON DELETE SET NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_vehicle ON students(vehicle_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            total_amount_cents INTEGER NOT NULL,
            payment_type TEXT NOT NULL CHECK(payment_type IN ('full_upfront','installment')),
            start_date TEXT NOT NULL,
            installment_count INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS installments(
            id TEXT PRIMARY KEY,
            payment_id TEXT NOT NULL,
            due_date TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            is_paid INTEGER NOT NULL DEFAULT 0,
            paid_at TEXT,
            FOREIGN KEY(payment_id) REFERENCES payments(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_installments_payment ON installments(payment_id)",
        [],
    )?;

    Ok(conn)
}

/// UTC timestamp for created_at/modified_at columns. Millisecond precision
/// keeps list orderings by creation time stable in practice.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Seed a default administrator when the user table is empty, so a fresh
/// store is immediately usable. Returns the username when seeding happened.
pub fn bootstrap_admin(conn: &Connection, password: &str) -> anyhow::Result<Option<String>> {
    let user_count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    if user_count > 0 {
        return Ok(None);
    }
    let username = "admin";
    let now = now_ts();
    conn.execute(
        "INSERT INTO users(id, username, password_hash, full_name, is_admin, created_at, modified_at)
         VALUES(?, ?, ?, ?, 1, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            username,
            auth::hash_password(password)?,
            "Administrator",
            &now,
            &now,
        ),
    )?;
    Ok(Some(username.to_string()))
}
