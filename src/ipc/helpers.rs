use log::error;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use super::error::err;
use super::types::AuthContext;

/// Handler-level failure, turned into a protocol error envelope at the
/// dispatch boundary.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "unauthenticated",
            message: message.into(),
            details: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "forbidden",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "conflict",
            message: message.into(),
            details: None,
        }
    }

    /// Unexpected storage failure: logged server-side, opaque code to the
    /// caller (500-equivalent).
    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        let message = e.to_string();
        error!("{code}: {message}");
        HandlerErr {
            code,
            message,
            details: None,
        }
    }
}

/// True for the SQLite error raised by UNIQUE and similar constraints,
/// used to report duplicates as conflicts instead of 500s.
pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Empty or whitespace-only strings count as absent, so they never
/// clobber a column through a COALESCE update.
pub fn get_opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_opt_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_bool(params: &Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Responsible operator of a school, or None if the school does not exist.
pub fn school_owner(conn: &Connection, school_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT user_id FROM schools WHERE id = ?",
        [school_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Owning school of a student, or None if the student does not exist.
pub fn student_school(conn: &Connection, student_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT school_id FROM students WHERE id = ?",
        [student_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Admins may touch any school; operators only their own. Missing school
/// is reported as not_found before the ownership check.
pub fn ensure_school_access(
    conn: &Connection,
    auth: &AuthContext,
    school_id: &str,
) -> Result<(), HandlerErr> {
    let Some(owner) = school_owner(conn, school_id)? else {
        return Err(HandlerErr::not_found("school not found"));
    };
    if !auth.is_admin && owner != auth.user_id {
        return Err(HandlerErr::forbidden("no access to this school"));
    }
    Ok(())
}

/// Resolves the student's owning school and applies the same gate.
pub fn ensure_student_access(
    conn: &Connection,
    auth: &AuthContext,
    student_id: &str,
) -> Result<(), HandlerErr> {
    let Some(school_id) = student_school(conn, student_id)? else {
        return Err(HandlerErr::not_found("student not found"));
    };
    ensure_school_access(conn, auth, &school_id)
}
