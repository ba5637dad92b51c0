use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    ensure_school_access, ensure_student_access, get_opt_i64, get_opt_str, get_required_str,
    HandlerErr,
};
use crate::ipc::types::{AppState, AuthContext, Request};

const STUDENT_COLUMNS: &str = "id, name, classroom, city, town, neighborhood, address,
    parent1_name, parent1_phone, parent2_name, parent2_phone,
    national_id, parent1_national_id, parent2_national_id,
    vehicle_id, school_id, created_at, modified_at";

fn student_json(r: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "classroom": r.get::<_, Option<i64>>(2)?,
        "city": r.get::<_, Option<String>>(3)?,
        "town": r.get::<_, Option<String>>(4)?,
        "neighborhood": r.get::<_, Option<String>>(5)?,
        "address": r.get::<_, Option<String>>(6)?,
        "parent1Name": r.get::<_, Option<String>>(7)?,
        "parent1Phone": r.get::<_, Option<String>>(8)?,
        "parent2Name": r.get::<_, Option<String>>(9)?,
        "parent2Phone": r.get::<_, Option<String>>(10)?,
        "nationalId": r.get::<_, Option<String>>(11)?,
        "parent1NationalId": r.get::<_, Option<String>>(12)?,
        "parent2NationalId": r.get::<_, Option<String>>(13)?,
        "vehicleId": r.get::<_, Option<String>>(14)?,
        "schoolId": r.get::<_, String>(15)?,
        "createdAt": r.get::<_, String>(16)?,
        "modifiedAt": r.get::<_, String>(17)?,
    }))
}

fn fetch_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?"),
        [student_id],
        |r| student_json(r),
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

pub(super) fn vehicle_exists(conn: &Connection, vehicle_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM vehicles WHERE id = ?",
        [vehicle_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn list(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let students = match get_opt_str(&req.params, "schoolId") {
        Some(school_id) => {
            ensure_school_access(&state.db, auth, &school_id)?;
            let mut stmt = state
                .db
                .prepare(&format!(
                    "SELECT {STUDENT_COLUMNS} FROM students WHERE school_id = ? ORDER BY name"
                ))
                .map_err(|e| HandlerErr::db("db_query_failed", e))?;
            stmt.query_map([&school_id], |r| student_json(r))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(|e| HandlerErr::db("db_query_failed", e))?
        }
        None => {
            // The unscoped listing is an administrator view.
            if !auth.is_admin {
                return Err(HandlerErr::forbidden("administrator role required"));
            }
            let mut stmt = state
                .db
                .prepare(&format!(
                    "SELECT {STUDENT_COLUMNS} FROM students ORDER BY name"
                ))
                .map_err(|e| HandlerErr::db("db_query_failed", e))?;
            stmt.query_map([], |r| student_json(r))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(|e| HandlerErr::db("db_query_failed", e))?
        }
    };
    Ok(json!({ "students": students }))
}

fn get(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(&req.params, "studentId")?;
    ensure_student_access(&state.db, auth, &student_id)?;
    let student = fetch_student(&state.db, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    Ok(json!({ "student": student }))
}

fn create(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(&req.params, "name")?;
    let school_id = get_required_str(&req.params, "schoolId")?;
    ensure_school_access(&state.db, auth, &school_id)?;

    let vehicle_id = get_opt_str(&req.params, "vehicleId");
    if let Some(ref v) = vehicle_id {
        if !vehicle_exists(&state.db, v)? {
            return Err(HandlerErr::not_found("vehicle not found"));
        }
    }

    let student_id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    state
        .db
        .execute(
            &format!(
                "INSERT INTO students({})
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                STUDENT_COLUMNS
            ),
            rusqlite::params![
                &student_id,
                &name,
                get_opt_i64(&req.params, "classroom")?,
                get_opt_str(&req.params, "city"),
                get_opt_str(&req.params, "town"),
                get_opt_str(&req.params, "neighborhood"),
                get_opt_str(&req.params, "address"),
                get_opt_str(&req.params, "parent1Name"),
                get_opt_str(&req.params, "parent1Phone"),
                get_opt_str(&req.params, "parent2Name"),
                get_opt_str(&req.params, "parent2Phone"),
                get_opt_str(&req.params, "nationalId"),
                get_opt_str(&req.params, "parent1NationalId"),
                get_opt_str(&req.params, "parent2NationalId"),
                vehicle_id,
                &school_id,
                &now,
                &now,
            ],
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    let student = fetch_student(&state.db, &student_id)?
        .ok_or_else(|| HandlerErr::db("db_query_failed", "created student missing"))?;
    Ok(json!({ "student": student }))
}

fn update(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(&req.params, "studentId")?;
    ensure_student_access(&state.db, auth, &student_id)?;

    // Moving a student needs access to the destination school too.
    let new_school = get_opt_str(&req.params, "schoolId");
    if let Some(ref school_id) = new_school {
        ensure_school_access(&state.db, auth, school_id)?;
    }
    let new_vehicle = get_opt_str(&req.params, "vehicleId");
    if let Some(ref v) = new_vehicle {
        if !vehicle_exists(&state.db, v)? {
            return Err(HandlerErr::not_found("vehicle not found"));
        }
    }

    state
        .db
        .execute(
            "UPDATE students SET
                name = COALESCE(?, name),
                classroom = COALESCE(?, classroom),
                city = COALESCE(?, city),
                town = COALESCE(?, town),
                neighborhood = COALESCE(?, neighborhood),
                address = COALESCE(?, address),
                parent1_name = COALESCE(?, parent1_name),
                parent1_phone = COALESCE(?, parent1_phone),
                parent2_name = COALESCE(?, parent2_name),
                parent2_phone = COALESCE(?, parent2_phone),
                national_id = COALESCE(?, national_id),
                parent1_national_id = COALESCE(?, parent1_national_id),
                parent2_national_id = COALESCE(?, parent2_national_id),
                vehicle_id = COALESCE(?, vehicle_id),
                school_id = COALESCE(?, school_id),
                modified_at = ?
             WHERE id = ?",
            rusqlite::params![
                get_opt_str(&req.params, "name"),
                get_opt_i64(&req.params, "classroom")?,
                get_opt_str(&req.params, "city"),
                get_opt_str(&req.params, "town"),
                get_opt_str(&req.params, "neighborhood"),
                get_opt_str(&req.params, "address"),
                get_opt_str(&req.params, "parent1Name"),
                get_opt_str(&req.params, "parent1Phone"),
                get_opt_str(&req.params, "parent2Name"),
                get_opt_str(&req.params, "parent2Phone"),
                get_opt_str(&req.params, "nationalId"),
                get_opt_str(&req.params, "parent1NationalId"),
                get_opt_str(&req.params, "parent2NationalId"),
                new_vehicle,
                new_school,
                db::now_ts(),
                &student_id,
            ],
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    let student = fetch_student(&state.db, &student_id)?
        .ok_or_else(|| HandlerErr::db("db_query_failed", "updated student missing"))?;
    Ok(json!({ "student": student }))
}

fn delete(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(&req.params, "studentId")?;
    ensure_student_access(&state.db, auth, &student_id)?;
    // Payments (and through them installments) cascade with the student.
    state
        .db
        .execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(
    state: &mut AppState,
    auth: &AuthContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => list(state, auth, req),
        "students.get" => get(state, auth, req),
        "students.create" => create(state, auth, req),
        "students.update" => update(state, auth, req),
        "students.delete" => delete(state, auth, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
