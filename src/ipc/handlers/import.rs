//! Bulk registration of already-structured rows. Spreadsheet parsing lives
//! client-side; this boundary takes JSON rows and applies them atomically:
//! one bad row rejects the whole batch before anything is written.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::db;
use crate::ipc::error::ok;
use crate::ipc::handlers::students::vehicle_exists;
use crate::ipc::helpers::{
    ensure_school_access, get_required_str, is_constraint_violation, HandlerErr,
};
use crate::ipc::types::{AppState, AuthContext, Request};

fn rows_param(params: &Value) -> Result<&Vec<Value>, HandlerErr> {
    let rows = params
        .get("rows")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("missing rows"))?;
    if rows.is_empty() {
        return Err(HandlerErr::bad_params("rows must not be empty"));
    }
    Ok(rows)
}

fn row_str(row: &Value, key: &str) -> Option<String> {
    row.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn row_errors_response(errors: Vec<Value>) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: "import rejected; no rows were written".to_string(),
        details: Some(json!({ "rowErrors": errors })),
    }
}

fn import_students(
    state: &AppState,
    auth: &AuthContext,
    req: &Request,
) -> Result<Value, HandlerErr> {
    let school_id = get_required_str(&req.params, "schoolId")?;
    ensure_school_access(&state.db, auth, &school_id)?;
    let rows = rows_param(&req.params)?;

    let mut errors = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        if row_str(row, "name").is_none() {
            errors.push(json!({ "row": idx, "error": "missing name" }));
            continue;
        }
        if let Some(vehicle_id) = row_str(row, "vehicleId") {
            if !vehicle_exists(&state.db, &vehicle_id)? {
                errors.push(json!({ "row": idx, "error": "vehicle not found" }));
            }
        }
    }
    if !errors.is_empty() {
        return Err(row_errors_response(errors));
    }

    let tx = state
        .db
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    let mut imported = Vec::with_capacity(rows.len());
    for row in rows {
        let student_id = Uuid::new_v4().to_string();
        let now = db::now_ts();
        tx.execute(
            "INSERT INTO students(id, name, classroom, city, town, neighborhood, address,
                parent1_name, parent1_phone, parent2_name, parent2_phone,
                national_id, parent1_national_id, parent2_national_id,
                vehicle_id, school_id, created_at, modified_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                &student_id,
                row_str(row, "name"),
                row.get("classroom").and_then(|v| v.as_i64()),
                row_str(row, "city"),
                row_str(row, "town"),
                row_str(row, "neighborhood"),
                row_str(row, "address"),
                row_str(row, "parent1Name"),
                row_str(row, "parent1Phone"),
                row_str(row, "parent2Name"),
                row_str(row, "parent2Phone"),
                row_str(row, "nationalId"),
                row_str(row, "parent1NationalId"),
                row_str(row, "parent2NationalId"),
                row_str(row, "vehicleId"),
                &school_id,
                &now,
                &now,
            ],
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
        imported.push(student_id);
    }

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(json!({ "imported": imported.len(), "studentIds": imported }))
}

fn import_vehicles(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let rows = rows_param(&req.params)?;

    let mut errors = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        if row_str(row, "plateNumber").is_none() {
            errors.push(json!({ "row": idx, "error": "missing plateNumber" }));
        }
    }
    if !errors.is_empty() {
        return Err(row_errors_response(errors));
    }

    let tx = state
        .db
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    let mut imported = Vec::with_capacity(rows.len());
    for row in rows {
        let vehicle_id = Uuid::new_v4().to_string();
        let now = db::now_ts();
        tx.execute(
            "INSERT INTO vehicles(id, plate_number, route, driver_name, driver_phone,
                capacity, occupancy, created_at, modified_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                &vehicle_id,
                row_str(row, "plateNumber"),
                row_str(row, "route"),
                row_str(row, "driverName"),
                row_str(row, "driverPhone"),
                row.get("capacity").and_then(|v| v.as_i64()).unwrap_or(0),
                row.get("occupancy").and_then(|v| v.as_i64()).unwrap_or(0),
                &now,
                &now,
            ],
        )
        .map_err(|e| {
            // Duplicate plate inside or outside the batch: drop the whole
            // transaction, report a conflict.
            if is_constraint_violation(&e) {
                HandlerErr::conflict("duplicate plate number in import")
            } else {
                HandlerErr::db("db_insert_failed", e)
            }
        })?;
        imported.push(vehicle_id);
    }

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(json!({ "imported": imported.len(), "vehicleIds": imported }))
}

pub fn try_handle(
    state: &mut AppState,
    auth: &AuthContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "import.students" => import_students(state, auth, req),
        "import.vehicles" => import_vehicles(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
