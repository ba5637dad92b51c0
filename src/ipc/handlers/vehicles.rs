use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_opt_i64, get_opt_str, get_required_str, is_constraint_violation, HandlerErr,
};
use crate::ipc::types::{AppState, AuthContext, Request};

const VEHICLE_COLUMNS: &str =
    "id, plate_number, route, driver_name, driver_phone, capacity, occupancy, created_at, modified_at";

fn vehicle_json(r: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "plateNumber": r.get::<_, String>(1)?,
        "route": r.get::<_, Option<String>>(2)?,
        "driverName": r.get::<_, Option<String>>(3)?,
        "driverPhone": r.get::<_, Option<String>>(4)?,
        "capacity": r.get::<_, i64>(5)?,
        "occupancy": r.get::<_, i64>(6)?,
        "createdAt": r.get::<_, String>(7)?,
        "modifiedAt": r.get::<_, String>(8)?,
    }))
}

fn fetch_vehicle(
    conn: &Connection,
    vehicle_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE id = ?"),
        [vehicle_id],
        |r| vehicle_json(r),
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = state
        .db
        .prepare(&format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles ORDER BY plate_number"
        ))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let vehicles = stmt
        .query_map([], |r| vehicle_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "vehicles": vehicles }))
}

fn get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let vehicle_id = get_required_str(&req.params, "vehicleId")?;
    let Some(vehicle) = fetch_vehicle(&state.db, &vehicle_id)? else {
        return Err(HandlerErr::not_found("vehicle not found"));
    };
    Ok(json!({ "vehicle": vehicle }))
}

fn create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let plate_number = get_required_str(&req.params, "plateNumber")?;
    let capacity = get_opt_i64(&req.params, "capacity")?.unwrap_or(0);
    let occupancy = get_opt_i64(&req.params, "occupancy")?.unwrap_or(0);
    if capacity < 0 || occupancy < 0 {
        return Err(HandlerErr::bad_params(
            "capacity and occupancy must not be negative",
        ));
    }

    let vehicle_id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    state
        .db
        .execute(
            "INSERT INTO vehicles(id, plate_number, route, driver_name, driver_phone, capacity, occupancy, created_at, modified_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &vehicle_id,
                &plate_number,
                get_opt_str(&req.params, "route"),
                get_opt_str(&req.params, "driverName"),
                get_opt_str(&req.params, "driverPhone"),
                capacity,
                occupancy,
                &now,
                &now,
            ),
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                HandlerErr::conflict("plate number already registered")
            } else {
                HandlerErr::db("db_insert_failed", e)
            }
        })?;

    let vehicle = fetch_vehicle(&state.db, &vehicle_id)?
        .ok_or_else(|| HandlerErr::db("db_query_failed", "created vehicle missing"))?;
    Ok(json!({ "vehicle": vehicle }))
}

fn update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let vehicle_id = get_required_str(&req.params, "vehicleId")?;
    if fetch_vehicle(&state.db, &vehicle_id)?.is_none() {
        return Err(HandlerErr::not_found("vehicle not found"));
    }

    state
        .db
        .execute(
            "UPDATE vehicles SET
                plate_number = COALESCE(?, plate_number),
                route = COALESCE(?, route),
                driver_name = COALESCE(?, driver_name),
                driver_phone = COALESCE(?, driver_phone),
                capacity = COALESCE(?, capacity),
                occupancy = COALESCE(?, occupancy),
                modified_at = ?
             WHERE id = ?",
            (
                get_opt_str(&req.params, "plateNumber"),
                get_opt_str(&req.params, "route"),
                get_opt_str(&req.params, "driverName"),
                get_opt_str(&req.params, "driverPhone"),
                get_opt_i64(&req.params, "capacity")?,
                get_opt_i64(&req.params, "occupancy")?,
                db::now_ts(),
                &vehicle_id,
            ),
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                HandlerErr::conflict("plate number already registered")
            } else {
                HandlerErr::db("db_update_failed", e)
            }
        })?;

    let vehicle = fetch_vehicle(&state.db, &vehicle_id)?
        .ok_or_else(|| HandlerErr::db("db_query_failed", "updated vehicle missing"))?;
    Ok(json!({ "vehicle": vehicle }))
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let vehicle_id = get_required_str(&req.params, "vehicleId")?;
    // Students referencing the vehicle fall back to unassigned (FK is
    // ON DELETE SET NULL).
    let deleted = state
        .db
        .execute("DELETE FROM vehicles WHERE id = ?", [&vehicle_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("vehicle not found"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(
    state: &mut AppState,
    _auth: &AuthContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "vehicles.list" => list(state),
        "vehicles.get" => get(state, req),
        "vehicles.create" => create(state, req),
        "vehicles.update" => update(state, req),
        "vehicles.delete" => delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
