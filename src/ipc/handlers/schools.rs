use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_opt_str, get_required_str, school_owner, HandlerErr};
use crate::ipc::types::{AppState, AuthContext, Request};

const SCHOOL_COLUMNS: &str =
    "id, name, user_id, city, town, neighborhood, address, phone, created_at, modified_at";

fn school_json(r: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "userId": r.get::<_, String>(2)?,
        "city": r.get::<_, Option<String>>(3)?,
        "town": r.get::<_, Option<String>>(4)?,
        "neighborhood": r.get::<_, Option<String>>(5)?,
        "address": r.get::<_, Option<String>>(6)?,
        "phone": r.get::<_, Option<String>>(7)?,
        "createdAt": r.get::<_, String>(8)?,
        "modifiedAt": r.get::<_, String>(9)?,
    }))
}

fn fetch_school(conn: &Connection, school_id: &str) -> Result<Option<serde_json::Value>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {SCHOOL_COLUMNS} FROM schools WHERE id = ?"),
        [school_id],
        |r| school_json(r),
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn list(state: &AppState, auth: &AuthContext) -> Result<serde_json::Value, HandlerErr> {
    // Admins see every school; operators only the ones they answer for.
    let (sql, params) = if auth.is_admin {
        (
            format!("SELECT {SCHOOL_COLUMNS} FROM schools ORDER BY name"),
            Vec::new(),
        )
    } else {
        (
            format!("SELECT {SCHOOL_COLUMNS} FROM schools WHERE user_id = ? ORDER BY name"),
            vec![auth.user_id.clone()],
        )
    };

    let mut stmt = state
        .db
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let schools = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |r| school_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "schools": schools }))
}

fn get(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(&req.params, "schoolId")?;
    let Some(school) = fetch_school(&state.db, &school_id)? else {
        return Err(HandlerErr::not_found("school not found"));
    };
    if !auth.is_admin
        && school.get("userId").and_then(|v| v.as_str()) != Some(auth.user_id.as_str())
    {
        return Err(HandlerErr::forbidden("no access to this school"));
    }
    Ok(json!({ "school": school }))
}

fn create(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    if !auth.is_admin {
        return Err(HandlerErr::forbidden("administrator role required"));
    }
    let name = get_required_str(&req.params, "name")?;
    let user_id = get_required_str(&req.params, "userId")?;

    let operator_exists: Option<i64> = state
        .db
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if operator_exists.is_none() {
        return Err(HandlerErr::not_found("responsible user not found"));
    }

    let school_id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    state
        .db
        .execute(
            "INSERT INTO schools(id, name, user_id, city, town, neighborhood, address, phone, created_at, modified_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &school_id,
                &name,
                &user_id,
                get_opt_str(&req.params, "city"),
                get_opt_str(&req.params, "town"),
                get_opt_str(&req.params, "neighborhood"),
                get_opt_str(&req.params, "address"),
                get_opt_str(&req.params, "phone"),
                &now,
                &now,
            ),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    let school = fetch_school(&state.db, &school_id)?
        .ok_or_else(|| HandlerErr::db("db_query_failed", "created school missing"))?;
    Ok(json!({ "school": school }))
}

fn update(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(&req.params, "schoolId")?;
    let Some(owner) = school_owner(&state.db, &school_id)? else {
        return Err(HandlerErr::not_found("school not found"));
    };
    if !auth.is_admin && owner != auth.user_id {
        return Err(HandlerErr::forbidden("no access to this school"));
    }

    // Reassigning the responsible operator is an admin-only move.
    let new_owner = get_opt_str(&req.params, "userId");
    if let Some(ref candidate) = new_owner {
        if !auth.is_admin && *candidate != owner {
            return Err(HandlerErr::forbidden(
                "only administrators may reassign a school",
            ));
        }
        let exists: Option<i64> = state
            .db
            .query_row("SELECT 1 FROM users WHERE id = ?", [candidate], |r| r.get(0))
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        if exists.is_none() {
            return Err(HandlerErr::not_found("responsible user not found"));
        }
    }

    state
        .db
        .execute(
            "UPDATE schools SET
                name = COALESCE(?, name),
                user_id = COALESCE(?, user_id),
                city = COALESCE(?, city),
                town = COALESCE(?, town),
                neighborhood = COALESCE(?, neighborhood),
                address = COALESCE(?, address),
                phone = COALESCE(?, phone),
                modified_at = ?
             WHERE id = ?",
            (
                get_opt_str(&req.params, "name"),
                new_owner,
                get_opt_str(&req.params, "city"),
                get_opt_str(&req.params, "town"),
                get_opt_str(&req.params, "neighborhood"),
                get_opt_str(&req.params, "address"),
                get_opt_str(&req.params, "phone"),
                db::now_ts(),
                &school_id,
            ),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    let school = fetch_school(&state.db, &school_id)?
        .ok_or_else(|| HandlerErr::db("db_query_failed", "updated school missing"))?;
    Ok(json!({ "school": school }))
}

fn delete(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    if !auth.is_admin {
        return Err(HandlerErr::forbidden("administrator role required"));
    }
    let school_id = get_required_str(&req.params, "schoolId")?;
    if school_owner(&state.db, &school_id)?.is_none() {
        return Err(HandlerErr::not_found("school not found"));
    }

    let student_count: i64 = state
        .db
        .query_row(
            "SELECT COUNT(*) FROM students WHERE school_id = ?",
            [&school_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if student_count > 0 {
        return Err(HandlerErr::conflict(
            "school still has students; remove or move them first",
        ));
    }

    state
        .db
        .execute("DELETE FROM schools WHERE id = ?", [&school_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;

    Ok(json!({ "deleted": true }))
}

pub fn try_handle(
    state: &mut AppState,
    auth: &AuthContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "schools.list" => list(state, auth),
        "schools.get" => get(state, auth, req),
        "schools.create" => create(state, auth, req),
        "schools.update" => update(state, auth, req),
        "schools.delete" => delete(state, auth, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
