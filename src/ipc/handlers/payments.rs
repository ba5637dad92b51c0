use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    ensure_school_access, ensure_student_access, get_opt_i64, get_required_bool,
    get_required_f64, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, AuthContext, Request};
use crate::money;
use crate::schedule::{self, PaymentType};

const PAYMENT_COLUMNS: &str =
    "id, student_id, total_amount_cents, payment_type, start_date, installment_count, created_at, modified_at";

const INSTALLMENT_COLUMNS: &str = "id, payment_id, due_date, amount_cents, is_paid, paid_at";

// Ten years of monthly dues; anything beyond that is a bogus request,
// not a tuition plan.
const MAX_INSTALLMENTS: i64 = 120;

fn payment_json(r: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "totalAmount": money::amount_from_cents(r.get::<_, i64>(2)?),
        "paymentType": r.get::<_, String>(3)?,
        "startDate": r.get::<_, String>(4)?,
        "installmentCount": r.get::<_, i64>(5)?,
        "createdAt": r.get::<_, String>(6)?,
        "modifiedAt": r.get::<_, String>(7)?,
    }))
}

fn installment_json(r: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "paymentId": r.get::<_, String>(1)?,
        "dueDate": r.get::<_, String>(2)?,
        "amount": money::amount_from_cents(r.get::<_, i64>(3)?),
        "isPaid": r.get::<_, i64>(4)? != 0,
        "paidAt": r.get::<_, Option<String>>(5)?,
    }))
}

fn fetch_payment(
    conn: &Connection,
    payment_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?"),
        [payment_id],
        |r| payment_json(r),
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn payment_student(conn: &Connection, payment_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT student_id FROM payments WHERE id = ?",
        [payment_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn parse_start_date(s: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("startDate must be YYYY-MM-DD"))
}

/// Validate, generate the schedule and persist payment plus installments
/// as one transaction. Nothing is written when any step fails.
fn create(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(&req.params, "studentId")?;
    let total_amount = get_required_f64(&req.params, "totalAmount")?;
    let payment_type_raw = get_required_str(&req.params, "paymentType")?;
    let start_date_raw = get_required_str(&req.params, "startDate")?;

    let total_cents = money::cents_from_amount(total_amount)
        .ok_or_else(|| HandlerErr::bad_params("totalAmount must be a positive amount"))?;
    let payment_type = PaymentType::parse(&payment_type_raw).ok_or_else(|| {
        HandlerErr::bad_params("paymentType must be 'full_upfront' or 'installment'")
    })?;
    let start_date = parse_start_date(&start_date_raw)?;

    let count: u32 = match payment_type {
        // Lump sums are always a single installment, whatever the caller sent.
        PaymentType::FullUpfront => 1,
        PaymentType::Installment => {
            let n = get_opt_i64(&req.params, "installments")?.ok_or_else(|| {
                HandlerErr::bad_params("installment payments require an installment count")
            })?;
            if n < 2 {
                return Err(HandlerErr::bad_params(
                    "installment payments require at least 2 installments",
                ));
            }
            if n > MAX_INSTALLMENTS {
                return Err(HandlerErr::bad_params(
                    "installment count must not exceed 120",
                ));
            }
            n as u32
        }
    };

    // The caller identity gate: operators may only book payments for
    // students of their own schools. Also rejects unknown students.
    ensure_student_access(&state.db, auth, &student_id)?;

    let today = Utc::now().date_naive();
    let rows = schedule::generate_schedule(total_cents, payment_type, start_date, count, today)
        .ok_or_else(|| HandlerErr::bad_params("startDate out of supported range"))?;

    let payment_id = Uuid::new_v4().to_string();
    let now = db::now_ts();

    let tx = state
        .db
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tx.execute(
        &format!(
            "INSERT INTO payments({}) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            PAYMENT_COLUMNS
        ),
        (
            &payment_id,
            &student_id,
            total_cents,
            payment_type.as_str(),
            start_date.format("%Y-%m-%d").to_string(),
            i64::from(count),
            &now,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    for row in &rows {
        tx.execute(
            &format!(
                "INSERT INTO installments({}) VALUES(?, ?, ?, ?, ?, ?)",
                INSTALLMENT_COLUMNS
            ),
            (
                Uuid::new_v4().to_string(),
                &payment_id,
                row.due_date.format("%Y-%m-%d").to_string(),
                row.amount_cents,
                row.is_paid as i64,
                row.paid_at.map(|d| d.format("%Y-%m-%d").to_string()),
            ),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    }

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let payment = fetch_payment(&state.db, &payment_id)?
        .ok_or_else(|| HandlerErr::db("db_query_failed", "created payment missing"))?;
    Ok(json!({ "payment": payment }))
}

fn list(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(&req.params, "studentId")?;
    ensure_student_access(&state.db, auth, &student_id)?;

    let mut stmt = state
        .db
        .prepare(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE student_id = ?
             ORDER BY created_at DESC, rowid DESC"
        ))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let payments = stmt
        .query_map([&student_id], |r| payment_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "payments": payments }))
}

fn delete(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(&req.params, "paymentId")?;
    let Some(student_id) = payment_student(&state.db, &payment_id)? else {
        return Err(HandlerErr::not_found("payment not found"));
    };
    ensure_student_access(&state.db, auth, &student_id)?;

    // Installments go with the payment (ON DELETE CASCADE).
    state
        .db
        .execute("DELETE FROM payments WHERE id = ?", [&payment_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    Ok(json!({ "deleted": true }))
}

fn list_installments(
    state: &AppState,
    auth: &AuthContext,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(&req.params, "paymentId")?;
    let Some(student_id) = payment_student(&state.db, &payment_id)? else {
        return Err(HandlerErr::not_found("payment not found"));
    };
    ensure_student_access(&state.db, auth, &student_id)?;

    let mut stmt = state
        .db
        .prepare(&format!(
            "SELECT {INSTALLMENT_COLUMNS} FROM installments
             WHERE payment_id = ?
             ORDER BY due_date, rowid"
        ))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let installments = stmt
        .query_map([&payment_id], |r| installment_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "installments": installments }))
}

fn set_paid(state: &AppState, auth: &AuthContext, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let installment_id = get_required_str(&req.params, "installmentId")?;
    let is_paid = get_required_bool(&req.params, "isPaid")?;

    // Resolve the owning chain installment -> payment -> student -> school
    // before touching anything.
    let school_id: Option<String> = state
        .db
        .query_row(
            "SELECT s.school_id
             FROM installments i
             JOIN payments p ON p.id = i.payment_id
             JOIN students s ON s.id = p.student_id
             WHERE i.id = ?",
            [&installment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(school_id) = school_id else {
        return Err(HandlerErr::not_found("installment not found"));
    };
    ensure_school_access(&state.db, auth, &school_id)?;

    let paid_at = if is_paid {
        Some(Utc::now().date_naive().format("%Y-%m-%d").to_string())
    } else {
        None
    };
    state
        .db
        .execute(
            "UPDATE installments SET is_paid = ?, paid_at = ? WHERE id = ?",
            (is_paid as i64, &paid_at, &installment_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    let installment = state
        .db
        .query_row(
            &format!("SELECT {INSTALLMENT_COLUMNS} FROM installments WHERE id = ?"),
            [&installment_id],
            |r| installment_json(r),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(json!({ "installment": installment }))
}

pub fn try_handle(
    state: &mut AppState,
    auth: &AuthContext,
    req: &Request,
) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "payments.create" => create(state, auth, req),
        "payments.list" => list(state, auth, req),
        "payments.delete" => delete(state, auth, req),
        "installments.list" => list_installments(state, auth, req),
        "installments.setPaid" => set_paid(state, auth, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
