use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

struct Daemon {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    seq: u64,
}

impl Daemon {
    fn spawn(prefix: &str) -> Daemon {
        let data_dir = temp_dir(prefix);
        let exe = env!("CARGO_BIN_EXE_transportd");
        let mut child = Command::new(exe)
            .arg(&data_dir)
            .env("TRANSPORTD_TOKEN_SECRET", "test-secret")
            .env("TRANSPORTD_ADMIN_PASSWORD", "admin-pass")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn transportd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Daemon {
            child,
            stdin,
            reader: BufReader::new(stdout),
            seq: 0,
        }
    }

    fn request(&mut self, method: &str, token: Option<&str>, params: Value) -> Value {
        self.seq += 1;
        let id = self.seq.to_string();
        let mut payload = json!({ "id": id, "method": method, "params": params });
        if let Some(t) = token {
            payload["token"] = json!(t);
        }
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn request_ok(&mut self, method: &str, token: Option<&str>, params: Value) -> Value {
        let resp = self.request(method, token, params);
        assert!(
            resp["ok"].as_bool().unwrap_or(false),
            "{} failed: {}",
            method,
            resp
        );
        resp["result"].clone()
    }

    fn request_err(&mut self, method: &str, token: Option<&str>, params: Value, code: &str, status: u64) {
        let resp = self.request(method, token, params);
        assert_eq!(resp["ok"].as_bool(), Some(false), "{} unexpectedly ok: {}", method, resp);
        assert_eq!(resp["error"]["code"].as_str(), Some(code), "{}", resp);
        assert_eq!(resp["error"]["status"].as_u64(), Some(status), "{}", resp);
    }

}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

/// Admin token plus a school and a student to hang payments off.
fn setup_student(d: &mut Daemon) -> (String, String) {
    let login = d.request_ok(
        "auth.login",
        None,
        json!({ "username": "admin", "password": "admin-pass" }),
    );
    let token = login["token"].as_str().expect("token").to_string();
    let admin_id = login["user"]["id"].as_str().expect("admin id").to_string();
    let school = d.request_ok(
        "schools.create",
        Some(&token),
        json!({ "name": "Cumhuriyet Ilkokulu", "userId": admin_id }),
    );
    let school_id = school["school"]["id"].as_str().expect("school id");
    let student = d.request_ok(
        "students.create",
        Some(&token),
        json!({ "name": "Ali Demir", "schoolId": school_id }),
    );
    let student_id = student["student"]["id"].as_str().expect("student id").to_string();
    (token, student_id)
}

fn cents(v: &Value) -> i64 {
    (v.as_f64().expect("amount") * 100.0).round() as i64
}

#[test]
fn uneven_total_splits_with_remainder_on_last_installment() {
    let mut d = Daemon::spawn("transportd-split");
    let (token, student_id) = setup_student(&mut d);

    let created = d.request_ok(
        "payments.create",
        Some(&token),
        json!({
            "studentId": student_id,
            "totalAmount": 1000.00,
            "paymentType": "installment",
            "startDate": "2025-01-15",
            "installments": 3
        }),
    );
    let payment = &created["payment"];
    assert_eq!(payment["installmentCount"].as_i64(), Some(3));
    assert_eq!(cents(&payment["totalAmount"]), 100_000);
    let payment_id = payment["id"].as_str().expect("payment id");

    let result = d.request_ok(
        "installments.list",
        Some(&token),
        json!({ "paymentId": payment_id }),
    );
    let installments = result["installments"].as_array().expect("installments");
    assert_eq!(installments.len(), 3);

    let amounts: Vec<i64> = installments.iter().map(|i| cents(&i["amount"])).collect();
    assert_eq!(amounts, vec![33_333, 33_333, 33_334]);
    assert_eq!(amounts.iter().sum::<i64>(), 100_000);

    for inst in installments {
        assert_eq!(inst["isPaid"].as_bool(), Some(false));
        assert!(inst["paidAt"].is_null());
    }
}

#[test]
fn month_end_due_dates_clamp_then_restore() {
    let mut d = Daemon::spawn("transportd-clamp");
    let (token, student_id) = setup_student(&mut d);

    let created = d.request_ok(
        "payments.create",
        Some(&token),
        json!({
            "studentId": student_id,
            "totalAmount": 900.00,
            "paymentType": "installment",
            "startDate": "2025-01-31",
            "installments": 3
        }),
    );
    let payment_id = created["payment"]["id"].as_str().expect("payment id");

    let result = d.request_ok(
        "installments.list",
        Some(&token),
        json!({ "paymentId": payment_id }),
    );
    let dues: Vec<&str> = result["installments"]
        .as_array()
        .expect("installments")
        .iter()
        .map(|i| i["dueDate"].as_str().expect("dueDate"))
        .collect();
    assert_eq!(dues, vec!["2025-01-31", "2025-02-28", "2025-03-31"]);
}

#[test]
fn oversized_installment_counts_are_rejected_and_daemon_survives() {
    let mut d = Daemon::spawn("transportd-count-cap");
    let (token, student_id) = setup_student(&mut d);

    // One notch over the cap.
    d.request_err(
        "payments.create",
        Some(&token),
        json!({
            "studentId": student_id,
            "totalAmount": 500.0,
            "paymentType": "installment",
            "startDate": "2025-02-01",
            "installments": 121
        }),
        "bad_params",
        400,
    );
    // An absurd count must be refused up front, never reach allocation.
    d.request_err(
        "payments.create",
        Some(&token),
        json!({
            "studentId": student_id,
            "totalAmount": 500.0,
            "paymentType": "installment",
            "startDate": "2025-02-01",
            "installments": 4_000_000_000i64
        }),
        "bad_params",
        400,
    );

    // The daemon is still serving; the cap itself is usable.
    let created = d.request_ok(
        "payments.create",
        Some(&token),
        json!({
            "studentId": student_id,
            "totalAmount": 1200.0,
            "paymentType": "installment",
            "startDate": "2025-02-01",
            "installments": 120
        }),
    );
    assert_eq!(created["payment"]["installmentCount"].as_i64(), Some(120));
}

#[test]
fn creation_validation_rejects_bad_requests_without_side_effects() {
    let mut d = Daemon::spawn("transportd-validate");
    let (token, student_id) = setup_student(&mut d);

    // installment type with a single installment
    d.request_err(
        "payments.create",
        Some(&token),
        json!({
            "studentId": student_id,
            "totalAmount": 500.0,
            "paymentType": "installment",
            "startDate": "2025-02-01",
            "installments": 1
        }),
        "bad_params",
        400,
    );
    // installment type without a count
    d.request_err(
        "payments.create",
        Some(&token),
        json!({
            "studentId": student_id,
            "totalAmount": 500.0,
            "paymentType": "installment",
            "startDate": "2025-02-01"
        }),
        "bad_params",
        400,
    );
    // unknown payment type
    d.request_err(
        "payments.create",
        Some(&token),
        json!({
            "studentId": student_id,
            "totalAmount": 500.0,
            "paymentType": "weekly",
            "startDate": "2025-02-01",
            "installments": 4
        }),
        "bad_params",
        400,
    );
    // missing amount
    d.request_err(
        "payments.create",
        Some(&token),
        json!({
            "studentId": student_id,
            "paymentType": "installment",
            "startDate": "2025-02-01",
            "installments": 4
        }),
        "bad_params",
        400,
    );
    // non-positive amount
    d.request_err(
        "payments.create",
        Some(&token),
        json!({
            "studentId": student_id,
            "totalAmount": -10.0,
            "paymentType": "installment",
            "startDate": "2025-02-01",
            "installments": 4
        }),
        "bad_params",
        400,
    );
    // malformed date
    d.request_err(
        "payments.create",
        Some(&token),
        json!({
            "studentId": student_id,
            "totalAmount": 500.0,
            "paymentType": "installment",
            "startDate": "01/02/2025",
            "installments": 4
        }),
        "bad_params",
        400,
    );
    // unknown student
    d.request_err(
        "payments.create",
        Some(&token),
        json!({
            "studentId": "no-such-student",
            "totalAmount": 500.0,
            "paymentType": "installment",
            "startDate": "2025-02-01",
            "installments": 4
        }),
        "not_found",
        404,
    );

    // none of the rejected requests left a payment behind
    let result = d.request_ok("payments.list", Some(&token), json!({ "studentId": student_id }));
    assert_eq!(result["payments"].as_array().expect("payments").len(), 0);
}
