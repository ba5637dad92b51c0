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

    fn login(&mut self, username: &str, password: &str) -> String {
        let result = self.request_ok(
            "auth.login",
            None,
            json!({ "username": username, "password": password }),
        );
        result["token"].as_str().expect("token").to_string()
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

struct TwoSchools {
    admin: String,
    op1: String,
    op2: String,
    school1: String,
    school2: String,
    student2: String,
}

/// Two operators, each responsible for one school; a student in school 2.
fn setup_two_schools(d: &mut Daemon) -> TwoSchools {
    let admin = d.login("admin", "admin-pass");

    let op1_user = d.request_ok(
        "users.create",
        Some(&admin),
        json!({ "username": "op1", "password": "pw-one", "name": "Operator One" }),
    );
    let op2_user = d.request_ok(
        "users.create",
        Some(&admin),
        json!({ "username": "op2", "password": "pw-two", "name": "Operator Two" }),
    );

    let school1 = d.request_ok(
        "schools.create",
        Some(&admin),
        json!({ "name": "Okul Bir", "userId": op1_user["user"]["id"] }),
    )["school"]["id"]
        .as_str()
        .expect("school1")
        .to_string();
    let school2 = d.request_ok(
        "schools.create",
        Some(&admin),
        json!({ "name": "Okul Iki", "userId": op2_user["user"]["id"] }),
    )["school"]["id"]
        .as_str()
        .expect("school2")
        .to_string();

    let student2 = d.request_ok(
        "students.create",
        Some(&admin),
        json!({ "name": "Kerem Arslan", "schoolId": school2 }),
    )["student"]["id"]
        .as_str()
        .expect("student2")
        .to_string();

    TwoSchools {
        admin,
        op1: d.login("op1", "pw-one"),
        op2: d.login("op2", "pw-two"),
        school1,
        school2,
        student2,
    }
}

#[test]
fn login_failures_are_distinguished() {
    let mut d = Daemon::spawn("transportd-login");

    d.request_err(
        "auth.login",
        None,
        json!({ "username": "admin", "password": "wrong" }),
        "unauthenticated",
        401,
    );
    d.request_err(
        "auth.login",
        None,
        json!({ "username": "ghost", "password": "whatever" }),
        "not_found",
        404,
    );
    d.request_err("auth.login", None, json!({ "username": "admin" }), "bad_params", 400);
}

#[test]
fn protected_methods_require_a_valid_token() {
    let mut d = Daemon::spawn("transportd-token-gate");

    d.request_err("schools.list", None, json!({}), "unauthenticated", 401);
    d.request_err(
        "schools.list",
        Some("not-a-token"),
        json!({}),
        "unauthenticated",
        401,
    );
    // health stays public
    let health = d.request_ok("health", None, json!({}));
    assert!(health["version"].as_str().is_some());
}

#[test]
fn user_creation_is_admin_only_and_usernames_are_unique() {
    let mut d = Daemon::spawn("transportd-users");
    let admin = d.login("admin", "admin-pass");

    d.request_ok(
        "users.create",
        Some(&admin),
        json!({ "username": "op1", "password": "pw-one", "name": "Operator One" }),
    );
    d.request_err(
        "users.create",
        Some(&admin),
        json!({ "username": "op1", "password": "other", "name": "Duplicate" }),
        "conflict",
        409,
    );

    let op1 = d.login("op1", "pw-one");
    d.request_err(
        "users.create",
        Some(&op1),
        json!({ "username": "op3", "password": "pw", "name": "Nope" }),
        "forbidden",
        403,
    );
}

#[test]
fn operators_see_and_touch_only_their_own_schools() {
    let mut d = Daemon::spawn("transportd-ownership");
    let t = setup_two_schools(&mut d);

    // Listing is scoped; admins see everything.
    let mine = d.request_ok("schools.list", Some(&t.op1), json!({}));
    let ids: Vec<&str> = mine["schools"]
        .as_array()
        .expect("schools")
        .iter()
        .map(|s| s["id"].as_str().expect("id"))
        .collect();
    assert_eq!(ids, vec![t.school1.as_str()]);
    let all = d.request_ok("schools.list", Some(&t.admin), json!({}));
    assert_eq!(all["schools"].as_array().expect("schools").len(), 2);

    d.request_err(
        "schools.get",
        Some(&t.op1),
        json!({ "schoolId": t.school2 }),
        "forbidden",
        403,
    );
    d.request_err(
        "students.list",
        Some(&t.op1),
        json!({ "schoolId": t.school2 }),
        "forbidden",
        403,
    );
    d.request_err(
        "students.create",
        Some(&t.op1),
        json!({ "name": "Intruder", "schoolId": t.school2 }),
        "forbidden",
        403,
    );
    // Unscoped student listing is the admin view.
    d.request_err("students.list", Some(&t.op1), json!({}), "forbidden", 403);

    // School management is admin-only.
    d.request_err(
        "schools.create",
        Some(&t.op1),
        json!({ "name": "Rogue School", "userId": "whoever" }),
        "forbidden",
        403,
    );
    d.request_err(
        "schools.delete",
        Some(&t.op1),
        json!({ "schoolId": t.school1 }),
        "forbidden",
        403,
    );

    // Operators may edit their school but not hand it to someone else.
    d.request_ok(
        "schools.update",
        Some(&t.op1),
        json!({ "schoolId": t.school1, "phone": "0212 555 11 22" }),
    );
    d.request_err(
        "schools.update",
        Some(&t.op1),
        json!({ "schoolId": t.school1, "userId": "someone-else" }),
        "forbidden",
        403,
    );
}

#[test]
fn payment_operations_are_gated_by_student_ownership() {
    let mut d = Daemon::spawn("transportd-payment-gate");
    let t = setup_two_schools(&mut d);

    // op1 has no claim on school 2's student.
    d.request_err(
        "payments.create",
        Some(&t.op1),
        json!({
            "studentId": t.student2,
            "totalAmount": 500.0,
            "paymentType": "installment",
            "startDate": "2025-02-01",
            "installments": 5
        }),
        "forbidden",
        403,
    );
    d.request_err(
        "payments.list",
        Some(&t.op1),
        json!({ "studentId": t.student2 }),
        "forbidden",
        403,
    );

    // The owning operator can book and collect.
    let created = d.request_ok(
        "payments.create",
        Some(&t.op2),
        json!({
            "studentId": t.student2,
            "totalAmount": 500.0,
            "paymentType": "installment",
            "startDate": "2025-02-01",
            "installments": 5
        }),
    );
    let payment_id = created["payment"]["id"].as_str().expect("payment id");

    let installments = d.request_ok(
        "installments.list",
        Some(&t.op2),
        json!({ "paymentId": payment_id }),
    );
    let installment_id = installments["installments"][0]["id"]
        .as_str()
        .expect("installment id");

    d.request_err(
        "installments.list",
        Some(&t.op1),
        json!({ "paymentId": payment_id }),
        "forbidden",
        403,
    );
    d.request_err(
        "installments.setPaid",
        Some(&t.op1),
        json!({ "installmentId": installment_id, "isPaid": true }),
        "forbidden",
        403,
    );
    d.request_err(
        "payments.delete",
        Some(&t.op1),
        json!({ "paymentId": payment_id }),
        "forbidden",
        403,
    );

    // Admins bypass ownership.
    d.request_ok(
        "installments.setPaid",
        Some(&t.admin),
        json!({ "installmentId": installment_id, "isPaid": true }),
    );
}
