mod auth;
mod config;
mod db;
mod ipc;
mod money;
mod schedule;

use std::io::{self, BufRead, Write};

use log::warn;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cfg = config::Config::from_env();
    if cfg.token_secret_is_default {
        warn!("TRANSPORTD_TOKEN_SECRET not set; using development secret");
    }

    let conn = db::open_db(&cfg.data_dir)?;
    if let Some(username) = db::bootstrap_admin(&conn, &cfg.admin_password)? {
        warn!("seeded bootstrap administrator '{username}'");
    }

    let mut state = ipc::AppState {
        data_dir: cfg.data_dir,
        db: conn,
        tokens: auth::TokenService::new(&cfg.token_secret, cfg.token_ttl_secs),
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply with the request id; send an id-less error.
                let _ = writeln!(
                    stdout,
                    "{{\"ok\":false,\"error\":{{\"code\":\"bad_json\",\"status\":400,\"message\":\"{}\"}}}}",
                    e
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    Ok(())
}
