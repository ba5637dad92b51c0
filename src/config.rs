use std::path::PathBuf;

pub const DEFAULT_TOKEN_TTL_SECS: i64 = 86_400; // 1 day

pub struct Config {
    pub data_dir: PathBuf,
    pub token_secret: String,
    pub token_ttl_secs: i64,
    pub admin_password: String,
    /// True when no TRANSPORTD_TOKEN_SECRET was supplied; main logs a warning.
    pub token_secret_is_default: bool,
}

impl Config {
    /// Data dir comes from argv[1] or TRANSPORTD_DATA_DIR; everything else
    /// from the environment with development fallbacks.
    pub fn from_env() -> Self {
        let data_dir = std::env::args()
            .nth(1)
            .or_else(|| std::env::var("TRANSPORTD_DATA_DIR").ok())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("transportd-data"));

        let (token_secret, token_secret_is_default) =
            match std::env::var("TRANSPORTD_TOKEN_SECRET") {
                Ok(s) if !s.trim().is_empty() => (s, false),
                _ => ("transportd-dev-secret".to_string(), true),
            };

        let token_ttl_secs = std::env::var("TRANSPORTD_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);

        let admin_password =
            std::env::var("TRANSPORTD_ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());

        Config {
            data_dir,
            token_secret,
            token_ttl_secs,
            admin_password,
            token_secret_is_default,
        }
    }
}
