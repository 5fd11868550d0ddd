use std::env;

/// Environment-driven configuration. No config-file crate — the teacher
/// repo never reached for one either, and four scalar settings don't
/// justify it.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// `None` disables the `X-API-Key` check entirely.
    pub api_key: Option<String>,
    /// `0` disables the snapshot background task.
    pub snapshot_interval_sec: u64,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "order_store".to_string()),
            api_key: env::var("API_KEY").ok().filter(|s| !s.is_empty()),
            snapshot_interval_sec: env::var("SNAPSHOT_INTERVAL_SEC")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            port: env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_env_unset() {
        // SAFETY: single-threaded test, no other test touches these vars.
        unsafe {
            env::remove_var("DATABASE_URL");
            env::remove_var("API_KEY");
            env::remove_var("SNAPSHOT_INTERVAL_SEC");
            env::remove_var("PORT");
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.database_url, "order_store");
        assert_eq!(cfg.api_key, None);
        assert_eq!(cfg.snapshot_interval_sec, 0);
        assert_eq!(cfg.port, 8080);
    }
}
