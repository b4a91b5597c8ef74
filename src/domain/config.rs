//! Process configuration, loaded once from the environment.

/// Pool and connection tuning for the Postgres store.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub idle_timeout_ms: u64,
}

/// Application configuration shared by the ingest server, the materializer,
/// and the job binaries. Every optional value has a sane default and parsing
/// never panics; a malformed numeric var falls back to the default rather
/// than aborting startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub api_keys: Vec<String>,
    pub pool: PoolConfig,
    pub max_body_bytes: usize,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let api_keys = std::env::var("EVAL_API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let pool = PoolConfig {
            max_connections: std::env::var("PG_POOL_MAX")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            connect_timeout_ms: std::env::var("PG_CONNECT_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            idle_timeout_ms: std::env::var("PG_IDLE_TIMEOUT_MS")
                .unwrap_or_else(|_| "300000".to_string())
                .parse()
                .unwrap_or(300_000),
        };

        let max_body_bytes = std::env::var("MAX_BODY_BYTES")
            .unwrap_or_else(|_| "5242880".to_string())
            .parse()
            .unwrap_or(5 * 1024 * 1024);

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            database_url,
            host,
            port,
            api_keys,
            pool,
            max_body_bytes,
            log_level,
        })
    }

    pub fn auth_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }
}

/// Tunables shared by the scheduled analysis jobs. Each field maps to an
/// environment variable of the same name (see the job binary for defaults);
/// grouped here so a job's `main` builds one of these instead of threading
/// a dozen loose arguments.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub tenant_id: String,
    pub lookback_hours: i64,
    pub min_history: usize,
    pub per_group_limit: usize,
    pub window_hours: i64,
    pub significance_metric: String,
    pub alpha: f64,
    pub baseline_hours: i64,
    pub current_hours: i64,
}

impl JobConfig {
    pub fn from_env() -> Self {
        Self {
            tenant_id: std::env::var("TENANT_ID").unwrap_or_default(),
            lookback_hours: parse_env_or("LOOKBACK_HOURS", 24),
            min_history: parse_env_or("MIN_HISTORY", 20),
            per_group_limit: parse_env_or("PER_GROUP_LIMIT", 20),
            window_hours: parse_env_or("WINDOW_HOURS", 24),
            significance_metric: std::env::var("SIGNIFICANCE_METRIC")
                .unwrap_or_else(|_| "quality".to_string()),
            alpha: parse_env_or("ALPHA", 0.05),
            baseline_hours: parse_env_or("BASELINE_HOURS", 168),
            current_hours: parse_env_or("CURRENT_HOURS", 24),
        }
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_disabled_when_no_keys() {
        let cfg = Config {
            database_url: "postgres://x".into(),
            host: "0.0.0.0".into(),
            port: 8080,
            api_keys: vec![],
            pool: PoolConfig {
                max_connections: 1,
                connect_timeout_ms: 1,
                idle_timeout_ms: 1,
            },
            max_body_bytes: 1,
            log_level: "info".into(),
        };
        assert!(!cfg.auth_enabled());
    }

    #[test]
    fn parse_env_or_falls_back_on_missing_var() {
        std::env::remove_var("DOES_NOT_EXIST_XYZ");
        assert_eq!(parse_env_or::<u32>("DOES_NOT_EXIST_XYZ", 7), 7);
    }
}
