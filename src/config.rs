use std::env;
use std::time::Duration;

/// Upper bound accepted for `MAX_WINDOW_HOURS`.
pub const MAX_WINDOW_HOURS_LIMIT: i64 = 24 * 366;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub store_timeout_ms: u64,
    pub default_page_size: u32,
    pub max_window_hours: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "carebook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            store_timeout_ms: env::var("STORE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),
            default_page_size: env::var("DEFAULT_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            max_window_hours: env::var("MAX_WINDOW_HOURS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .map(|h| h.clamp(1, MAX_WINDOW_HOURS_LIMIT))
                .unwrap_or(24),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Longest reservation window, clamped to `1..=MAX_WINDOW_HOURS_LIMIT` hours.
    pub fn max_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_window_hours.clamp(1, MAX_WINDOW_HOURS_LIMIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_window_hours: i64) -> AppConfig {
        AppConfig {
            port: 3000,
            database_url: ":memory:".to_string(),
            admin_token: "t".to_string(),
            store_timeout_ms: 2000,
            default_page_size: 20,
            max_window_hours,
        }
    }

    #[test]
    fn test_max_window_is_clamped() {
        assert_eq!(config(24).max_window(), chrono::Duration::hours(24));
        assert_eq!(
            config(i64::MAX).max_window(),
            chrono::Duration::hours(MAX_WINDOW_HOURS_LIMIT)
        );
        assert_eq!(config(-5).max_window(), chrono::Duration::hours(1));
    }
}
