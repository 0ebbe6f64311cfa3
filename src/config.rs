use dotenvy::dotenv;
use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub jwt_secret: String,
    /// Connections silent for longer than this are dropped by the heartbeat.
    pub client_timeout_secs: u64,
    pub default_page_size: i64,
    pub max_page_size: i64,
    pub max_message_length: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;
        if jwt_secret.len() < 16 {
            return Err(AppError::Config(
                "JWT_SECRET must be at least 16 bytes".into(),
            ));
        }

        let client_timeout_secs = env::var("CLIENT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let default_page_size = env::var("DEFAULT_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(20);

        let max_page_size = env::var("MAX_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        let max_message_length = env::var("MAX_MESSAGE_LENGTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4_000);

        if default_page_size <= 0 || max_page_size <= 0 {
            return Err(AppError::Config("page sizes must be positive".into()));
        }

        Ok(Self {
            port,
            jwt_secret,
            client_timeout_secs,
            default_page_size,
            max_page_size,
            max_message_length,
        })
    }

    /// Clamp a client-supplied page size to the configured bounds.
    pub fn clamp_limit(&self, limit: Option<i64>) -> i64 {
        limit
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            port: 3000,
            jwt_secret: "test-secret-test-secret".into(),
            client_timeout_secs: 30,
            default_page_size: 20,
            max_page_size: 100,
            max_message_length: 4_000,
        }
    }

    #[test]
    fn clamp_limit_applies_default_and_bounds() {
        let cfg = test_config();
        assert_eq!(cfg.clamp_limit(None), 20);
        assert_eq!(cfg.clamp_limit(Some(50)), 50);
        assert_eq!(cfg.clamp_limit(Some(5_000)), 100);
        assert_eq!(cfg.clamp_limit(Some(0)), 1);
        assert_eq!(cfg.clamp_limit(Some(-3)), 1);
    }
}
