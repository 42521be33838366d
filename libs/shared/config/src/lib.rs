use std::env;
use tracing::warn;

pub const DEFAULT_SERVER_PORT: u16 = 3000;
pub const DEFAULT_MAX_RANGE_DAYS: u32 = 90;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    /// When set, the queue is persisted in Redis instead of process memory.
    pub redis_url: Option<String>,
    pub server_port: u16,
    pub max_availability_range_days: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            server_port: parse_or_default("SERVER_PORT", DEFAULT_SERVER_PORT),
            max_availability_range_days: parse_or_default(
                "AVAILABILITY_MAX_RANGE_DAYS",
                DEFAULT_MAX_RANGE_DAYS,
            ),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }
        if config.redis_url.is_none() {
            warn!("REDIS_URL not set, queue state will be kept in memory");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            redis_url: None,
            server_port: DEFAULT_SERVER_PORT,
            max_availability_range_days: DEFAULT_MAX_RANGE_DAYS,
        }
    }
}

fn parse_or_default<T: std::str::FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
