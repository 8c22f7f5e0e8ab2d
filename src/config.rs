use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub minio: MinioConfig,
    pub jwt: JwtConfig,
    pub webhooks: WebhookConfig,
    pub polling: PollingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    pub profile_cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct MinioConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub use_ssl: bool,
    pub region: String,
    pub media_bucket: String,
    pub attachments_bucket: String,
    pub public_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub issuer: String,
}

/// Endpoints of the external services that own the WhatsApp sessions.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub create_instance_url: String,
    pub connect_url: String,
    pub status_url: String,
    pub profile_url: String,
    pub disconnect_url: String,
    pub delete_instance_url: String,
    pub message_relay_url: String,
    pub n8n_inbound_url: Option<String>,
    pub api_key: Option<String>,
    pub relay_secret: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval used by the dashboard pairing flow.
    pub interval: Duration,
    /// Interval and cap used by the server-side connect relay.
    pub relay_interval: Duration,
    pub relay_max_attempts: u32,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(default)
}

/// Poll intervals must be non-zero; anything below 1 ms is raised to 1 ms.
fn interval_ms_or(key: &str, default: u64) -> Duration {
    Duration::from_millis(parsed_or(key, default).max(MIN_POLL_INTERVAL_MS))
}

const MIN_POLL_INTERVAL_MS: u64 = 1;

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let webhook_base = var_or("WEBHOOK_BASE_URL", "http://localhost:5678/webhook");

        Config {
            server: ServerConfig {
                host: var_or("SERVER_HOST", "0.0.0.0"),
                port: parsed_or("SERVER_PORT", 8080),
                environment: var_or("ENVIRONMENT", "development"),
            },
            database: DatabaseConfig {
                host: var_or("DB_HOST", "localhost"),
                port: parsed_or("DB_PORT", 5432),
                user: var_or("DB_USER", "postgres"),
                password: var_or("DB_PASSWORD", "postgres"),
                database: var_or("DB_NAME", "inbox_crm"),
                ssl_mode: var_or("DB_SSL_MODE", "disable"),
                max_connections: parsed_or("DB_MAX_CONNS", 25),
            },
            redis: RedisConfig {
                host: var_or("REDIS_HOST", "localhost"),
                port: parsed_or("REDIS_PORT", 6379),
                password: env::var("REDIS_PASSWORD").ok(),
                db: parsed_or("REDIS_DB", 0),
                profile_cache_ttl: Duration::from_secs(parsed_or("PROFILE_CACHE_TTL", 60)),
            },
            minio: MinioConfig {
                endpoint: var_or("MINIO_ENDPOINT", "http://localhost:9000"),
                access_key: var_or("MINIO_ACCESS_KEY", "minioadmin"),
                secret_key: var_or("MINIO_SECRET_KEY", "minioadmin"),
                use_ssl: parsed_or("MINIO_USE_SSL", false),
                region: var_or("MINIO_REGION", "us-east-1"),
                media_bucket: "media".to_string(),
                attachments_bucket: "attachments".to_string(),
                public_url: env::var("MINIO_PUBLIC_URL").ok(),
            },
            jwt: JwtConfig {
                secret: var_or("JWT_SECRET", "super-secret-jwt-key-change-in-production"),
                access_token_ttl: Duration::from_secs(parsed_or("JWT_ACCESS_TOKEN_TTL", 60 * 60)), // 1 hour
                refresh_token_ttl: Duration::from_secs(parsed_or(
                    "JWT_REFRESH_TOKEN_TTL",
                    7 * 24 * 60 * 60, // 7 days
                )),
                issuer: var_or("JWT_ISSUER", "inbox-crm"),
            },
            webhooks: WebhookConfig {
                create_instance_url: env::var("WEBHOOK_CREATE_INSTANCE_URL")
                    .unwrap_or_else(|_| format!("{}/criar-instancia", webhook_base)),
                connect_url: env::var("WEBHOOK_CONNECT_URL")
                    .unwrap_or_else(|_| format!("{}/conectar", webhook_base)),
                status_url: env::var("WEBHOOK_STATUS_URL")
                    .unwrap_or_else(|_| format!("{}/status", webhook_base)),
                profile_url: env::var("WEBHOOK_PROFILE_URL")
                    .unwrap_or_else(|_| format!("{}/perfil", webhook_base)),
                disconnect_url: env::var("WEBHOOK_DISCONNECT_URL")
                    .unwrap_or_else(|_| format!("{}/desconectar", webhook_base)),
                delete_instance_url: env::var("WEBHOOK_DELETE_INSTANCE_URL")
                    .unwrap_or_else(|_| format!("{}/deletar-instancia", webhook_base)),
                message_relay_url: env::var("WEBHOOK_MESSAGE_RELAY_URL")
                    .unwrap_or_else(|_| format!("{}/enviar-mensagem", webhook_base)),
                n8n_inbound_url: env::var("N8N_INBOUND_WEBHOOK_URL").ok(),
                api_key: env::var("WEBHOOK_API_KEY").ok(),
                relay_secret: env::var("WEBHOOK_RELAY_SECRET").ok(),
                request_timeout: Duration::from_secs(parsed_or("WEBHOOK_TIMEOUT_SECS", 15)),
            },
            polling: PollingConfig {
                interval: interval_ms_or("PAIRING_POLL_INTERVAL_MS", 3_000),
                relay_interval: interval_ms_or("RELAY_POLL_INTERVAL_MS", 5_000),
                relay_max_attempts: parsed_or("RELAY_POLL_MAX_ATTEMPTS", 60),
            },
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.database,
            self.database.ssl_mode
        )
    }

    pub fn redis_url(&self) -> String {
        match &self.redis.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.redis.host, self.redis.port, self.redis.db
            ),
            None => format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.db
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_defaults_for_polling() {
        let config = Config::load();
        // 60 attempts, 5s apart: the relay gives up after five minutes.
        assert_eq!(
            config.polling.relay_interval * config.polling.relay_max_attempts,
            Duration::from_secs(300)
        );
        assert_eq!(config.polling.interval, Duration::from_secs(3));
    }

    #[test]
    fn zero_poll_interval_is_raised() {
        env::set_var("INBOX_CRM_TEST_ZERO_INTERVAL", "0");
        assert_eq!(
            interval_ms_or("INBOX_CRM_TEST_ZERO_INTERVAL", 3_000),
            Duration::from_millis(1)
        );
        assert_eq!(
            interval_ms_or("INBOX_CRM_TEST_UNSET_INTERVAL", 3_000),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn builds_redis_url_without_password() {
        let mut config = Config::load();
        config.redis.password = None;
        config.redis.host = "cache".into();
        config.redis.port = 6380;
        config.redis.db = 2;
        assert_eq!(config.redis_url(), "redis://cache:6380/2");
    }
}
