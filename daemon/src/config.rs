use std::env;

/// Daemon configuration, loaded entirely from the environment (§6.5). No
/// config file parsing: this mirrors the original service's `godotenv` +
/// `getEnv(key, fallback)` idiom, just expressed as one `from_env`
/// constructor per sub-config.
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub kafka: KafkaConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub api_key: String,
    pub log_level: String,
    pub native_log_level: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub broker: String,
    pub topic: String,
}

impl Config {
    /// Reads every recognized environment variable (§6.5), applying the
    /// same fallback defaults the original service used.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            app: AppConfig {
                port: env_parsed("APP_PORT", 8080),
                api_key: env::var("API_KEY").unwrap_or_default(),
                log_level: env_or("LOG_LEVEL", "info"),
                native_log_level: env_or("NATIVE_LOG_LEVEL", "off"),
            },
            database: DatabaseConfig {
                host: env_or("DB_HOST", "localhost"),
                port: env_parsed("DB_PORT", 5432),
                user: env_or("DB_USER", "postgres"),
                password: env::var("DB_PASSWORD").unwrap_or_default(),
                name: env_or("DB_NAME", "cnc_broker"),
            },
            kafka: KafkaConfig {
                broker: env_or("KAFKA_BROKER", "localhost:9092"),
                topic: env_or("KAFKA_TOPIC", "cnc.snapshots"),
            },
        })
    }

    pub fn database_admin_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/postgres",
            self.database.user, self.database.password, self.database.host, self.database.port
        )
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.name
        )
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}
