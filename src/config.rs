// src/config.rs - Configuration management
use serde::Deserialize;
use std::env;
use anyhow::{Context, Result};
use rand::{thread_rng, Rng, distributions::Alphanumeric};
use std::path::Path;
use std::fs;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub transfer_rules: TransferRulesConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: u64,
    pub client_timeout: u64,
    pub client_shutdown: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiration_hours: i64,
    pub bcrypt_cost: u32,
    pub max_login_attempts: u32,
    pub lockout_duration_minutes: u64,
    pub allow_self_registration: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub max_request_size: usize,
    pub require_https: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub console_enabled: bool,
}

// ==================== TRANSFER RULES ====================
// Таблица совместимости складов — это данные конфигурации, а не код.

#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseGroupConfig {
    pub name: String,
    pub warehouses: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransferRulesConfig {
    /// Internal transfers are legal only inside one of these groups
    pub internal_groups: Vec<WarehouseGroupConfig>,
    /// External transfers are legal only between these warehouses
    pub external_warehouses: Vec<String>,
    /// Warehouses barred from transfers entirely
    pub hold_warehouses: Vec<String>,
}

impl Default for TransferRulesConfig {
    fn default() -> Self {
        Self {
            internal_groups: vec![
                WarehouseGroupConfig {
                    name: "Main".to_string(),
                    warehouses: vec![
                        "Main Warehouse".to_string(),
                        "Damage".to_string(),
                        "Damage For Sale".to_string(),
                    ],
                },
                WarehouseGroupConfig {
                    name: "Store".to_string(),
                    warehouses: vec![
                        "Store Warehouse".to_string(),
                        "Store Display".to_string(),
                        "Store Damage".to_string(),
                    ],
                },
            ],
            external_warehouses: vec![
                "Main Warehouse".to_string(),
                "Store Warehouse".to_string(),
            ],
            hold_warehouses: vec!["Hold (Reserved)".to_string()],
        }
    }
}

// Dummy defaults for tests (no ENV read here)
impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dummy_32_chars_for_tests_only!!!".to_string(),
            token_expiration_hours: 24,
            bcrypt_cost: 10,
            max_login_attempts: 5,
            lockout_duration_minutes: 15,
            allow_self_registration: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: None,
            keep_alive: 30,
            client_timeout: 30,
            client_shutdown: 5,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:wms.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: 30,
            idle_timeout: 600,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://127.0.0.1:8080".to_string(),
                "http://localhost:8080".to_string(),
            ],
            max_request_size: 1024 * 1024,
            require_https: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            console_enabled: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
            transfer_rules: TransferRulesConfig::default(),
        }
    }
}

// Генерация безопасного JWT секрета
pub fn generate_jwt_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

pub fn load_config() -> Result<Config> {
    load_env_file()?;

    let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
        let path = Path::new(&config_file);
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", config_file))?;
        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_file))?
    } else {
        Config::default()
    };

    override_with_env(&mut config)?;

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

fn override_with_env(config: &mut Config) -> Result<()> {
    if let Ok(host) = env::var("BIND_ADDRESS") {
        config.server.host = host;
    }
    if let Ok(port_str) = env::var("WMS_PORT") {
        if let Ok(port) = port_str.parse::<u16>() {
            config.server.port = port;
        }
    }
    if let Ok(workers_str) = env::var("WMS_WORKERS") {
        if let Ok(workers) = workers_str.parse::<usize>() {
            config.server.workers = Some(workers);
        }
    }
    if let Ok(jwt_secret) = env::var("JWT_SECRET") {
        config.auth.jwt_secret = jwt_secret;
    }
    if let Ok(expiration_str) = env::var("AUTH_TOKEN_EXPIRATION_HOURS") {
        if let Ok(expiration) = expiration_str.parse::<i64>() {
            config.auth.token_expiration_hours = expiration;
        }
    }
    if let Ok(bcrypt_str) = env::var("AUTH_BCRYPT_COST") {
        if let Ok(bcrypt) = bcrypt_str.parse::<u32>() {
            config.auth.bcrypt_cost = bcrypt;
        }
    }
    if let Ok(max_str) = env::var("AUTH_MAX_LOGIN_ATTEMPTS") {
        if let Ok(max) = max_str.parse::<u32>() {
            config.auth.max_login_attempts = max;
        }
    }
    if let Ok(lockout_str) = env::var("AUTH_LOCKOUT_DURATION_MINUTES") {
        if let Ok(lockout) = lockout_str.parse::<u64>() {
            config.auth.lockout_duration_minutes = lockout;
        }
    }
    if let Ok(url) = env::var("DATABASE_URL") {
        config.database.url = url;
    }
    if let Ok(max_conn_str) = env::var("DATABASE_MAX_CONNECTIONS") {
        if let Ok(max_conn) = max_conn_str.parse::<u32>() {
            config.database.max_connections = max_conn;
        }
    }
    if let Ok(min_conn_str) = env::var("DATABASE_MIN_CONNECTIONS") {
        if let Ok(min_conn) = min_conn_str.parse::<u32>() {
            config.database.min_connections = min_conn;
        }
    }
    if let Ok(origins_str) = env::var("ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(level) = env::var("RUST_LOG") {
        config.logging.level = level;
    }

    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long (current: {})",
                self.auth.jwt_secret.len()
            ));
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "max_connections ({}) must be >= min_connections ({})",
                self.database.max_connections,
                self.database.min_connections
            ));
        }

        if self.transfer_rules.internal_groups.is_empty() {
            return Err(anyhow::anyhow!(
                "transfer_rules must configure at least one internal warehouse group"
            ));
        }

        for group in &self.transfer_rules.internal_groups {
            if group.warehouses.len() < 2 {
                return Err(anyhow::anyhow!(
                    "warehouse group '{}' needs at least two warehouses",
                    group.name
                ));
            }
        }

        if self.transfer_rules.external_warehouses.len() < 2 {
            return Err(anyhow::anyhow!(
                "transfer_rules.external_warehouses must name at least two warehouses"
            ));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        env::var("WMS_ENV").map(|v| v == "production").unwrap_or(false)
    }

    /// Every warehouse the rules mention, with its group (hold warehouses get
    /// their own group name). Used to seed the warehouses table.
    pub fn all_warehouses(&self) -> Vec<(String, String, bool)> {
        let mut warehouses = Vec::new();
        for group in &self.transfer_rules.internal_groups {
            for warehouse in &group.warehouses {
                warehouses.push((warehouse.clone(), group.name.clone(), false));
            }
        }
        for warehouse in &self.transfer_rules.hold_warehouses {
            warehouses.push((warehouse.clone(), "Hold".to_string(), true));
        }
        warehouses
    }

    pub fn print_startup_info(&self) {
        log::info!("WMS Starting up...");
        log::info!("Server: {}:{}", self.server.host, self.server.port);
        log::info!("Database: {}",
            if self.database.url.contains("sqlite") { "SQLite" }
            else if self.database.url.contains("postgres") { "PostgreSQL" }
            else { "Unknown" });
        log::info!("Auth: JWT ({}h expiration)", self.auth.token_expiration_hours);
        log::info!("Logging: {} level", self.logging.level);
        log::info!(
            "Transfer rules: {} internal group(s), {} external warehouse(s)",
            self.transfer_rules.internal_groups.len(),
            self.transfer_rules.external_warehouses.len()
        );

        if !self.is_production() {
            log::warn!("Running in development mode");
        }
    }
}

pub fn load_env_file() -> Result<()> {
    if let Ok(env_file) = env::var("ENV_FILE") {
        dotenvy::from_filename(&env_file)
            .with_context(|| format!("Failed to load environment file: {}", env_file))?;
    } else if Path::new(".env").exists() {
        dotenvy::dotenv().context("Failed to load .env file")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert!(config.auth.jwt_secret.len() >= 32);
        assert_eq!(config.transfer_rules.internal_groups.len(), 2);
        assert_eq!(config.transfer_rules.external_warehouses.len(), 2);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Короткий секрет
        config.auth.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());

        // Достаточный секрет
        config.auth.jwt_secret = "a".repeat(32);
        assert!(config.validate().is_ok());

        // Некорректные соединения БД
        config.database.max_connections = 1;
        config.database.min_connections = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_transfer_rules_validation() {
        let mut config = Config::default();

        config.transfer_rules.internal_groups.clear();
        assert!(config.validate().is_err());

        config.transfer_rules = TransferRulesConfig::default();
        config.transfer_rules.external_warehouses = vec!["Only One".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_content = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [auth]
        jwt_secret = "test_secret_123456789012345678901234567890"

        [transfer_rules]
        external_warehouses = ["North A", "South A"]
        hold_warehouses = []

        [[transfer_rules.internal_groups]]
        name = "North"
        warehouses = ["North A", "North B"]
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.transfer_rules.internal_groups[0].name, "North");
        // sections omitted from the file keep their defaults
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_all_warehouses_seed_list() {
        let config = Config::default();
        let warehouses = config.all_warehouses();
        assert_eq!(warehouses.len(), 7); // 3 + 3 internal + 1 hold
        assert!(warehouses.iter().any(|(name, _, is_hold)| name == "Hold (Reserved)" && *is_hold));
    }

    #[test]
    fn test_generate_jwt_secret_length() {
        assert_eq!(generate_jwt_secret().len(), 64);
    }

    #[test]
    fn test_load_config_from_file() {
        let toml_content = r#"
        [server]
        host = "10.0.0.5"

        [auth]
        jwt_secret = "file_secret_1234567890123456789012345678"
        "#;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, toml_content).unwrap();

        env::set_var("CONFIG_FILE", path.to_str().unwrap());
        let config = load_config().unwrap();
        env::remove_var("CONFIG_FILE");

        assert_eq!(config.server.host, "10.0.0.5");
        assert_eq!(
            config.auth.jwt_secret,
            "file_secret_1234567890123456789012345678"
        );
    }
}
