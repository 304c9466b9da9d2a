use crate::error::ApiError;

/// Target database engine, from `DB_ENGINE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbEngine {
    Postgresql,
    Mysql,
    Oracle,
}

impl std::str::FromStr for DbEngine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgresql" => Ok(DbEngine::Postgresql),
            "mysql" => Ok(DbEngine::Mysql),
            "oracle" => Ok(DbEngine::Oracle),
            _ => Err(ConfigError::Invalid {
                key: "DB_ENGINE",
                expected: "one of postgresql, mysql, oracle",
            }),
        }
    }
}

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// A required environment variable is not set.
    Missing(&'static str),
    /// A variable is set but does not parse as the expected type.
    Invalid {
        key: &'static str,
        expected: &'static str,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "Missing environment variable: {key}"),
            ConfigError::Invalid { key, expected } => {
                write!(f, "Invalid value for {key}: expected {expected}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Gateway configuration drawn from the process environment.
///
/// `from_env` loads `.env` via dotenvy first; `.env` files never overwrite
/// variables already present in the environment. The JWT-related keys are
/// stored for the external token validator and are not consumed by the
/// core.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub engine: DbEngine,
    /// Database schema prefix (`DB_SCHEMA`), prepended to table names.
    pub schema: Option<String>,
    /// Credential locator in the configured secret store (`DB_SECRET_NAME`).
    pub secret_name: Option<String>,
    /// Default `LIMIT` applied to list reads without `__limit`.
    pub default_page_size: Option<u64>,
    /// Whether the adapter enforces scope tokens in addition to the
    /// permission tables.
    pub scope_check: bool,
    /// Whether response bodies are converted to camelCase at the boundary.
    pub camel_case: bool,
    pub log_level: Option<String>,
    pub jwks_host: Option<String>,
    pub jwt_issuer: Option<String>,
    pub jwt_allowed_audiences: Option<String>,
    pub jwt_algorithms: Option<String>,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Does not overwrite variables already set in the environment.
        let _ = dotenvy::dotenv();

        let engine = env_opt("DB_ENGINE")
            .ok_or(ConfigError::Missing("DB_ENGINE"))?
            .parse()?;

        let default_page_size = match env_opt("DEFAULT_PAGE_SIZE") {
            None => None,
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| ConfigError::Invalid {
                key: "DEFAULT_PAGE_SIZE",
                expected: "a non-negative integer",
            })?),
        };

        Ok(GatewayConfig {
            engine,
            schema: env_opt("DB_SCHEMA"),
            secret_name: env_opt("DB_SECRET_NAME"),
            default_page_size,
            scope_check: env_opt("SCOPE_CHECK").is_some_and(|v| v == "true" || v == "1"),
            camel_case: env_opt("CAMEL_CASE").is_some_and(|v| v == "true" || v == "1"),
            log_level: env_opt("LOG_LEVEL"),
            jwks_host: env_opt("JWKS_HOST"),
            jwt_issuer: env_opt("JWT_ISSUER"),
            jwt_allowed_audiences: env_opt("JWT_ALLOWED_AUDIENCES"),
            jwt_algorithms: env_opt("JWT_ALGORITHMS"),
        })
    }

    /// A config suitable for tests: Postgres dialect, no schema prefix,
    /// no scope check.
    pub fn for_engine(engine: DbEngine) -> Self {
        GatewayConfig {
            engine,
            schema: None,
            secret_name: None,
            default_page_size: None,
            scope_check: false,
            camel_case: false,
            log_level: None,
            jwks_host: None,
            jwt_issuer: None,
            jwt_allowed_audiences: None,
            jwt_algorithms: None,
        }
    }
}

/// Credential fetch from a secret store, keyed by `DB_SECRET_NAME`.
///
/// The store itself (AWS Secrets Manager, Vault, ...) is an external
/// collaborator; the core only needs this capability at connection setup.
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<String, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_parses_known_values() {
        assert_eq!(
            "postgresql".parse::<DbEngine>().unwrap(),
            DbEngine::Postgresql
        );
        assert_eq!("mysql".parse::<DbEngine>().unwrap(), DbEngine::Mysql);
        assert_eq!("oracle".parse::<DbEngine>().unwrap(), DbEngine::Oracle);
        assert!("sqlite".parse::<DbEngine>().is_err());
    }
}
