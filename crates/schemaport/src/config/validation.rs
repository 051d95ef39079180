//! Configuration validation.

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::core::DatabaseKind;
use crate::drivers::SslMode;
use crate::error::{PortError, Result};

/// Largest accepted retry count; 2^20 seconds of backoff is already absurd.
const MAX_RETRIES_LIMIT: u32 = 20;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let db = &config.database;
    let kind = DatabaseKind::parse(&db.r#type)?;

    match kind {
        DatabaseKind::Sqlite => {
            if db.path.as_deref().map_or(true, str::is_empty) {
                return Err(PortError::Config(
                    "database.path is required for sqlite".into(),
                ));
            }
        }
        DatabaseKind::Mysql | DatabaseKind::Postgres => {
            if db.host.is_empty() {
                return Err(PortError::Config("database.host is required".into()));
            }
            if db.database.is_empty() {
                return Err(PortError::Config("database.database is required".into()));
            }
            if db.user.is_empty() {
                return Err(PortError::Config("database.user is required".into()));
            }
            if db.port == Some(0) {
                return Err(PortError::Config("database.port must be non-zero".into()));
            }
        }
    }

    SslMode::parse(&db.ssl_mode)?;

    if config.dump.chunk_size == 0 {
        return Err(PortError::Config(
            "dump.chunk_size must be at least 1".into(),
        ));
    }

    if config.retry.max_retries > MAX_RETRIES_LIMIT {
        return Err(PortError::Config(format!(
            "retry.max_retries must be at most {}",
            MAX_RETRIES_LIMIT
        )));
    }
    if config.retry.base_delay_ms == 0 {
        return Err(PortError::Config(
            "retry.base_delay_ms must be at least 1".into(),
        ));
    }

    if let Some(ref tenant) = config.tenant {
        validate_identifier(&tenant.column)?;
        validate_identifier(&tenant.registry_column)?;
        if let Some(ref registry) = tenant.registry_table {
            validate_identifier(registry)?;
        }
        if tenant.default_id.is_empty() {
            return Err(PortError::Config(
                "tenant.default_id cannot be empty".into(),
            ));
        }
        if tenant.consolidate_to.as_deref() == Some("") {
            return Err(PortError::Config(
                "tenant.consolidate_to cannot be empty".into(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, DumpConfig, RetryConfig, TenantConfig};

    fn valid_config() -> Config {
        Config {
            database: DatabaseConfig {
                r#type: "postgres".to_string(),
                path: None,
                host: "localhost".to_string(),
                port: Some(5432),
                database: "app".to_string(),
                user: "app".to_string(),
                password: "password".to_string(),
                ssl_mode: "disable".to_string(),
            },
            dump: DumpConfig::default(),
            retry: RetryConfig::default(),
            tenant: None,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_unknown_type() {
        let mut config = valid_config();
        config.database.r#type = "oracle".to_string();
        assert!(matches!(
            validate(&config),
            Err(PortError::UnknownDialect(_))
        ));
    }

    #[test]
    fn test_sqlite_requires_path() {
        let mut config = valid_config();
        config.database = DatabaseConfig::sqlite("");
        assert!(validate(&config).is_err());
        config.database = DatabaseConfig::sqlite("app.db");
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_host() {
        let mut config = valid_config();
        config.database.host = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_chunk_size() {
        let mut config = valid_config();
        config.dump.chunk_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_ssl_mode() {
        let mut config = valid_config();
        config.database.ssl_mode = "sometimes".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_retry_bounds() {
        let mut config = valid_config();
        config.retry.max_retries = 21;
        assert!(validate(&config).is_err());
        config.retry.max_retries = 5;
        config.retry.base_delay_ms = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_tenant_validation() {
        let mut config = valid_config();
        config.tenant = Some(TenantConfig {
            default_id: String::new(),
            ..TenantConfig::default()
        });
        assert!(validate(&config).is_err());

        config.tenant = Some(TenantConfig::default());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_database_config_debug_redacts_password() {
        let mut config = valid_config();
        config.database.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.database);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_123"));
    }
}
