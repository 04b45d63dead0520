use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Parse error for {field}: {value} - {message}")]
    Parse {
        field: &'static str,
        value: String,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// 服务配置，全部来自环境变量（启动时先由 dotenvy 加载 .env）
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub http_host: String,
    pub http_port: u16,
    pub max_connections: u32,
    /// 为 true 时，执行失败的响应里带上存储引擎的原始报错
    pub expose_error_details: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            http_host: "0.0.0.0".to_string(),
            http_port: 3000,
            max_connections: 5,
            expose_error_details: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            database_url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            http_host: env::var("BI_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: parse_env_var("BI_PORT", "3000")?,
            max_connections: parse_env_var("BI_DB_MAX_CONNECTIONS", "5")?,
            expose_error_details: parse_env_var("BI_EXPOSE_ERROR_DETAILS", "false")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("DATABASE_URL cannot be empty".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "BI_DB_MAX_CONNECTIONS must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.http_host, self.http_port);
        raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Parse {
            field: "BI_HOST",
            value: raw.clone(),
            message: e.to_string(),
        })
    }
}

fn parse_env_var<T>(field: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = env::var(field).unwrap_or_else(|_| default.to_string());
    value.trim().parse().map_err(|e: T::Err| ConfigError::Parse {
        field,
        value: value.clone(),
        message: e.to_string(),
    })
}
