use serde::Deserialize;
use std::{env, path::Path, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub app: AppConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    pub service_name: String,
    pub port: u16,
    pub env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PathsConfig {
    pub database: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TelemetryConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is not set.
    pub log_filter: Option<String>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ConfigBuild(config::ConfigError),
    #[error("failed to parse configuration: {0}")]
    Deserialize(config::ConfigError),
    #[error("missing required environment variable {0}")]
    MissingEnvVar(String),
    #[error("invalid APP_PORT override: {0}")]
    InvalidPort(std::num::ParseIntError),
}

impl Config {
    /// Read `path`, apply the `APP_PORT` and `DATABASE_PATH` overrides, then
    /// resolve `env:` markers and expand `~` in the database path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()
            .map_err(ConfigError::ConfigBuild)?;

        let mut cfg: Config = raw.try_deserialize().map_err(ConfigError::Deserialize)?;
        cfg.apply_env_overrides()?;
        cfg.resolve_env_markers()?;
        Ok(cfg)
    }

    pub fn is_dev(&self) -> bool {
        self.app.env.eq_ignore_ascii_case("dev")
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = env::var("APP_PORT") {
            let port: u16 = port.parse().map_err(ConfigError::InvalidPort)?;
            self.app.port = port;
        }

        if let Ok(database) = env::var("DATABASE_PATH") {
            self.paths.database = PathBuf::from(database);
        }

        Ok(())
    }

    fn resolve_env_markers(&mut self) -> Result<(), ConfigError> {
        resolve_marker(&mut self.app.service_name)?;
        resolve_marker(&mut self.app.env)?;
        if let Some(filter) = self.telemetry.log_filter.as_mut() {
            resolve_marker(filter)?;
        }

        let mut database = self.paths.database.to_string_lossy().into_owned();
        resolve_marker(&mut database)?;
        self.paths.database = PathBuf::from(shellexpand::tilde(&database).as_ref());
        Ok(())
    }
}

/// Replace an `env:NAME` value with the contents of `NAME`.
fn resolve_marker(value: &mut String) -> Result<(), ConfigError> {
    let Some(name) = value.strip_prefix("env:") else {
        return Ok(());
    };
    *value = env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))?;
    Ok(())
}
