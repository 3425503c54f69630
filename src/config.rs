use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub floor_modules: FloorModuleConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingConfig {
    /// Days before a template's start date that a schedule hit may fire.
    pub advance_days: i64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self { advance_days: 7 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FloorModuleConfig {
    pub allowed_extensions: Vec<String>,
    pub max_width: u32,
    pub max_height: u32,
    pub max_size_bytes: u64,
}

impl Default for FloorModuleConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: vec![".png".to_string(), ".jpg".to_string(), ".jpeg".to_string()],
            max_width: 8192,
            max_height: 8192,
            max_size_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicesConfig {
    /// Base URL of the image hub; unset means floor images are not mirrored.
    pub image_hub_url: Option<String>,
    /// Base URL of the notification service; unset means notifications are
    /// logged and dropped.
    pub notification_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub site_ttl_secs: u64,
    pub floor_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            site_ttl_secs: 3600,
            floor_ttl_secs: 6 * 3600,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            scheduling: SchedulingConfig::default(),
            floor_modules: FloorModuleConfig::default(),
            services: ServicesConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory; a missing file means
    /// defaults, a malformed file is an error.
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    pub fn load_from(path: &str) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let config: Config = toml::from_str(&content)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(Error::Config(format!(
                "Failed to read config file '{path}': {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_from("does-not-exist.toml").unwrap();
        assert_eq!(config.scheduling.advance_days, 7);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[scheduling]\nadvance_days = 3").unwrap();

        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.scheduling.advance_days, 3);
        assert_eq!(config.floor_modules.max_width, 8192);
    }
}
