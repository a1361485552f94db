use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use crate::core::{DataType, DispatchConfig, Result, UploadError};

pub const DEFAULT_CONFIG_FILE: &str = "bulkload.toml";

/// 后台接口路径
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Routes {
    pub suggest: String,
    pub upload: String,
    pub progress: String,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            suggest: "/api/csv/suggest-accounts".to_string(),
            upload: "/api/csv/upload".to_string(),
            progress: "/api/csv/upload-progress".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub token: Option<String>,
    /// 队列中最多同时存在的文件数
    pub max_files: usize,
    /// 批量上传时两次上传之间的间隔
    pub dispatch_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub poll_progress: bool,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
    pub default_data_type: DataType,
    pub routes: Routes,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            token: None,
            max_files: 10,
            dispatch_delay_ms: 500,
            request_timeout_secs: 300,
            poll_progress: true,
            poll_interval_ms: 1000,
            poll_timeout_secs: 600,
            default_data_type: DataType::Order,
            routes: Routes::default(),
        }
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Config> {
        toml::from_str(content).map_err(|err| UploadError::Config(err.to_string()))
    }

    /// 读取配置文件；文件不存在时使用默认值，之后应用环境变量
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();

        let config = match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(err) => return Err(err.into()),
        };

        Ok(config.with_overrides(
            std::env::var("BULKLOAD_ENDPOINT").ok(),
            std::env::var("BULKLOAD_TOKEN").ok(),
        ))
    }

    pub fn with_overrides(mut self, endpoint: Option<String>, token: Option<String>) -> Config {
        if let Some(endpoint) = endpoint.filter(|value| !value.trim().is_empty()) {
            self.endpoint = endpoint;
        }
        if let Some(token) = token.filter(|value| !value.trim().is_empty()) {
            self.token = Some(token);
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            delay: Duration::from_millis(self.dispatch_delay_ms),
            poll_progress: self.poll_progress,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.endpoint, "http://localhost:8000");
        assert_eq!(config.max_files, 10);
        assert_eq!(config.dispatch_config().delay, Duration::from_millis(500));
        assert_eq!(config.routes, Routes::default());
        assert_eq!(config.default_data_type, DataType::Order);
    }

    #[test]
    fn test_partial_file() {
        let config = Config::from_toml(
            r#"
            endpoint = "https://backoffice.example.com"
            max_files = 25
            dispatch_delay_ms = 0
            default_data_type = "listing"

            [routes]
            upload = "/v2/csv/upload"
            "#,
        )
        .unwrap();

        assert_eq!(config.endpoint, "https://backoffice.example.com");
        assert_eq!(config.max_files, 25);
        assert!(config.dispatch_config().delay.is_zero());
        assert_eq!(config.default_data_type, DataType::Listing);
        assert_eq!(config.routes.upload, "/v2/csv/upload");
        assert_eq!(config.routes.suggest, "/api/csv/suggest-accounts");
    }

    #[test]
    fn test_malformed_file() {
        let err = Config::from_toml("max_files = \"many\"").unwrap_err();
        assert!(matches!(err, UploadError::Config(_)));
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_progress = false").unwrap();
        writeln!(file, "token = \"file-token\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(!config.poll_progress);
        assert!(config.token.is_some());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.max_files, 10);
    }

    #[test]
    fn test_overrides() {
        let config = Config::default().with_overrides(
            Some("http://10.0.0.2:9000".to_string()),
            Some(String::new()),
        );
        assert_eq!(config.endpoint, "http://10.0.0.2:9000");
        assert!(config.token.is_none());
    }
}
