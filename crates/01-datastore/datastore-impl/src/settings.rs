//! 全局配置加载

use datastore_common::{DatastoreError, DatastoreResult, DatastoreSettings};
use std::path::PathBuf;
use tracing::{debug, error, info};

/// 默认配置文件（不含扩展名）
pub const DEFAULT_SETTINGS_FILE: &str = "config/cfgstore";

/// 默认环境变量前缀
pub const DEFAULT_ENV_PREFIX: &str = "CFGSTORE";

/// 配置加载器
///
/// 依次叠加：内置默认值、可选的配置文件、环境变量（`CFGSTORE_COMMIT_RETRIES`、
/// `CFGSTORE_BACKEND__KIND` 这样的形式，嵌套字段用 `__` 分隔）。
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    default_file: Option<String>,
    files: Vec<PathBuf>,
    env_prefix: String,
}

impl SettingsLoader {
    /// 使用默认配置文件和环境变量前缀
    pub fn new() -> Self {
        Self {
            default_file: Some(DEFAULT_SETTINGS_FILE.to_string()),
            files: Vec::new(),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// 不读取默认配置文件
    pub fn without_default_file(mut self) -> Self {
        self.default_file = None;
        self
    }

    /// 追加配置文件，格式由扩展名决定，后加入的优先
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// 设置环境变量前缀
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// 加载配置
    pub fn load(&self) -> DatastoreResult<DatastoreSettings> {
        let mut builder = config::Config::builder();

        if let Some(name) = &self.default_file {
            builder = builder.add_source(config::File::with_name(name).required(false));
        }
        for path in &self.files {
            debug!("添加配置文件: {}", path.display());
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                error!("配置构建失败: {}", e);
                DatastoreError::Config {
                    message: e.to_string(),
                }
            })?;

        let result: DatastoreSettings = settings.try_deserialize().map_err(|e| {
            error!("配置绑定失败: {}", e);
            DatastoreError::Config {
                message: e.to_string(),
            }
        })?;

        info!(
            "配置加载完成: 数据存储 {}, 通配删除 {:?}, 后端 {:?}",
            result.default_datastore, result.wildcard_delete, result.backend
        );
        Ok(result)
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// 使用默认文件和环境变量前缀加载配置
pub fn load_settings() -> DatastoreResult<DatastoreSettings> {
    SettingsLoader::new().load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastore_common::{BackendSettings, Datastore, WildcardDeletePolicy};
    use std::io::Write;

    #[test]
    fn test_defaults_without_sources() {
        let settings = SettingsLoader::new()
            .without_default_file()
            .with_env_prefix("CFGSTORE_TEST_EMPTY")
            .load()
            .unwrap();
        assert_eq!(settings, DatastoreSettings::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
default_datastore = "startup"
wildcard_delete = "top_level_only"
commit_retries = 5

[backend]
kind = "json"
data_dir = "/var/lib/cfgstore"
"#
        )
        .unwrap();

        let settings = SettingsLoader::new()
            .without_default_file()
            .with_file(file.path())
            .with_env_prefix("CFGSTORE_TEST_FILE")
            .load()
            .unwrap();
        assert_eq!(settings.default_datastore, Datastore::Startup);
        assert_eq!(settings.wildcard_delete, WildcardDeletePolicy::TopLevelOnly);
        assert_eq!(settings.commit_retries, 5);
        assert_eq!(settings.retry_backoff_ms, 1);
        assert_eq!(
            settings.backend,
            BackendSettings::Json {
                data_dir: "/var/lib/cfgstore".into()
            }
        );
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("CFGSTORE_TEST_ENV_COMMIT_RETRIES", "7");
        std::env::set_var("CFGSTORE_TEST_ENV_DEFAULT_DATASTORE", "candidate");

        let settings = SettingsLoader::new()
            .without_default_file()
            .with_env_prefix("CFGSTORE_TEST_ENV")
            .load()
            .unwrap();
        assert_eq!(settings.commit_retries, 7);
        assert_eq!(settings.default_datastore, Datastore::Candidate);

        std::env::remove_var("CFGSTORE_TEST_ENV_COMMIT_RETRIES");
        std::env::remove_var("CFGSTORE_TEST_ENV_DEFAULT_DATASTORE");
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let result = SettingsLoader::new()
            .without_default_file()
            .with_file("/nonexistent/cfgstore.toml")
            .load();
        assert!(matches!(result, Err(DatastoreError::Config { .. })));
    }
}
