//! 数据存储配置定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 数据存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datastore {
    /// 启动配置
    Startup,
    /// 运行配置
    Running,
    /// 候选配置
    Candidate,
}

impl Datastore {
    /// 全部数据存储
    pub const ALL: [Self; 3] = [Self::Startup, Self::Running, Self::Candidate];

    /// 名称
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Running => "running",
            Self::Candidate => "candidate",
        }
    }
}

impl Default for Datastore {
    fn default() -> Self {
        Self::Running
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Datastore {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "startup" => Ok(Self::Startup),
            "running" => Ok(Self::Running),
            "candidate" => Ok(Self::Candidate),
            other => Err(format!("未知的数据存储: {other}")),
        }
    }
}

/// 模块通配删除（`/module:*`）的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WildcardDeletePolicy {
    /// 删除模块的全部数据
    Recursive,
    /// 只删除顶层节点，后代节点保留
    TopLevelOnly,
}

impl Default for WildcardDeletePolicy {
    fn default() -> Self {
        Self::Recursive
    }
}

/// 存储后端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendSettings {
    /// 进程内存储
    Memory,
    /// JSON 文件存储
    Json {
        /// 数据目录
        data_dir: PathBuf,
    },
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self::Memory
    }
}

/// 会话选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionOptions {
    /// 通配删除策略
    #[serde(default)]
    pub wildcard_delete: WildcardDeletePolicy,
}

impl SessionOptions {
    /// 设置通配删除策略
    pub fn with_wildcard_delete(mut self, policy: WildcardDeletePolicy) -> Self {
        self.wildcard_delete = policy;
        self
    }
}

/// 数据存储全局配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreSettings {
    /// 新会话默认的数据存储
    pub default_datastore: Datastore,
    /// 通配删除策略
    pub wildcard_delete: WildcardDeletePolicy,
    /// 调用方在提交失败时的最大重试次数（核心本身不重试）
    pub commit_retries: u32,
    /// 重试间隔（毫秒）
    pub retry_backoff_ms: u64,
    /// 存储后端
    pub backend: BackendSettings,
}

impl Default for DatastoreSettings {
    fn default() -> Self {
        Self {
            default_datastore: Datastore::Running,
            wildcard_delete: WildcardDeletePolicy::Recursive,
            commit_retries: 3,
            retry_backoff_ms: 1,
            backend: BackendSettings::Memory,
        }
    }
}

impl DatastoreSettings {
    /// 由全局配置得到会话选项
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            wildcard_delete: self.wildcard_delete,
        }
    }

    /// 重试间隔
    pub fn retry_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_backoff_ms)
    }
}
