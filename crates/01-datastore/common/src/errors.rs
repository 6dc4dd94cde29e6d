//! 错误类型定义

use thiserror::Error;

/// 数据存储错误类型
///
/// 核心的所有操作都通过 `Result` 把错误返回给直接调用者，不做任何隐式重试。
#[derive(Error, Debug)]
pub enum DatastoreError {
    /// xpath 语法错误或不属于已安装的模式
    #[error("路径无效: {xpath}, 原因: {reason}")]
    InvalidPath {
        /// 出错的路径
        xpath: String,
        /// 原因
        reason: String,
    },

    /// 值无法构造，例如小数位数超出范围
    #[error("值无效: {value}, 原因: {reason}")]
    InvalidValue {
        /// 出错的值文本
        value: String,
        /// 原因
        reason: String,
    },

    /// 提交结果不满足模式
    #[error("模式验证失败: {module}, 原因: {message}")]
    SchemaError {
        /// 模块名称
        module: String,
        /// 验证信息
        message: String,
    },

    /// 会话代数落后于数据存储
    #[error("提交冲突: 期望代数 {expected}, 实际代数 {actual}")]
    CommitConflict {
        /// 会话观察到的代数
        expected: u64,
        /// 数据存储的当前代数
        actual: u64,
    },

    /// 验证阶段的订阅者拒绝了提交
    #[error("订阅者否决了变更: 模块 {module}, 订阅 {subscription_id}, 原因: {reason}")]
    CallbackVeto {
        /// 模块名称
        module: String,
        /// 否决的订阅
        subscription_id: u64,
        /// 回调给出的原因
        reason: String,
    },

    /// 当前状态下不允许该操作
    #[error("状态无效: {message}")]
    InvalidState {
        /// 说明
        message: String,
    },

    /// 迭代器在回调返回后继续使用
    #[error("变更迭代器已超出回调作用域: {scope}")]
    UseAfterScope {
        /// 已结束的作用域
        scope: String,
    },

    /// 存储后端失败
    #[error("存储后端失败: {message}")]
    Backend {
        /// 说明
        message: String,
    },

    /// 存储文件读写失败
    #[error("存储文件读写失败: {source}")]
    Io {
        /// 底层 I/O 错误
        #[from]
        source: std::io::Error,
    },

    /// 存储数据序列化失败
    #[error("存储数据序列化失败: {source}")]
    Serialization {
        /// 底层 serde_json 错误
        #[from]
        source: serde_json::Error,
    },

    /// 配置加载失败
    #[error("配置加载失败: {message}")]
    Config {
        /// 说明
        message: String,
    },
}

impl DatastoreError {
    /// 创建路径无效错误
    pub fn invalid_path(xpath: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            xpath: xpath.into(),
            reason: reason.into(),
        }
    }

    /// 创建值无效错误
    pub fn invalid_value(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// 创建模式验证错误
    pub fn schema_error(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaError {
            module: module.into(),
            message: message.into(),
        }
    }

    /// 创建状态无效错误
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// 创建存储后端错误
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// 是否为提交冲突，调用者可以据此决定刷新会话后重试
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::CommitConflict { .. })
    }
}

/// 结果类型别名
pub type DatastoreResult<T> = Result<T, DatastoreError>;
