//! # Datastore Implementation
//!
//! 数据存储通知核心的具体实现：会话、提交流程、订阅注册表和存储后端。
//!
//! ## 主要组件
//!
//! - [`Connection`] - 数据存储连接，持有后端、验证器和订阅注册表
//! - [`Session`] - 会话，暂存编辑并提交
//! - [`Subscribe`] - 订阅上下文
//! - [`SubscriptionRegistry`] - 订阅注册表
//! - [`InMemoryBackend`] / [`JsonFileBackend`] - 存储后端
//! - [`RuleSchemaValidator`] - 基于规则的模式验证器
//! - [`SettingsLoader`] - 全局配置加载

pub mod backends;
pub mod connection;
pub mod listeners;
pub mod registry;
pub mod session;
pub mod settings;
pub mod subscribe;
pub mod validation;

pub use backends::*;
pub use connection::*;
pub use listeners::*;
pub use registry::*;
pub use session::*;
pub use settings::*;
pub use subscribe::*;
pub use validation::*;

#[cfg(test)]
mod tests;
