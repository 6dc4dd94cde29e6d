//! # Datastore Common
//!
//! 这个 crate 提供了 Cfgstore 配置数据存储的公共类型。
//!
//! ## 核心组件
//!
//! - [`Value`] - 带类型标签的配置数据值
//! - [`XPath`] / [`XPathFilter`] - 数据节点路径与过滤器
//! - [`ChangeEntry`] / [`ChangeSet`] - 按文档顺序排列的变更集
//! - [`CallbackScope`] - 回调作用域令牌
//! - [`DatastoreError`] - 统一错误类型
//!
//! ## 设计原则
//!
//! - 配置树是路径到值的有序映射，迭代顺序即文档顺序
//! - 差异计算结果只取决于树的内容
//! - 所有错误通过 `Result` 返回给直接调用者

pub mod change;
pub mod configuration;
pub mod errors;
pub mod scope;
pub mod value;
pub mod xpath;

pub use change::*;
pub use configuration::*;
pub use errors::*;
pub use scope::*;
pub use value::*;
pub use xpath::*;
