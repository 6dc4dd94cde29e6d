//! # Datastore Abstractions
//!
//! 数据存储抽象层，定义通知核心与外部协作者之间的接口。
//!
//! ## 核心接口
//!
//! - [`DatastoreBackend`] - 存储后端接口
//! - [`SchemaValidator`] - 模式验证接口
//! - [`ModuleChangeCallback`] - 模块变更回调接口
//! - [`EventSession`] - 回调期间的会话视图
//! - [`ChangeIterator`] - 回调作用域内的变更迭代器

pub mod backend;
pub mod events;
pub mod iterator;
pub mod validator;

pub use backend::*;
pub use events::*;
pub use iterator::*;
pub use validator::*;
