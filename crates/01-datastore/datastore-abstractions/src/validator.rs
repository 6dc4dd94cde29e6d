//! 模式验证抽象接口

use datastore_common::{ConfigTree, DatastoreResult, XPath};

/// 模式验证器 trait
///
/// 外部模式协作者。暂存编辑时检查路径，提交时检查模块的完整新配置树。
pub trait SchemaValidator: Send + Sync {
    /// 检查模块是否已安装，失败返回 `InvalidPath`
    fn validate_module(&self, module: &str) -> DatastoreResult<()>;

    /// 检查路径是否属于已知模块，失败返回 `InvalidPath`
    fn validate_path(&self, xpath: &XPath) -> DatastoreResult<()> {
        self.validate_module(xpath.module())
    }

    /// 检查模块的配置树，失败返回 `SchemaError`
    fn validate(&self, module: &str, tree: &ConfigTree) -> DatastoreResult<()>;

    /// 获取验证器名称
    fn name(&self) -> &str;
}
