//! 存储后端抽象接口

use async_trait::async_trait;
use datastore_common::{ConfigTree, Datastore, DatastoreResult};
use std::collections::BTreeMap;

/// 某个模块在某一时刻的数据快照
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// 模块的配置树
    pub tree: ConfigTree,
    /// 读取时数据存储的代数
    pub generation: u64,
}

/// 一次原子写入的内容：模块名到新配置树
///
/// 一次提交可能修改多个模块，这些模块必须在同一次写入中生效。
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    modules: BTreeMap<String, ConfigTree>,
}

impl WriteBatch {
    /// 创建空批次
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置模块的新配置树，空树表示清空模块
    pub fn insert(&mut self, module: impl Into<String>, tree: ConfigTree) {
        self.modules.insert(module.into(), tree);
    }

    /// 模块名列表
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    /// 模块数量
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// 遍历批次内容
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigTree)> {
        self.modules.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl IntoIterator for WriteBatch {
    type Item = (String, ConfigTree);
    type IntoIter = std::collections::btree_map::IntoIter<String, ConfigTree>;

    fn into_iter(self) -> Self::IntoIter {
        self.modules.into_iter()
    }
}

/// 存储后端 trait
///
/// 外部存储协作者。每个数据存储维护一个单调递增的代数，每次成功写入加一；
/// 写入时代数与期望值不符必须返回 `CommitConflict`，由调用者决定是否重试。
#[async_trait]
pub trait DatastoreBackend: Send + Sync {
    /// 读取模块数据
    async fn read(&self, datastore: Datastore, module: &str) -> DatastoreResult<Snapshot>;

    /// 获取数据存储当前代数
    async fn generation(&self, datastore: Datastore) -> DatastoreResult<u64>;

    /// 原子写入一个批次，返回新代数
    async fn write(
        &self,
        datastore: Datastore,
        batch: WriteBatch,
        expected_generation: u64,
    ) -> DatastoreResult<u64>;

    /// 复制配置，`module` 为 `None` 时复制全部模块
    async fn copy_config(
        &self,
        module: Option<&str>,
        from: Datastore,
        to: Datastore,
    ) -> DatastoreResult<()>;

    /// 有数据的模块列表
    async fn modules(&self, datastore: Datastore) -> DatastoreResult<Vec<String>>;

    /// 获取后端名称
    fn name(&self) -> &str;

    /// 写入返回时数据是否已经持久化
    fn is_durable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastore_common::{Value, XPath};

    #[test]
    fn test_write_batch() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());

        let mut tree = ConfigTree::new();
        tree.insert(XPath::parse("/b:x").unwrap(), Value::Int32(1));
        batch.insert("b", tree);
        batch.insert("a", ConfigTree::new());

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.module_names(), vec!["a", "b"]);
        let sizes: Vec<usize> = batch.iter().map(|(_, t)| t.len()).collect();
        assert_eq!(sizes, vec![0, 1]);
    }
}
