//! 变更集与树差异计算

use crate::configuration::Datastore;
use crate::value::Value;
use crate::xpath::{XPath, XPathFilter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 配置树：路径到值的有序映射，迭代顺序即文档顺序
pub type ConfigTree = BTreeMap<XPath, Value>;

/// 变更操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOperation {
    /// 节点创建
    Created,
    /// 节点值修改
    Modified,
    /// 节点删除
    Deleted,
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// 单个节点的变更
///
/// 删除只携带旧值，创建只携带新值，修改同时携带两者。
/// 字段私有，只能通过对应的构造函数创建。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    xpath: XPath,
    operation: ChangeOperation,
    old_value: Option<Value>,
    new_value: Option<Value>,
}

impl ChangeEntry {
    /// 创建节点创建变更
    pub fn created(xpath: XPath, value: Value) -> Self {
        Self {
            xpath,
            operation: ChangeOperation::Created,
            old_value: None,
            new_value: Some(value),
        }
    }

    /// 创建节点修改变更
    pub fn modified(xpath: XPath, old_value: Value, new_value: Value) -> Self {
        Self {
            xpath,
            operation: ChangeOperation::Modified,
            old_value: Some(old_value),
            new_value: Some(new_value),
        }
    }

    /// 创建节点删除变更
    pub fn deleted(xpath: XPath, old_value: Value) -> Self {
        Self {
            xpath,
            operation: ChangeOperation::Deleted,
            old_value: Some(old_value),
            new_value: None,
        }
    }

    /// 变更路径
    pub fn xpath(&self) -> &XPath {
        &self.xpath
    }

    /// 变更操作
    pub fn oper(&self) -> ChangeOperation {
        self.operation
    }

    /// 旧值
    pub fn old_val(&self) -> Option<&Value> {
        self.old_value.as_ref()
    }

    /// 新值
    pub fn new_val(&self) -> Option<&Value> {
        self.new_value.as_ref()
    }
}

impl fmt::Display for ChangeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.old_value, &self.new_value) {
            (Some(old), Some(new)) => write!(f, "{} {} ({old} -> {new})", self.operation, self.xpath),
            (None, Some(new)) => write!(f, "{} {} = {new}", self.operation, self.xpath),
            (Some(old), None) => write!(f, "{} {} (was {old})", self.operation, self.xpath),
            (None, None) => write!(f, "{} {}", self.operation, self.xpath),
        }
    }
}

/// 计算两棵配置树的差异
///
/// 结果按文档顺序排列，只取决于两棵树的内容，与编辑提交顺序无关。
pub fn diff_trees(previous: &ConfigTree, next: &ConfigTree) -> Vec<ChangeEntry> {
    let mut entries = Vec::new();
    let mut prev_iter = previous.iter().peekable();
    let mut next_iter = next.iter().peekable();

    // 两个有序映射的归并遍历
    loop {
        match (prev_iter.peek(), next_iter.peek()) {
            (Some((prev_path, prev_value)), Some((next_path, next_value))) => {
                match prev_path.cmp(next_path) {
                    std::cmp::Ordering::Less => {
                        entries.push(ChangeEntry::deleted((*prev_path).clone(), (*prev_value).clone()));
                        prev_iter.next();
                    }
                    std::cmp::Ordering::Greater => {
                        entries.push(ChangeEntry::created((*next_path).clone(), (*next_value).clone()));
                        next_iter.next();
                    }
                    std::cmp::Ordering::Equal => {
                        if prev_value != next_value {
                            entries.push(ChangeEntry::modified(
                                (*next_path).clone(),
                                (*prev_value).clone(),
                                (*next_value).clone(),
                            ));
                        }
                        prev_iter.next();
                        next_iter.next();
                    }
                }
            }
            (Some((path, value)), None) => {
                entries.push(ChangeEntry::deleted((*path).clone(), (*value).clone()));
                prev_iter.next();
            }
            (None, Some((path, value))) => {
                entries.push(ChangeEntry::created((*path).clone(), (*value).clone()));
                next_iter.next();
            }
            (None, None) => break,
        }
    }

    entries
}

/// 一次提交中单个模块的变更集
///
/// 每次提交为每个受影响的模块产生一个变更集，创建后不可变，
/// 以只读方式共享给该次提交调用的所有回调。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    module: String,
    datastore: Datastore,
    generation: u64,
    committed_at: chrono::DateTime<chrono::Utc>,
    entries: Vec<ChangeEntry>,
}

impl ChangeSet {
    /// 对比两棵树生成变更集
    pub fn compute(
        module: impl Into<String>,
        datastore: Datastore,
        generation: u64,
        previous: &ConfigTree,
        next: &ConfigTree,
    ) -> Self {
        Self {
            module: module.into(),
            datastore,
            generation,
            committed_at: chrono::Utc::now(),
            entries: diff_trees(previous, next),
        }
    }

    /// 所属模块
    pub fn module(&self) -> &str {
        &self.module
    }

    /// 目标数据存储
    pub fn datastore(&self) -> Datastore {
        self.datastore
    }

    /// 计算差异时存储的代数
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 变更集创建时间
    pub fn committed_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.committed_at
    }

    /// 全部变更，按文档顺序
    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    /// 变更数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否没有任何变更
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 是否有变更与过滤器相交
    pub fn intersects(&self, filter: &XPathFilter) -> bool {
        self.entries.iter().any(|entry| filter.matches(entry.xpath()))
    }

    /// 只保留与过滤器相交的变更，保持原有顺序
    pub fn filtered(&self, filter: &XPathFilter) -> Self {
        Self {
            module: self.module.clone(),
            datastore: self.datastore,
            generation: self.generation,
            committed_at: self.committed_at,
            entries: self
                .entries
                .iter()
                .filter(|entry| filter.matches(entry.xpath()))
                .cloned()
                .collect(),
        }
    }

    /// 把变更应用到旧树上，得到新树
    pub fn apply_to(&self, tree: &ConfigTree) -> ConfigTree {
        let mut result = tree.clone();
        for entry in &self.entries {
            match (entry.oper(), entry.new_val()) {
                (ChangeOperation::Deleted, _) => {
                    result.remove(entry.xpath());
                }
                (_, Some(value)) => {
                    result.insert(entry.xpath().clone(), value.clone());
                }
                (_, None) => {}
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Decimal64, MAX_FRACTION_DIGITS};
    use proptest::prelude::*;

    fn xp(s: &str) -> XPath {
        XPath::parse(s).unwrap()
    }

    fn tree(items: &[(&str, Value)]) -> ConfigTree {
        items.iter().map(|(p, v)| (xp(p), v.clone())).collect()
    }

    #[test]
    fn test_entry_invariants() {
        let created = ChangeEntry::created(xp("/m:a"), Value::Int32(1));
        assert_eq!(created.oper(), ChangeOperation::Created);
        assert!(created.old_val().is_none());
        assert_eq!(created.new_val(), Some(&Value::Int32(1)));

        let deleted = ChangeEntry::deleted(xp("/m:a"), Value::Int32(1));
        assert!(deleted.new_val().is_none());
        assert_eq!(deleted.old_val(), Some(&Value::Int32(1)));

        let modified = ChangeEntry::modified(xp("/m:a"), Value::Int32(1), Value::Int32(2));
        assert!(modified.old_val().is_some() && modified.new_val().is_some());
    }

    #[test]
    fn test_diff_created_modified_deleted() {
        let previous = tree(&[
            ("/m:x[name='a']/number", Value::Int32(10)),
            ("/m:x[name='b']/number", Value::Int32(11)),
        ]);
        let next = tree(&[
            ("/m:x[name='a']/number", Value::Int32(42)),
            ("/m:x[name='c']/number", Value::Int32(12)),
        ]);

        let entries = diff_trees(&previous, &next);
        assert_eq!(
            entries,
            vec![
                ChangeEntry::modified(xp("/m:x[name='a']/number"), Value::Int32(10), Value::Int32(42)),
                ChangeEntry::deleted(xp("/m:x[name='b']/number"), Value::Int32(11)),
                ChangeEntry::created(xp("/m:x[name='c']/number"), Value::Int32(12)),
            ]
        );
    }

    #[test]
    fn test_type_change_is_modification() {
        let previous = tree(&[("/m:a", Value::Int32(10))]);
        let next = tree(&[("/m:a", Value::Int64(10))]);
        let entries = diff_trees(&previous, &next);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].oper(), ChangeOperation::Modified);
    }

    #[test]
    fn test_decimal_diff_is_exact() {
        let d = |s: &str| Value::Decimal64(s.parse().unwrap());
        let current = tree(&[("/m:rate", d("0.10")), ("/m:limit", d("-3.5"))]);
        assert!(diff_trees(&current, &current.clone()).is_empty());

        // 数值相同但小数位数不同仍是修改
        let next = tree(&[("/m:rate", d("0.1")), ("/m:limit", d("-3.5"))]);
        let entries = diff_trees(&current, &next);
        assert_eq!(entries, vec![ChangeEntry::modified(xp("/m:rate"), d("0.10"), d("0.1"))]);
    }

    #[test]
    fn test_filtered_change_set() {
        let previous = ConfigTree::new();
        let next = tree(&[
            ("/m:x[name='a']/number", Value::Int32(1)),
            ("/m:x[name='b']/number", Value::Int32(2)),
        ]);
        let set = ChangeSet::compute("m", Datastore::Running, 1, &previous, &next);
        let filter = XPathFilter::parse("/m:x[name='b']").unwrap();

        assert!(set.intersects(&filter));
        let filtered = set.filtered(&filter);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.entries()[0].xpath(), &xp("/m:x[name='b']/number"));
        assert_eq!(filtered.module(), "m");
        assert!(!set.intersects(&XPathFilter::parse("/m:y").unwrap()));
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i32>().prop_map(Value::Int32),
            any::<i64>().prop_map(Value::Int64),
            any::<bool>().prop_map(Value::Bool),
            (any::<i64>(), 0..=MAX_FRACTION_DIGITS)
                .prop_map(|(digits, fd)| Value::Decimal64(Decimal64::new(digits, fd).unwrap())),
            "[a-z]{0,6}".prop_map(Value::String),
            Just(Value::Container),
        ]
    }

    fn path_strategy() -> impl Strategy<Value = XPath> {
        ("[ab]", "[a-c]{1,2}", prop::option::of("[xy]")).prop_map(|(module, key, leaf)| {
            let mut path = format!("/{module}:list[name='{key}']");
            if let Some(leaf) = leaf {
                path.push('/');
                path.push_str(&leaf);
            }
            XPath::parse(&path).unwrap()
        })
    }

    fn tree_strategy() -> impl Strategy<Value = ConfigTree> {
        prop::collection::btree_map(path_strategy(), value_strategy(), 0..12)
    }

    proptest! {
        #[test]
        fn prop_diff_round_trip(previous in tree_strategy(), next in tree_strategy()) {
            let set = ChangeSet::compute("m", Datastore::Running, 0, &previous, &next);
            prop_assert_eq!(set.apply_to(&previous), next);
        }

        #[test]
        fn prop_diff_of_identical_trees_is_empty(current in tree_strategy()) {
            prop_assert!(diff_trees(&current, &current).is_empty());
        }

        #[test]
        fn prop_entries_are_strictly_ordered(previous in tree_strategy(), next in tree_strategy()) {
            let entries = diff_trees(&previous, &next);
            for pair in entries.windows(2) {
                prop_assert!(pair[0].xpath() < pair[1].xpath());
            }
        }
    }
}
