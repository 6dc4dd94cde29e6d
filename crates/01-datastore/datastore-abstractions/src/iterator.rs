//! 变更迭代器

use datastore_common::{
    CallbackScope, ChangeEntry, ChangeSet, DatastoreError, DatastoreResult, XPathFilter,
};
use std::sync::Arc;

/// 变更迭代器
///
/// 只能向前移动的一次性游标，遍历不可变的变更集快照中与过滤器相交的变更。
/// 迭代器绑定到产生它的回调作用域，回调返回后再访问会得到 `UseAfterScope`。
#[derive(Debug)]
pub struct ChangeIterator {
    changes: Arc<ChangeSet>,
    filter: XPathFilter,
    position: usize,
    scope: CallbackScope,
    exhausted: bool,
}

impl ChangeIterator {
    /// 在变更集上创建迭代器
    pub fn new(changes: Arc<ChangeSet>, filter: XPathFilter, scope: CallbackScope) -> Self {
        Self {
            changes,
            filter,
            position: 0,
            scope,
            exhausted: false,
        }
    }

    /// 取下一个匹配的变更，`Ok(None)` 表示已经结束
    pub fn next_change(&mut self) -> DatastoreResult<Option<ChangeEntry>> {
        if !self.scope.is_active() {
            return Err(DatastoreError::UseAfterScope {
                scope: self.scope.describe(),
            });
        }

        let entries = self.changes.entries();
        while self.position < entries.len() {
            let entry = &entries[self.position];
            self.position += 1;
            if self.filter.matches(entry.xpath()) {
                return Ok(Some(entry.clone()));
            }
        }
        Ok(None)
    }

    /// 迭代器的过滤器
    pub fn filter(&self) -> &XPathFilter {
        &self.filter
    }

    /// 迭代器所属模块
    pub fn module(&self) -> &str {
        self.changes.module()
    }

    /// 迭代器是否仍在有效作用域内
    pub fn is_valid(&self) -> bool {
        self.scope.is_active()
    }
}

impl Iterator for ChangeIterator {
    type Item = DatastoreResult<ChangeEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.next_change() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.exhausted = true;
                None
            }
            Err(e) => {
                // 越界错误只报告一次
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastore_common::{ChangeOperation, ConfigTree, Datastore, Value, XPath};

    fn change_set() -> Arc<ChangeSet> {
        let next: ConfigTree = [
            ("/m:x[name='a']/number", 1),
            ("/m:x[name='b']/number", 2),
            ("/m:y", 3),
        ]
        .into_iter()
        .map(|(p, v)| (XPath::parse(p).unwrap(), Value::Int32(v)))
        .collect();
        Arc::new(ChangeSet::compute("m", Datastore::Running, 1, &ConfigTree::new(), &next))
    }

    #[test]
    fn test_iterates_matching_entries_in_order() {
        let guard = CallbackScope::enter("test");
        let mut iter = ChangeIterator::new(
            change_set(),
            XPathFilter::parse("/m:x[name='b']").unwrap(),
            guard.scope().clone(),
        );

        let entry = iter.next_change().unwrap().unwrap();
        assert_eq!(entry.xpath().to_string(), "/m:x[name='b']/number");
        assert_eq!(entry.oper(), ChangeOperation::Created);
        assert!(iter.next_change().unwrap().is_none());
        assert!(iter.next_change().unwrap().is_none());
    }

    #[test]
    fn test_module_filter_sees_everything() {
        let guard = CallbackScope::enter("test");
        let iter = ChangeIterator::new(change_set(), XPathFilter::module("m"), guard.scope().clone());
        let collected: Vec<ChangeEntry> = iter.map(Result::unwrap).collect();
        assert_eq!(collected.len(), 3);
    }

    #[test]
    fn test_use_after_scope() {
        let guard = CallbackScope::enter("test");
        let mut iter = ChangeIterator::new(change_set(), XPathFilter::module("m"), guard.scope().clone());
        assert!(iter.next_change().unwrap().is_some());
        drop(guard);

        assert!(!iter.is_valid());
        assert!(matches!(iter.next_change(), Err(DatastoreError::UseAfterScope { .. })));
        assert!(matches!(iter.next(), Some(Err(DatastoreError::UseAfterScope { .. }))));
        assert!(iter.next().is_none());
    }
}
