//! 订阅注册表实现

use crate::session::Session;
use datastore_abstractions::{
    CallbackStatus, ModuleChangeCallback, NotifEvent, SubscriptionFlags, SubscriptionId,
};
use datastore_common::{ChangeSet, DatastoreError, DatastoreResult, XPathFilter};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 已注册的订阅
pub struct Subscription {
    id: SubscriptionId,
    module: String,
    filter: Option<XPathFilter>,
    callback: Arc<dyn ModuleChangeCallback>,
    flags: SubscriptionFlags,
    priority: i32,
}

impl Subscription {
    /// 订阅是否关心该事件下的变更集
    fn matches(&self, event: NotifEvent, changes: &ChangeSet) -> bool {
        self.module == changes.module()
            && self.flags.accepts(event)
            && self
                .filter
                .as_ref()
                .map_or(true, |filter| changes.intersects(filter))
    }

    /// 回调看到的变更集视图：有过滤器时只保留相交的条目
    fn view(&self, changes: &Arc<ChangeSet>) -> Arc<ChangeSet> {
        match &self.filter {
            Some(filter) => Arc::new(changes.filtered(filter)),
            None => Arc::clone(changes),
        }
    }

    fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            module: self.module.clone(),
            filter: self.filter.as_ref().map(ToString::to_string),
            callback: self.callback.name().to_string(),
            flags: self.flags,
            priority: self.priority,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("filter", &self.filter)
            .field("callback", &self.callback.name())
            .field("flags", &self.flags)
            .field("priority", &self.priority)
            .finish()
    }
}

/// 订阅的只读描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// 订阅标识
    pub id: SubscriptionId,
    /// 订阅的模块
    pub module: String,
    /// 过滤器文本
    pub filter: Option<String>,
    /// 回调名称
    pub callback: String,
    /// 订阅标志
    pub flags: SubscriptionFlags,
    /// 优先级，越大越先通知
    pub priority: i32,
}

/// 订阅注册表
///
/// 由连接持有并显式注入到会话，不使用全局状态。构造时为空，`clear()` 或析构时清空。
/// 通知时先在锁内取出匹配订阅的快照，释放锁后再逐个同步调用回调。
pub struct SubscriptionRegistry {
    subscriptions: RwLock<BTreeMap<SubscriptionId, Arc<Subscription>>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 注册订阅
    ///
    /// `xpath` 为可选的过滤器，必须属于 `module`。
    pub fn subscribe(
        &self,
        module: &str,
        xpath: Option<&str>,
        callback: Arc<dyn ModuleChangeCallback>,
        flags: SubscriptionFlags,
        priority: i32,
    ) -> DatastoreResult<SubscriptionId> {
        if module.is_empty() {
            return Err(DatastoreError::invalid_path("", "模块名不能为空"));
        }

        let filter = xpath.map(XPathFilter::parse).transpose()?;
        if let Some(filter) = &filter {
            if filter.module_name() != module {
                return Err(DatastoreError::invalid_path(
                    filter.to_string(),
                    format!("过滤器不属于模块 '{}'", module),
                ));
            }
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Subscription {
            id,
            module: module.to_string(),
            filter,
            callback,
            flags,
            priority,
        };
        info!(
            "注册模块变更订阅: {} -> {} (回调: {}, 优先级: {})",
            id,
            module,
            subscription.callback.name(),
            priority
        );

        self.subscriptions.write().insert(id, Arc::new(subscription));
        Ok(id)
    }

    /// 移除订阅，重复移除不是错误，返回是否确实移除了订阅
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.write().remove(&id);
        match removed {
            Some(subscription) => {
                info!("移除模块变更订阅: {} -> {}", id, subscription.module);
                true
            }
            None => {
                debug!("订阅已不存在: {}", id);
                false
            }
        }
    }

    /// 按投递顺序取出匹配的订阅：优先级高的在前，同优先级按注册顺序
    pub fn matching(&self, event: NotifEvent, changes: &ChangeSet) -> Vec<Arc<Subscription>> {
        let mut targets: Vec<Arc<Subscription>> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| s.matches(event, changes))
            .cloned()
            .collect();
        // 稳定排序保持 id 顺序
        targets.sort_by(|a, b| b.priority.cmp(&a.priority));
        targets
    }

    /// 向匹配的订阅投递事件
    ///
    /// `Verify` 阶段第一个失败的回调会终止投递并返回 `CallbackVeto`，
    /// 已经通知过的订阅不会回滚。`Apply` 阶段的失败只记录日志。
    pub fn notify(
        &self,
        session: &Session,
        event: NotifEvent,
        changes: &Arc<ChangeSet>,
    ) -> DatastoreResult<()> {
        let targets = self.matching(event, changes);
        if targets.is_empty() {
            debug!("没有订阅者: {} ({})", changes.module(), event);
            return Ok(());
        }

        debug!(
            "投递 {} 事件: {} 个变更 -> {} 个订阅",
            event,
            changes.len(),
            targets.len()
        );

        for subscription in targets {
            let scope_name = format!("{}:{}:{}", subscription.module, subscription.id, event);
            let status = {
                let _context = session.enter_callback_scope(scope_name, subscription.view(changes));
                subscription
                    .callback
                    .module_change(session, &subscription.module, event)
            };

            match (status, event) {
                (CallbackStatus::Ok, _) => {
                    debug!("回调完成: {} ({})", subscription.id, subscription.callback.name());
                }
                (CallbackStatus::Failed(reason), NotifEvent::Verify) => {
                    warn!(
                        "订阅否决提交: {} -> {} - {}",
                        subscription.id, subscription.module, reason
                    );
                    return Err(DatastoreError::CallbackVeto {
                        module: subscription.module.clone(),
                        subscription_id: subscription.id.0,
                        reason,
                    });
                }
                (CallbackStatus::Failed(reason), NotifEvent::Apply) => {
                    warn!(
                        "应用通知回调失败，已忽略: {} -> {} - {}",
                        subscription.id, subscription.module, reason
                    );
                }
            }
        }

        Ok(())
    }

    /// 订阅数量
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// 是否没有订阅
    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// 某个模块的订阅，按注册顺序
    pub fn subscriptions_for(&self, module: &str) -> Vec<SubscriptionInfo> {
        self.subscriptions
            .read()
            .values()
            .filter(|s| s.module == module)
            .map(|s| s.info())
            .collect()
    }

    /// 清空全部订阅
    pub fn clear(&self) {
        let mut subscriptions = self.subscriptions.write();
        if !subscriptions.is_empty() {
            info!("清空订阅注册表: {} 个订阅", subscriptions.len());
            subscriptions.clear();
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastore_abstractions::EventSession;
    use datastore_common::{ConfigTree, Datastore, Value, XPath};

    fn nop() -> Arc<dyn ModuleChangeCallback> {
        Arc::new(|_: &dyn EventSession, _: &str, _: NotifEvent| CallbackStatus::Ok)
    }

    fn change_set(module: &str, paths: &[&str]) -> ChangeSet {
        let next: ConfigTree = paths
            .iter()
            .map(|p| (XPath::parse(p).unwrap(), Value::Int32(1)))
            .collect();
        ChangeSet::compute(module, Datastore::Running, 0, &ConfigTree::new(), &next)
    }

    #[test]
    fn test_ids_are_monotonic() {
        let registry = SubscriptionRegistry::new();
        let a = registry.subscribe("m", None, nop(), SubscriptionFlags::DEFAULT, 0).unwrap();
        let b = registry.subscribe("m", None, nop(), SubscriptionFlags::DEFAULT, 0).unwrap();
        assert!(a < b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let id = registry.subscribe("m", None, nop(), SubscriptionFlags::DEFAULT, 0).unwrap();
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_filter_must_belong_to_module() {
        let registry = SubscriptionRegistry::new();
        let result = registry.subscribe("m", Some("/n:a"), nop(), SubscriptionFlags::DEFAULT, 0);
        assert!(matches!(result, Err(DatastoreError::InvalidPath { .. })));
        assert!(registry
            .subscribe("m", Some("/m:a/*"), nop(), SubscriptionFlags::DEFAULT, 0)
            .is_ok());
        assert!(registry.subscribe("", None, nop(), SubscriptionFlags::DEFAULT, 0).is_err());
    }

    #[test]
    fn test_matching_order_and_filters() {
        let registry = SubscriptionRegistry::new();
        let low = registry.subscribe("m", None, nop(), SubscriptionFlags::DEFAULT, 0).unwrap();
        let other = registry.subscribe("n", None, nop(), SubscriptionFlags::DEFAULT, 0).unwrap();
        let high = registry.subscribe("m", None, nop(), SubscriptionFlags::DEFAULT, 10).unwrap();
        let filtered = registry
            .subscribe("m", Some("/m:b"), nop(), SubscriptionFlags::DEFAULT, 0)
            .unwrap();
        let apply_only = registry
            .subscribe("m", None, nop(), SubscriptionFlags::APPLY_ONLY, 0)
            .unwrap();

        let changes = change_set("m", &["/m:a"]);
        let verify: Vec<SubscriptionId> = registry
            .matching(NotifEvent::Verify, &changes)
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(verify, vec![high, low]);

        let apply: Vec<SubscriptionId> = registry
            .matching(NotifEvent::Apply, &changes)
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(apply, vec![high, low, apply_only]);

        let changes = change_set("m", &["/m:b/c"]);
        assert!(registry
            .matching(NotifEvent::Apply, &changes)
            .iter()
            .any(|s| s.id == filtered));
        assert!(!registry
            .matching(NotifEvent::Apply, &changes)
            .iter()
            .any(|s| s.id == other));
    }

    #[test]
    fn test_subscriptions_for_and_clear() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe("m", Some("/m:*"), nop(), SubscriptionFlags::DEFAULT, 3).unwrap();
        registry.subscribe("n", None, nop(), SubscriptionFlags::DEFAULT, 0).unwrap();

        let infos = registry.subscriptions_for("m");
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].filter.as_deref(), Some("/m:*"));
        assert_eq!(infos[0].priority, 3);
        assert_eq!(infos[0].callback, "closure");

        registry.clear();
        assert!(registry.is_empty());
    }
}
