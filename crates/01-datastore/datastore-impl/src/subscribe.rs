//! 订阅上下文

use crate::session::Session;
use datastore_abstractions::{ModuleChangeCallback, SubscriptionFlags, SubscriptionId};
use datastore_common::DatastoreResult;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// 绑定到会话的订阅上下文
///
/// 持有自己创建的订阅，`unsubscribe()` 或析构时全部移除。
#[derive(Debug)]
pub struct Subscribe {
    session: Arc<Session>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl Subscribe {
    /// 创建订阅上下文
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// 订阅模块变更
    ///
    /// `xpath` 为可选过滤器，只有与过滤器相交的变更会触发回调；
    /// `priority` 越大越先收到通知。
    pub fn module_change_subscribe(
        &self,
        module_name: &str,
        callback: Arc<dyn ModuleChangeCallback>,
        xpath: Option<&str>,
        priority: i32,
        flags: SubscriptionFlags,
    ) -> DatastoreResult<SubscriptionId> {
        self.session.validator().validate_module(module_name)?;
        let id = self
            .session
            .registry()
            .subscribe(module_name, xpath, callback, flags, priority)?;
        self.subscriptions.lock().push(id);
        Ok(id)
    }

    /// 本上下文持有的订阅
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.lock().clone()
    }

    /// 绑定的会话
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// 移除本上下文创建的全部订阅，可以重复调用
    pub fn unsubscribe(&self) {
        let ids = std::mem::take(&mut *self.subscriptions.lock());
        if ids.is_empty() {
            return;
        }
        debug!("订阅上下文移除 {} 个订阅", ids.len());
        for id in ids {
            self.session.registry().unsubscribe(id);
        }
    }
}

impl Drop for Subscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
