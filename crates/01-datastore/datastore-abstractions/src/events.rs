//! 模块变更事件与回调定义

use crate::iterator::ChangeIterator;
use datastore_common::{ChangeEntry, Datastore, DatastoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 通知事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotifEvent {
    /// 提交前验证，订阅者可以否决
    Verify,
    /// 变更已持久化，只能观察
    Apply,
}

impl fmt::Display for NotifEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verify => f.write_str("verify"),
            Self::Apply => f.write_str("apply"),
        }
    }
}

/// 回调返回状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackStatus {
    /// 成功
    Ok,
    /// 失败，在 [`NotifEvent::Verify`] 阶段会否决提交
    Failed(String),
}

impl CallbackStatus {
    /// 创建失败状态
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// 是否成功
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

bitflags::bitflags! {
    /// 订阅标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SubscriptionFlags: u32 {
        /// 默认：接收提交前验证（可否决）和应用通知
        const DEFAULT = 0;
        /// 只接收应用通知，不能否决
        const APPLY_ONLY = 1;
    }
}

impl Default for SubscriptionFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl SubscriptionFlags {
    /// 订阅是否接收某个事件
    pub fn accepts(self, event: NotifEvent) -> bool {
        match event {
            NotifEvent::Verify => !self.contains(Self::APPLY_ONLY),
            NotifEvent::Apply => true,
        }
    }
}

/// 订阅标识，在所属注册表内单调递增且唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// 回调期间可见的会话视图
///
/// 只提供变更迭代和只读信息；回调作用域内会话的修改操作全部被拒绝。
pub trait EventSession: Send + Sync {
    /// 会话标识
    fn session_id(&self) -> uuid::Uuid;

    /// 会话的数据存储
    fn datastore(&self) -> Datastore;

    /// 获取当前回调变更集上的迭代器，只在回调作用域内有效
    fn get_changes_iter(&self, xpath_filter: &str) -> DatastoreResult<ChangeIterator>;

    /// 取下一个变更
    fn get_change_next(&self, iter: &mut ChangeIterator) -> DatastoreResult<Option<ChangeEntry>> {
        iter.next_change()
    }
}

/// 模块变更回调 trait
///
/// 回调在提交任务上同步执行，执行期间提交被阻塞。
/// 用户上下文由实现者自己持有（闭包捕获或结构体字段）。
pub trait ModuleChangeCallback: Send + Sync {
    /// 处理模块变更事件
    fn module_change(
        &self,
        session: &dyn EventSession,
        module_name: &str,
        event: NotifEvent,
    ) -> CallbackStatus;

    /// 获取回调名称
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> ModuleChangeCallback for F
where
    F: Fn(&dyn EventSession, &str, NotifEvent) -> CallbackStatus + Send + Sync,
{
    fn module_change(
        &self,
        session: &dyn EventSession,
        module_name: &str,
        event: NotifEvent,
    ) -> CallbackStatus {
        self(session, module_name, event)
    }

    fn name(&self) -> &str {
        "closure"
    }
}
