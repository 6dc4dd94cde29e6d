//! 回调作用域令牌
//!
//! 变更迭代器只在产生它的那一次回调调用期间有效。每次回调调用创建一个
//! [`CallbackScope`]，由 [`ScopeGuard`] 持有；回调返回时守卫被丢弃，令牌随之失效，
//! 之后任何持有该令牌的对象都能检测到越界使用。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 回调作用域
#[derive(Debug, Clone)]
pub struct CallbackScope {
    /// 作用域标识
    pub id: uuid::Uuid,
    /// 作用域名称，通常是 `模块:订阅:事件`
    pub name: String,
    /// 进入作用域的时间
    pub created_at: chrono::DateTime<chrono::Utc>,
    active: Arc<AtomicBool>,
}

impl CallbackScope {
    /// 创建新作用域并返回守卫，作用域在守卫存活期间有效
    pub fn enter(name: impl Into<String>) -> ScopeGuard {
        let scope = Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            created_at: chrono::Utc::now(),
            active: Arc::new(AtomicBool::new(true)),
        };
        tracing::trace!("进入回调作用域: {} ({})", scope.name, scope.id);
        ScopeGuard { scope }
    }

    /// 作用域是否仍然有效
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 作用域的描述，用于错误信息
    pub fn describe(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }
}

/// 作用域守卫，丢弃时使作用域失效
#[derive(Debug)]
pub struct ScopeGuard {
    scope: CallbackScope,
}

impl ScopeGuard {
    /// 获取作用域
    pub fn scope(&self) -> &CallbackScope {
        &self.scope
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.scope.active.store(false, Ordering::Release);
        tracing::trace!("退出回调作用域: {}", self.scope.describe());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_invalidated_when_guard_dropped() {
        let guard = CallbackScope::enter("m/apply");
        let token = guard.scope().clone();
        assert!(token.is_active());
        assert_eq!(token.name, "m/apply");

        drop(guard);
        assert!(!token.is_active());
    }

    #[test]
    fn test_scopes_are_independent() {
        let first = CallbackScope::enter("first");
        let second = CallbackScope::enter("second");
        let first_token = first.scope().clone();
        assert_ne!(first_token.id, second.scope().id);

        drop(first);
        assert!(!first_token.is_active());
        assert!(second.scope().is_active());
    }
}
