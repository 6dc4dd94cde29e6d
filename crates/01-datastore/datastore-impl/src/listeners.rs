//! 常用的模块变更回调

use datastore_abstractions::{CallbackStatus, EventSession, ModuleChangeCallback, NotifEvent};
use datastore_common::{ChangeEntry, ChangeOperation};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// 遍历回调作用域内模块的全部变更
fn visit_changes(
    session: &dyn EventSession,
    module_name: &str,
    mut visit: impl FnMut(ChangeEntry),
) -> Result<(), String> {
    let mut iter = session
        .get_changes_iter(&format!("/{}:*", module_name))
        .map_err(|e| e.to_string())?;
    while let Some(change) = session.get_change_next(&mut iter).map_err(|e| e.to_string())? {
        visit(change);
    }
    Ok(())
}

/// 日志记录回调
///
/// 将收到的每个变更记录到日志中
#[derive(Debug, Default)]
pub struct LoggingChangeCallback;

impl LoggingChangeCallback {
    /// 创建日志回调
    pub fn new() -> Self {
        Self
    }
}

impl ModuleChangeCallback for LoggingChangeCallback {
    fn module_change(
        &self,
        session: &dyn EventSession,
        module_name: &str,
        event: NotifEvent,
    ) -> CallbackStatus {
        let result = visit_changes(session, module_name, |change| match change.oper() {
            ChangeOperation::Created | ChangeOperation::Modified => {
                info!("[{}] {} {}", event, module_name, change);
            }
            ChangeOperation::Deleted => {
                warn!("[{}] {} {}", event, module_name, change);
            }
        });

        match result {
            Ok(()) => CallbackStatus::Ok,
            Err(reason) => CallbackStatus::Failed(reason),
        }
    }

    fn name(&self) -> &str {
        "LoggingChangeCallback"
    }
}

/// 收到的一条变更记录
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedChange {
    /// 事件类型
    pub event: NotifEvent,
    /// 模块名称
    pub module: String,
    /// 变更条目
    pub change: ChangeEntry,
}

/// 变更记录回调
///
/// 记录每次调用收到的变更，供测试和演示程序检查
#[derive(Debug, Default)]
pub struct ChangeRecorder {
    records: Mutex<Vec<RecordedChange>>,
    invocations: AtomicU64,
}

impl ChangeRecorder {
    /// 创建空的记录器
    pub fn new() -> Self {
        Self::default()
    }

    /// 回调被调用的次数
    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// 全部记录
    pub fn records(&self) -> Vec<RecordedChange> {
        self.records.lock().clone()
    }

    /// 某个事件下收到的变更
    pub fn changes(&self, event: NotifEvent) -> Vec<ChangeEntry> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.event == event)
            .map(|r| r.change.clone())
            .collect()
    }

    /// 清空记录和计数
    pub fn clear(&self) {
        self.records.lock().clear();
        self.invocations.store(0, Ordering::Relaxed);
    }
}

impl ModuleChangeCallback for ChangeRecorder {
    fn module_change(
        &self,
        session: &dyn EventSession,
        module_name: &str,
        event: NotifEvent,
    ) -> CallbackStatus {
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let mut received = Vec::new();
        if let Err(reason) = visit_changes(session, module_name, |change| received.push(change)) {
            return CallbackStatus::Failed(reason);
        }
        debug!("记录 {} 个变更: {} ({})", received.len(), module_name, event);

        self.records
            .lock()
            .extend(received.into_iter().map(|change| RecordedChange {
                event,
                module: module_name.to_string(),
                change,
            }));
        CallbackStatus::Ok
    }

    fn name(&self) -> &str {
        "ChangeRecorder"
    }
}

/// 操作类型检查回调
///
/// 要求收到的每个变更都是指定的操作类型，不符时计数并返回失败。
#[derive(Debug)]
pub struct OperationCheck {
    expected: ChangeOperation,
    checked: AtomicU64,
    violations: AtomicU64,
}

impl OperationCheck {
    /// 创建检查回调，`expected` 为期望的操作类型
    pub fn new(expected: ChangeOperation) -> Self {
        Self {
            expected,
            checked: AtomicU64::new(0),
            violations: AtomicU64::new(0),
        }
    }

    /// 期望的操作类型
    pub fn expected(&self) -> ChangeOperation {
        self.expected
    }

    /// 检查过的变更数量
    pub fn checked_count(&self) -> u64 {
        self.checked.load(Ordering::Relaxed)
    }

    /// 不符合期望的变更数量
    pub fn violation_count(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }
}

impl ModuleChangeCallback for OperationCheck {
    fn module_change(
        &self,
        session: &dyn EventSession,
        module_name: &str,
        _event: NotifEvent,
    ) -> CallbackStatus {
        let mut mismatched = Vec::new();
        let result = visit_changes(session, module_name, |change| {
            self.checked.fetch_add(1, Ordering::Relaxed);
            if change.oper() != self.expected {
                self.violations.fetch_add(1, Ordering::Relaxed);
                mismatched.push(change.to_string());
            }
        });

        if let Err(reason) = result {
            return CallbackStatus::Failed(reason);
        }
        if mismatched.is_empty() {
            CallbackStatus::Ok
        } else {
            CallbackStatus::Failed(format!(
                "期望 {} 操作, 实际: {}",
                self.expected,
                mismatched.join("; ")
            ))
        }
    }

    fn name(&self) -> &str {
        "OperationCheck"
    }
}
