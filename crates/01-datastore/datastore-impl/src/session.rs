//! 数据存储会话实现

use crate::registry::SubscriptionRegistry;
use datastore_abstractions::{
    ChangeIterator, DatastoreBackend, EventSession, NotifEvent, SchemaValidator, WriteBatch,
};
use datastore_common::{
    CallbackScope, ChangeSet, ConfigTree, Datastore, DatastoreError, DatastoreResult, PathSegment,
    ScopeGuard, SessionOptions, Value, WildcardDeletePolicy, XPath, XPathFilter,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 暂存的编辑
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    /// 设置节点值，缺失的祖先节点隐式创建
    Set {
        /// 目标节点
        xpath: XPath,
        /// 新值
        value: Value,
    },
    /// 删除过滤器覆盖的节点
    Delete {
        /// 删除范围
        filter: XPathFilter,
    },
}

impl Edit {
    /// 编辑所属模块
    pub fn module(&self) -> &str {
        match self {
            Self::Set { xpath, .. } => xpath.module(),
            Self::Delete { filter } => filter.module_name(),
        }
    }

    /// 编辑目标
    pub fn target(&self) -> String {
        match self {
            Self::Set { xpath, .. } => xpath.to_string(),
            Self::Delete { filter } => filter.to_string(),
        }
    }

    /// 本编辑是否让更早的 `other` 失去作用
    ///
    /// 只有同类且同目标的编辑互相覆盖。设置不覆盖同一节点上更早的删除，
    /// 删除会移除整个子树，之后的设置只重建该节点。
    pub fn supersedes(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Set { xpath: a, .. }, Self::Set { xpath: b, .. }) => a == b,
            (Self::Delete { filter: a }, Self::Delete { filter: b }) => a == b,
            _ => false,
        }
    }

    /// 把编辑应用到配置树
    pub fn apply(&self, tree: &mut ConfigTree, policy: WildcardDeletePolicy) {
        match self {
            Self::Set { xpath, value } => insert_with_ancestors(tree, xpath, value.clone()),
            Self::Delete {
                filter: XPathFilter::Module(module),
            } => match policy {
                WildcardDeletePolicy::Recursive => tree.retain(|path, _| path.module() != module),
                WildcardDeletePolicy::TopLevelOnly => {
                    tree.retain(|path, _| path.module() != module || !path.is_top_level());
                }
            },
            Self::Delete { filter } => tree.retain(|path, _| !filter.covers(path)),
        }
    }
}

impl fmt::Display for Edit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set { xpath, value } => write!(f, "set {} = {}", xpath, value),
            Self::Delete { filter } => write!(f, "delete {}", filter),
        }
    }
}

/// 插入节点，补齐缺失的容器和列表条目（连同列表键叶子）
fn insert_with_ancestors(tree: &mut ConfigTree, xpath: &XPath, value: Value) {
    let segments = xpath.segments();
    for depth in 1..segments.len() {
        let ancestor = match XPath::from_segments(segments[..depth].to_vec()) {
            Ok(path) => path,
            Err(_) => continue,
        };
        if tree.contains_key(&ancestor) {
            continue;
        }
        let segment = &segments[depth - 1];
        if segment.keys.is_empty() {
            tree.insert(ancestor, Value::Container);
        } else {
            insert_list_keys(tree, &ancestor, segment);
            tree.insert(ancestor, Value::List);
        }
    }

    if let Some(segment) = segments.last() {
        insert_list_keys(tree, xpath, segment);
    }
    tree.insert(xpath.clone(), value);
}

fn insert_list_keys(tree: &mut ConfigTree, entry: &XPath, segment: &PathSegment) {
    for (key, key_value) in &segment.keys {
        let key_path = entry.child(PathSegment::new(key.clone()));
        tree.entry(key_path)
            .or_insert_with(|| Value::String(key_value.clone()));
    }
}

#[derive(Debug, Clone)]
struct PendingEdit {
    seq: u64,
    edit: Edit,
}

#[derive(Debug)]
struct SessionState {
    edits: Vec<PendingEdit>,
    next_seq: u64,
    generation: u64,
    closed: bool,
}

/// 回调期间的上下文：作用域令牌和当前变更集
#[derive(Debug, Clone)]
struct CallbackContext {
    scope: CallbackScope,
    changes: Arc<ChangeSet>,
}

/// 回调上下文守卫，析构时清除会话的回调上下文并使作用域失效
pub(crate) struct CallbackContextGuard<'a> {
    slot: &'a Mutex<Option<CallbackContext>>,
    _scope: ScopeGuard,
}

impl Drop for CallbackContextGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

/// 提交结果
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// 提交后会话观察到的代数
    pub generation: u64,
    /// 每个发生变化的模块一个变更集
    pub change_sets: Vec<Arc<ChangeSet>>,
}

impl CommitOutcome {
    /// 是否没有任何变化
    pub fn is_empty(&self) -> bool {
        self.change_sets.is_empty()
    }

    /// 某个模块的变更集
    pub fn changes_for(&self, module: &str) -> Option<&Arc<ChangeSet>> {
        self.change_sets.iter().find(|c| c.module() == module)
    }
}

/// 数据存储会话
///
/// 持有一个数据存储上的暂存编辑。同一会话上的提交由异步互斥锁串行化；
/// 会话的方法都只需要 `&self`，回调期间可以通过 [`EventSession`] 访问会话。
pub struct Session {
    id: Uuid,
    datastore: Datastore,
    options: SessionOptions,
    backend: Arc<dyn DatastoreBackend>,
    validator: Arc<dyn SchemaValidator>,
    registry: Arc<SubscriptionRegistry>,
    state: Mutex<SessionState>,
    commit_lock: tokio::sync::Mutex<()>,
    callback: Mutex<Option<CallbackContext>>,
}

impl Session {
    /// 打开会话并记录数据存储的当前代数
    pub async fn open(
        datastore: Datastore,
        options: SessionOptions,
        backend: Arc<dyn DatastoreBackend>,
        validator: Arc<dyn SchemaValidator>,
        registry: Arc<SubscriptionRegistry>,
    ) -> DatastoreResult<Self> {
        let generation = backend.generation(datastore).await?;
        let id = Uuid::new_v4();
        info!(
            "打开会话: {} (数据存储: {}, 代数: {}, 后端: {})",
            id,
            datastore,
            generation,
            backend.name()
        );

        Ok(Self {
            id,
            datastore,
            options,
            backend,
            validator,
            registry,
            state: Mutex::new(SessionState {
                edits: Vec::new(),
                next_seq: 0,
                generation,
                closed: false,
            }),
            commit_lock: tokio::sync::Mutex::new(()),
            callback: Mutex::new(None),
        })
    }

    /// 会话标识
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 会话的数据存储
    pub fn datastore(&self) -> Datastore {
        self.datastore
    }

    /// 会话选项
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// 会话使用的订阅注册表
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// 会话使用的模式验证器
    pub fn validator(&self) -> &Arc<dyn SchemaValidator> {
        &self.validator
    }

    /// 会话观察到的代数
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// 暂存的编辑，按暂存顺序
    pub fn pending_edits(&self) -> Vec<Edit> {
        self.state.lock().edits.iter().map(|p| p.edit.clone()).collect()
    }

    /// 是否有暂存的编辑
    pub fn has_pending_edits(&self) -> bool {
        !self.state.lock().edits.is_empty()
    }

    /// 会话是否已关闭
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// 当前是否处于变更回调内
    pub fn in_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// 暂存设置操作
    pub fn set_item(&self, xpath: &str, value: Value) -> DatastoreResult<()> {
        self.ensure_mutable("set_item")?;
        let xpath = XPath::parse(xpath)?;
        self.validator.validate_path(&xpath)?;
        self.stage(Edit::Set { xpath, value })
    }

    /// 暂存删除操作，`/module:*` 在提交时按通配删除策略解析
    pub fn delete_item(&self, xpath: &str) -> DatastoreResult<()> {
        self.ensure_mutable("delete_item")?;
        let filter = XPathFilter::parse(xpath)?;
        self.validator.validate_module(filter.module_name())?;
        self.stage(Edit::Delete { filter })
    }

    fn stage(&self, edit: Edit) -> DatastoreResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DatastoreError::invalid_state("会话已关闭"));
        }

        state.edits.retain(|p| !edit.supersedes(&p.edit));
        let seq = state.next_seq;
        state.next_seq += 1;
        debug!("会话 {} 暂存编辑: {}", self.id, edit);
        state.edits.push(PendingEdit { seq, edit });
        Ok(())
    }

    /// 丢弃全部暂存编辑
    pub fn discard_changes(&self) -> DatastoreResult<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if !state.edits.is_empty() {
            info!("会话 {} 丢弃 {} 个暂存编辑", self.id, state.edits.len());
            state.edits.clear();
        }
        Ok(())
    }

    /// 重新读取数据存储代数，提交冲突后据此重试
    pub async fn refresh(&self) -> DatastoreResult<u64> {
        self.ensure_mutable("refresh")?;
        let generation = self.backend.generation(self.datastore).await?;
        let previous = std::mem::replace(&mut self.state.lock().generation, generation);
        if previous != generation {
            debug!("会话 {} 代数更新: {} -> {}", self.id, previous, generation);
        }
        Ok(generation)
    }

    /// 关闭会话，丢弃未提交的编辑
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let discarded = state.edits.len();
        state.edits.clear();
        info!("关闭会话: {} (丢弃 {} 个暂存编辑)", self.id, discarded);
    }

    /// 读取节点：已提交状态叠加本会话的暂存编辑
    pub async fn get_item(&self, xpath: &str) -> DatastoreResult<Option<Value>> {
        self.ensure_open()?;
        let xpath = XPath::parse(xpath)?;
        let tree = self.module_view(xpath.module()).await?;
        Ok(tree.get(&xpath).cloned())
    }

    /// 读取过滤器覆盖的全部节点，按文档顺序
    pub async fn get_items(&self, xpath_filter: &str) -> DatastoreResult<Vec<(XPath, Value)>> {
        self.ensure_open()?;
        let filter = XPathFilter::parse(xpath_filter)?;
        let tree = self.module_view(filter.module_name()).await?;
        Ok(tree
            .into_iter()
            .filter(|(path, _)| filter.covers(path))
            .collect())
    }

    async fn module_view(&self, module: &str) -> DatastoreResult<ConfigTree> {
        let snapshot = self.backend.read(self.datastore, module).await?;
        let edits: Vec<Edit> = self
            .state
            .lock()
            .edits
            .iter()
            .filter(|p| p.edit.module() == module)
            .map(|p| p.edit.clone())
            .collect();

        let mut tree = snapshot.tree;
        for edit in &edits {
            edit.apply(&mut tree, self.options.wildcard_delete);
        }
        Ok(tree)
    }

    /// 复制配置，直接交给存储后端
    ///
    /// 复制到本会话的数据存储时，如果复制前会话代数是最新的，会话采用复制后的代数，
    /// 之后的提交不会因为这次复制而冲突。其他会话造成的代数落后仍然保留。
    pub async fn copy_config(
        &self,
        module: Option<&str>,
        from: Datastore,
        to: Datastore,
    ) -> DatastoreResult<()> {
        self.ensure_mutable("copy_config")?;
        if let Some(module) = module {
            self.validator.validate_module(module)?;
        }
        if to != self.datastore {
            return self.backend.copy_config(module, from, to).await;
        }

        let _commit = self.commit_lock.lock().await;
        let before = self.backend.generation(to).await?;
        self.backend.copy_config(module, from, to).await?;
        let after = self.backend.generation(to).await?;

        let mut state = self.state.lock();
        if state.generation == before && after != before {
            debug!("会话 {} 复制后代数更新: {} -> {}", self.id, before, after);
            state.generation = after;
        }
        Ok(())
    }

    /// 提交暂存编辑
    ///
    /// 依次：解析编辑、验证、计算变更集、投递 `Verify`、带期望代数写入、
    /// 清除已提交的编辑、投递 `Apply`。任何失败都保留暂存编辑，不自动重试。
    pub async fn commit(&self) -> DatastoreResult<CommitOutcome> {
        self.ensure_mutable("commit")?;
        let _commit = self.commit_lock.lock().await;

        let (edits, max_seq, expected) = {
            let state = self.state.lock();
            if state.closed {
                return Err(DatastoreError::invalid_state("会话已关闭"));
            }
            let max_seq = state.edits.last().map(|p| p.seq);
            let edits: Vec<Edit> = state.edits.iter().map(|p| p.edit.clone()).collect();
            (edits, max_seq, state.generation)
        };

        let Some(max_seq) = max_seq else {
            debug!("会话 {} 没有暂存编辑，跳过提交", self.id);
            return Ok(CommitOutcome {
                generation: expected,
                change_sets: Vec::new(),
            });
        };

        let actual = self.backend.generation(self.datastore).await?;
        if actual != expected {
            warn!(
                "提交冲突: 会话 {} 期望代数 {}, 实际代数 {}",
                self.id, expected, actual
            );
            return Err(DatastoreError::CommitConflict { expected, actual });
        }

        info!("会话 {} 开始提交: {} 个编辑", self.id, edits.len());

        let modules: BTreeSet<&str> = edits.iter().map(Edit::module).collect();
        let mut batch = WriteBatch::new();
        let mut change_sets = Vec::new();
        for module in modules {
            let snapshot = self.backend.read(self.datastore, module).await?;
            if snapshot.generation != expected {
                return Err(DatastoreError::CommitConflict {
                    expected,
                    actual: snapshot.generation,
                });
            }

            let mut next = snapshot.tree.clone();
            for edit in edits.iter().filter(|e| e.module() == module) {
                edit.apply(&mut next, self.options.wildcard_delete);
            }
            self.validator.validate(module, &next)?;

            let changes =
                ChangeSet::compute(module, self.datastore, expected, &snapshot.tree, &next);
            if changes.is_empty() {
                debug!("模块 {} 没有变化", module);
                continue;
            }
            debug!("模块 {} 产生 {} 个变更", module, changes.len());
            batch.insert(module, next);
            change_sets.push(Arc::new(changes));
        }

        if change_sets.is_empty() {
            self.clear_committed(max_seq, expected);
            info!("会话 {} 提交完成: 没有变化", self.id);
            return Ok(CommitOutcome {
                generation: expected,
                change_sets,
            });
        }

        for changes in &change_sets {
            self.registry.notify(self, NotifEvent::Verify, changes)?;
        }

        let generation = self.backend.write(self.datastore, batch, expected).await?;
        self.clear_committed(max_seq, generation);
        info!(
            "会话 {} 提交完成: {} 个模块, 新代数 {}",
            self.id,
            change_sets.len(),
            generation
        );

        for changes in &change_sets {
            if let Err(e) = self.registry.notify(self, NotifEvent::Apply, changes) {
                warn!("应用通知失败: {} - {}", changes.module(), e);
            }
        }

        Ok(CommitOutcome {
            generation,
            change_sets,
        })
    }

    /// 移除已提交的编辑；提交期间新暂存的编辑保留
    fn clear_committed(&self, max_seq: u64, generation: u64) {
        let mut state = self.state.lock();
        state.edits.retain(|p| p.seq > max_seq);
        state.generation = generation;
    }

    /// 进入回调作用域，返回的守卫析构时作用域失效
    pub(crate) fn enter_callback_scope(
        &self,
        name: String,
        changes: Arc<ChangeSet>,
    ) -> CallbackContextGuard<'_> {
        let guard = CallbackScope::enter(name);
        *self.callback.lock() = Some(CallbackContext {
            scope: guard.scope().clone(),
            changes,
        });
        CallbackContextGuard {
            slot: &self.callback,
            _scope: guard,
        }
    }

    fn ensure_open(&self) -> DatastoreResult<()> {
        if self.state.lock().closed {
            Err(DatastoreError::invalid_state("会话已关闭"))
        } else {
            Ok(())
        }
    }

    fn ensure_mutable(&self, operation: &str) -> DatastoreResult<()> {
        self.ensure_open()?;
        if self.in_callback() {
            return Err(DatastoreError::invalid_state(format!(
                "变更回调内不能调用 {}",
                operation
            )));
        }
        Ok(())
    }
}

impl EventSession for Session {
    fn session_id(&self) -> Uuid {
        self.id
    }

    fn datastore(&self) -> Datastore {
        self.datastore
    }

    fn get_changes_iter(&self, xpath_filter: &str) -> DatastoreResult<ChangeIterator> {
        let context = self.callback.lock().clone().ok_or_else(|| {
            DatastoreError::invalid_state("get_changes_iter 只能在变更回调内调用")
        })?;
        let filter = XPathFilter::parse(xpath_filter)?;
        Ok(ChangeIterator::new(context.changes, filter, context.scope))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("datastore", &self.datastore)
            .field("backend", &self.backend.name())
            .field("validator", &self.validator.name())
            .field("pending_edits", &state.edits.len())
            .field("generation", &state.generation)
            .field("closed", &state.closed)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
