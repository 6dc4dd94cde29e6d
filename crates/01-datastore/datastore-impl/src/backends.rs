//! 存储后端实现

use async_trait::async_trait;
use dashmap::DashMap;
use datastore_abstractions::{DatastoreBackend, Snapshot, WriteBatch};
use datastore_common::{ConfigTree, Datastore, DatastoreError, DatastoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 单个数据存储的内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DatastoreState {
    generation: u64,
    modules: BTreeMap<String, ConfigTree>,
}

impl DatastoreState {
    fn snapshot(&self, module: &str) -> Snapshot {
        Snapshot {
            tree: self.modules.get(module).cloned().unwrap_or_default(),
            generation: self.generation,
        }
    }

    fn check_generation(&self, expected: u64) -> DatastoreResult<()> {
        if self.generation == expected {
            Ok(())
        } else {
            Err(DatastoreError::CommitConflict {
                expected,
                actual: self.generation,
            })
        }
    }

    /// 应用批次并推进代数
    fn apply(&mut self, batch: WriteBatch) -> u64 {
        for (module, tree) in batch {
            if tree.is_empty() {
                self.modules.remove(&module);
            } else {
                self.modules.insert(module, tree);
            }
        }
        self.generation += 1;
        self.generation
    }

    /// 复制模块数据，返回复制后的批次
    fn export(&self, module: Option<&str>) -> WriteBatch {
        let mut batch = WriteBatch::new();
        match module {
            Some(module) => {
                batch.insert(module, self.modules.get(module).cloned().unwrap_or_default());
            }
            None => {
                for (name, tree) in &self.modules {
                    batch.insert(name.clone(), tree.clone());
                }
            }
        }
        batch
    }
}

/// 进程内存储后端
///
/// 每个数据存储一个条目，写入在条目锁内完成代数检查和替换。
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    datastores: DashMap<Datastore, DatastoreState>,
}

impl InMemoryBackend {
    /// 创建空的内存后端
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatastoreBackend for InMemoryBackend {
    async fn read(&self, datastore: Datastore, module: &str) -> DatastoreResult<Snapshot> {
        let snapshot = self
            .datastores
            .get(&datastore)
            .map(|state| state.snapshot(module))
            .unwrap_or_default();
        debug!(
            "读取模块数据: {}@{} ({} 个节点, 代数 {})",
            module,
            datastore,
            snapshot.tree.len(),
            snapshot.generation
        );
        Ok(snapshot)
    }

    async fn generation(&self, datastore: Datastore) -> DatastoreResult<u64> {
        Ok(self
            .datastores
            .get(&datastore)
            .map_or(0, |state| state.generation))
    }

    async fn write(
        &self,
        datastore: Datastore,
        batch: WriteBatch,
        expected_generation: u64,
    ) -> DatastoreResult<u64> {
        let mut state = self.datastores.entry(datastore).or_default();
        state.check_generation(expected_generation)?;

        let modules = batch.len();
        let generation = state.apply(batch);
        debug!("写入数据存储 {}: {} 个模块, 新代数 {}", datastore, modules, generation);
        Ok(generation)
    }

    async fn copy_config(
        &self,
        module: Option<&str>,
        from: Datastore,
        to: Datastore,
    ) -> DatastoreResult<()> {
        if from == to {
            return Ok(());
        }

        // 先导出再写入，避免同时持有两个条目的锁
        let batch = self
            .datastores
            .get(&from)
            .map(|state| state.export(module))
            .unwrap_or_else(|| DatastoreState::default().export(module));

        let mut target = self.datastores.entry(to).or_default();
        let generation = target.apply(batch);
        info!(
            "复制配置: {} -> {} (模块: {}), 新代数 {}",
            from,
            to,
            module.unwrap_or("*"),
            generation
        );
        Ok(())
    }

    async fn modules(&self, datastore: Datastore) -> DatastoreResult<Vec<String>> {
        Ok(self
            .datastores
            .get(&datastore)
            .map(|state| state.modules.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "InMemoryBackend"
    }
}

/// JSON 文件存储后端
///
/// 每个数据存储对应数据目录下的一个 `<datastore>.json` 文件。
/// 写入先落到临时文件再原子重命名，`write` 返回时数据已经持久化。
#[derive(Debug)]
pub struct JsonFileBackend {
    data_dir: PathBuf,
    state: Mutex<BTreeMap<Datastore, DatastoreState>>,
}

impl JsonFileBackend {
    /// 打开数据目录，目录不存在时创建
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> DatastoreResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&data_dir).await?;

        let mut state = BTreeMap::new();
        for datastore in Datastore::ALL {
            let path = Self::file_path(&data_dir, datastore);
            match tokio::fs::read(&path).await {
                Ok(content) => {
                    let loaded: DatastoreState = serde_json::from_slice(&content)?;
                    debug!(
                        "加载数据存储文件: {} (代数 {})",
                        path.display(),
                        loaded.generation
                    );
                    state.insert(datastore, loaded);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!("JSON 文件存储已打开: {}", data_dir.display());
        Ok(Self {
            data_dir,
            state: Mutex::new(state),
        })
    }

    /// 数据目录
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn file_path(data_dir: &Path, datastore: Datastore) -> PathBuf {
        data_dir.join(format!("{}.json", datastore.as_str()))
    }

    async fn persist(&self, datastore: Datastore, state: &DatastoreState) -> DatastoreResult<()> {
        let path = Self::file_path(&self.data_dir, datastore);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(state)?;

        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            warn!("替换数据存储文件失败: {} - {}", path.display(), e);
            return Err(e.into());
        }
        debug!("数据存储已持久化: {} (代数 {})", path.display(), state.generation);
        Ok(())
    }
}

#[async_trait]
impl DatastoreBackend for JsonFileBackend {
    async fn read(&self, datastore: Datastore, module: &str) -> DatastoreResult<Snapshot> {
        let state = self.state.lock().await;
        Ok(state
            .get(&datastore)
            .map(|s| s.snapshot(module))
            .unwrap_or_default())
    }

    async fn generation(&self, datastore: Datastore) -> DatastoreResult<u64> {
        let state = self.state.lock().await;
        Ok(state.get(&datastore).map_or(0, |s| s.generation))
    }

    async fn write(
        &self,
        datastore: Datastore,
        batch: WriteBatch,
        expected_generation: u64,
    ) -> DatastoreResult<u64> {
        let mut state = self.state.lock().await;
        let current = state.get(&datastore).cloned().unwrap_or_default();
        current.check_generation(expected_generation)?;

        // 持久化成功后才替换内存状态
        let mut next = current;
        let generation = next.apply(batch);
        self.persist(datastore, &next).await?;
        state.insert(datastore, next);
        Ok(generation)
    }

    async fn copy_config(
        &self,
        module: Option<&str>,
        from: Datastore,
        to: Datastore,
    ) -> DatastoreResult<()> {
        if from == to {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let batch = state.get(&from).cloned().unwrap_or_default().export(module);
        let mut next = state.get(&to).cloned().unwrap_or_default();
        let generation = next.apply(batch);
        self.persist(to, &next).await?;
        state.insert(to, next);

        info!(
            "复制配置: {} -> {} (模块: {}), 新代数 {}",
            from,
            to,
            module.unwrap_or("*"),
            generation
        );
        Ok(())
    }

    async fn modules(&self, datastore: Datastore) -> DatastoreResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .get(&datastore)
            .map(|s| s.modules.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "JsonFileBackend"
    }

    fn is_durable(&self) -> bool {
        true
    }
}
