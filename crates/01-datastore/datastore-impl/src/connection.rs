//! 数据存储连接

use crate::backends::{InMemoryBackend, JsonFileBackend};
use crate::registry::SubscriptionRegistry;
use crate::session::Session;
use crate::validation::RuleSchemaValidator;
use datastore_abstractions::{DatastoreBackend, SchemaValidator};
use datastore_common::{
    BackendSettings, Datastore, DatastoreResult, DatastoreSettings, SessionOptions,
};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// 数据存储连接
///
/// 持有存储后端、模式验证器和订阅注册表，会话从连接打开并共享这些协作者。
pub struct Connection {
    name: String,
    backend: Arc<dyn DatastoreBackend>,
    validator: Arc<dyn SchemaValidator>,
    registry: Arc<SubscriptionRegistry>,
    options: SessionOptions,
    default_datastore: Datastore,
}

impl Connection {
    /// 创建连接构建器
    pub fn builder(name: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder::new(name)
    }

    /// 按全局配置创建连接
    pub async fn from_settings(
        name: impl Into<String>,
        settings: &DatastoreSettings,
        validator: Arc<dyn SchemaValidator>,
    ) -> DatastoreResult<Self> {
        let backend: Arc<dyn DatastoreBackend> = match &settings.backend {
            BackendSettings::Memory => Arc::new(InMemoryBackend::new()),
            BackendSettings::Json { data_dir } => Arc::new(JsonFileBackend::open(data_dir).await?),
        };

        Ok(Self::builder(name)
            .backend(backend)
            .validator(validator)
            .session_options(settings.session_options())
            .default_datastore(settings.default_datastore)
            .build())
    }

    /// 连接名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 存储后端
    pub fn backend(&self) -> &Arc<dyn DatastoreBackend> {
        &self.backend
    }

    /// 订阅注册表
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// 默认数据存储
    pub fn default_datastore(&self) -> Datastore {
        self.default_datastore
    }

    /// 在指定数据存储上打开会话
    pub async fn open_session(&self, datastore: Datastore) -> DatastoreResult<Arc<Session>> {
        self.open_session_with(datastore, self.options).await
    }

    /// 使用指定选项打开会话
    pub async fn open_session_with(
        &self,
        datastore: Datastore,
        options: SessionOptions,
    ) -> DatastoreResult<Arc<Session>> {
        let session = Session::open(
            datastore,
            options,
            Arc::clone(&self.backend),
            Arc::clone(&self.validator),
            Arc::clone(&self.registry),
        )
        .await?;
        Ok(Arc::new(session))
    }

    /// 在默认数据存储上打开会话
    pub async fn open_default_session(&self) -> DatastoreResult<Arc<Session>> {
        self.open_session(self.default_datastore).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("validator", &self.validator.name())
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("default_datastore", &self.default_datastore)
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        info!("关闭连接: {}", self.name);
        self.registry.clear();
    }
}

/// 连接构建器
pub struct ConnectionBuilder {
    name: String,
    backend: Option<Arc<dyn DatastoreBackend>>,
    validator: Option<Arc<dyn SchemaValidator>>,
    options: SessionOptions,
    default_datastore: Datastore,
}

impl ConnectionBuilder {
    /// 创建构建器，默认使用内存后端和接受任何模块的验证器
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: None,
            validator: None,
            options: SessionOptions::default(),
            default_datastore: Datastore::default(),
        }
    }

    /// 设置存储后端
    pub fn backend(mut self, backend: Arc<dyn DatastoreBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 设置模式验证器
    pub fn validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// 设置会话选项
    pub fn session_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// 设置默认数据存储
    pub fn default_datastore(mut self, datastore: Datastore) -> Self {
        self.default_datastore = datastore;
        self
    }

    /// 构建连接
    pub fn build(self) -> Connection {
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(InMemoryBackend::new()));
        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(RuleSchemaValidator::permissive()));
        info!(
            "创建连接: {} (后端: {}, 验证器: {})",
            self.name,
            backend.name(),
            validator.name()
        );

        Connection {
            name: self.name,
            backend,
            validator,
            registry: Arc::new(SubscriptionRegistry::new()),
            options: self.options,
            default_datastore: self.default_datastore,
        }
    }
}
