//! # 示例应用程序
//!
//! 对 Cfgstore 通知核心重放模块变更场景：初始化、清理、删除、修改、创建，
//! 每个场景都用回调检查收到的变更类型。

use clap::Parser;
use datastore_abstractions::SubscriptionFlags;
use datastore_common::{
    BackendSettings, ChangeOperation, Datastore, DatastoreResult, DatastoreSettings, Value,
};
use datastore_impl::{
    Connection, LoggingChangeCallback, OperationCheck, RuleSchemaValidator, Session,
    SettingsLoader, Subscribe,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MODULE_NAME: &str = "swig-test-cpp-changes";
const LOW_BOUND: i32 = 10;
const HIGH_BOUND: i32 = 20;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "example-app")]
#[command(about = "Cfgstore 模块变更通知示例")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 使用 JSON 文件后端并指定数据目录
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 日志级别，设置了 RUST_LOG 时以 RUST_LOG 为准
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 打印生效的配置后退出
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日志
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = load_settings(&args)?;
    if args.print_config {
        println!("{}", toml::to_string_pretty(&settings)?);
        return Ok(());
    }

    info!("启动 Cfgstore 示例应用");

    let attempts = settings.commit_retries.max(1);
    for attempt in 1..=attempts {
        match run(&settings).await {
            Ok(()) => {
                info!("全部场景通过");
                return Ok(());
            }
            Err(e) => {
                warn!("第 {}/{} 次运行失败: {:#}", attempt, attempts, e);
                tokio::time::sleep(settings.retry_backoff()).await;
            }
        }
    }

    error!("重试 {} 次后仍然失败", attempts);
    anyhow::bail!("模块变更场景失败")
}

/// 加载配置，命令行参数优先
fn load_settings(args: &Args) -> anyhow::Result<DatastoreSettings> {
    let mut loader = SettingsLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_file(path);
    }

    let mut settings = loader.load()?;
    if let Some(data_dir) = &args.data_dir {
        settings.backend = BackendSettings::Json {
            data_dir: data_dir.clone(),
        };
    }
    Ok(settings)
}

/// 完整运行一遍全部场景
async fn run(settings: &DatastoreSettings) -> anyhow::Result<()> {
    let validator = RuleSchemaValidator::new().with_module(MODULE_NAME);
    let conn = Connection::from_settings("test changes", settings, Arc::new(validator)).await?;
    let session = conn.open_session(Datastore::Running).await?;

    clean_test(&session).await?;
    run_scenario(&session, ChangeOperation::Deleted, |s| {
        s.delete_item(&xpath(&test_name(LOW_BOUND), "number"))
    })
    .await?;

    clean_test(&session).await?;
    run_scenario(&session, ChangeOperation::Modified, |s| {
        s.set_item(&xpath(&test_name(LOW_BOUND), "number"), Value::Int32(42))
    })
    .await?;

    run_scenario(&session, ChangeOperation::Created, |s| {
        s.set_item(&xpath(&test_name(HIGH_BOUND), "number"), Value::Int32(42))
    })
    .await?;

    Ok(())
}

fn test_name(i: i32) -> String {
    format!("test-cpp-{}", i)
}

fn xpath(test_name: &str, node_name: &str) -> String {
    format!(
        "/{}:cpp-changes/test-get[name='{}']/{}",
        MODULE_NAME, test_name, node_name
    )
}

/// 写入初始条目并复制到启动数据存储
async fn init_test(session: &Arc<Session>) -> anyhow::Result<()> {
    let subscribe = Subscribe::new(Arc::clone(session));
    subscribe.module_change_subscribe(
        MODULE_NAME,
        Arc::new(LoggingChangeCallback::new()),
        None,
        0,
        SubscriptionFlags::DEFAULT | SubscriptionFlags::APPLY_ONLY,
    )?;

    for i in LOW_BOUND..HIGH_BOUND {
        session.set_item(&xpath(&test_name(i), "number"), Value::Int32(i))?;
    }
    session.commit().await?;
    session
        .copy_config(Some(MODULE_NAME), Datastore::Running, Datastore::Startup)
        .await?;
    subscribe.unsubscribe();
    Ok(())
}

/// 删除模块的全部数据
async fn clean_test(session: &Session) -> anyhow::Result<()> {
    session.delete_item(&format!("/{}:*", MODULE_NAME))?;
    session.commit().await?;
    Ok(())
}

/// 订阅检查回调后执行一次编辑，要求收到的变更都是期望的操作类型
async fn run_scenario<F>(
    session: &Arc<Session>,
    expected: ChangeOperation,
    edit: F,
) -> anyhow::Result<()>
where
    F: FnOnce(&Session) -> DatastoreResult<()>,
{
    info!("场景开始: {}", expected);
    let subscribe = Subscribe::new(Arc::clone(session));
    let check = Arc::new(OperationCheck::new(expected));

    init_test(session).await?;
    subscribe.module_change_subscribe(
        MODULE_NAME,
        check.clone(),
        None,
        0,
        SubscriptionFlags::DEFAULT | SubscriptionFlags::APPLY_ONLY,
    )?;

    edit(&**session)?;
    session.commit().await?;
    subscribe.unsubscribe();

    if check.checked_count() == 0 {
        anyhow::bail!("场景 {} 没有收到任何变更", expected);
    }
    if check.violation_count() > 0 {
        anyhow::bail!(
            "场景 {} 收到 {} 个不符合的变更",
            expected,
            check.violation_count()
        );
    }
    info!("场景通过: {} ({} 个变更)", expected, check.checked_count());
    Ok(())
}
