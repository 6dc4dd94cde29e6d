//! 数据存储通知核心的集成测试
use datastore_abstractions::{CallbackStatus, EventSession, NotifEvent, SubscriptionFlags};
use datastore_common::{ChangeOperation, Datastore, DatastoreError, DatastoreResult, Value};
use datastore_impl::{Connection, OperationCheck, RuleSchemaValidator, Session, Subscribe};
use std::sync::Arc;

const MODULE_NAME: &str = "swig-test-cpp-changes";
const LOW_BOUND: i32 = 10;
const HIGH_BOUND: i32 = 20;

fn test_name(i: i32) -> String {
    format!("test-cpp-{}", i)
}

fn xpath(test_name: &str, node_name: &str) -> String {
    format!(
        "/{}:cpp-changes/test-get[name='{}']/{}",
        MODULE_NAME, test_name, node_name
    )
}

fn connection() -> Connection {
    let validator = RuleSchemaValidator::new().with_module(MODULE_NAME);
    Connection::builder("test changes")
        .validator(Arc::new(validator))
        .build()
}

fn nop_callback() -> Arc<impl Fn(&dyn EventSession, &str, NotifEvent) -> CallbackStatus + Send + Sync> {
    Arc::new(|_: &dyn EventSession, _: &str, _: NotifEvent| CallbackStatus::Ok)
}

/// 写入 10 个列表条目并复制到启动数据存储
async fn init_test(session: &Arc<Session>) -> anyhow::Result<()> {
    let subscribe = Subscribe::new(Arc::clone(session));
    subscribe.module_change_subscribe(
        MODULE_NAME,
        nop_callback(),
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

async fn clean_test(session: &Session) -> anyhow::Result<()> {
    session.delete_item(&format!("/{}:*", MODULE_NAME))?;
    session.commit().await?;
    Ok(())
}

/// 订阅操作类型检查回调后执行一次编辑并提交
async fn run_scenario<F>(
    session: &Arc<Session>,
    expected: ChangeOperation,
    edit: F,
) -> anyhow::Result<Arc<OperationCheck>>
where
    F: FnOnce(&Session) -> DatastoreResult<()>,
{
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
    Ok(check)
}

#[tokio::test]
async fn test_module_change_scenarios() -> anyhow::Result<()> {
    let conn = connection();
    let session = conn.open_session(Datastore::Running).await?;

    clean_test(&session).await?;
    let delete = run_scenario(&session, ChangeOperation::Deleted, |s| {
        s.delete_item(&xpath(&test_name(LOW_BOUND), "number"))
    })
    .await?;
    assert_eq!(delete.checked_count(), 1);
    assert_eq!(delete.violation_count(), 0);

    clean_test(&session).await?;
    let modify = run_scenario(&session, ChangeOperation::Modified, |s| {
        s.set_item(&xpath(&test_name(LOW_BOUND), "number"), Value::Int32(42))
    })
    .await?;
    assert_eq!(modify.checked_count(), 1);
    assert_eq!(modify.violation_count(), 0);

    let create = run_scenario(&session, ChangeOperation::Created, |s| {
        s.set_item(&xpath(&test_name(HIGH_BOUND), "number"), Value::Int32(42))
    })
    .await?;
    assert_eq!(create.checked_count(), 3, "列表条目、键叶子和数值叶子");
    assert_eq!(create.violation_count(), 0);

    assert!(conn.registry().is_empty(), "所有订阅都应已移除");
    Ok(())
}

#[tokio::test]
async fn test_startup_mirrors_running_after_init() -> anyhow::Result<()> {
    let conn = connection();
    let session = conn.open_session(Datastore::Running).await?;
    init_test(&session).await?;

    let startup = conn.open_session(Datastore::Startup).await?;
    let items = startup
        .get_items(&format!("/{}:*", MODULE_NAME))
        .await?;
    let running = session
        .get_items(&format!("/{}:*", MODULE_NAME))
        .await?;
    assert_eq!(items, running);
    // 容器 + 每个条目的列表节点、键叶子和数值叶子
    assert_eq!(items.len(), 1 + 3 * (HIGH_BOUND - LOW_BOUND) as usize);
    Ok(())
}

/// 冲突时刷新代数并重试，直到提交成功
async fn commit_with_retry(conn: &Connection, i: i32) -> DatastoreResult<u64> {
    let session = conn.open_session(Datastore::Running).await?;
    session.set_item(&xpath(&test_name(i), "number"), Value::Int32(i))?;
    loop {
        match session.commit().await {
            Ok(outcome) => return Ok(outcome.generation),
            Err(e) if e.is_conflict() => {
                session.refresh().await?;
            }
            Err(e) => return Err(e),
        }
    }
}

#[tokio::test]
async fn test_concurrent_commits_with_retry() -> anyhow::Result<()> {
    let conn = Arc::new(connection());
    let mut handles = Vec::new();

    for i in 0..4 {
        let conn = Arc::clone(&conn);
        handles.push(tokio::spawn(async move { commit_with_retry(&conn, i).await }));
    }

    let mut generations = Vec::new();
    for handle in handles {
        generations.push(handle.await??);
    }
    generations.sort_unstable();
    assert_eq!(generations, vec![1, 2, 3, 4], "每次成功提交代数加一");

    let reader = conn.open_session(Datastore::Running).await?;
    for i in 0..4 {
        assert_eq!(
            reader.get_item(&xpath(&test_name(i), "number")).await?,
            Some(Value::Int32(i))
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_unknown_module_is_rejected() -> anyhow::Result<()> {
    let conn = connection();
    let session = conn.open_session(Datastore::Running).await?;
    let subscribe = Subscribe::new(Arc::clone(&session));

    let result = subscribe.module_change_subscribe(
        "not-installed",
        nop_callback(),
        None,
        0,
        SubscriptionFlags::DEFAULT,
    );
    assert!(matches!(result, Err(DatastoreError::InvalidPath { .. })));
    assert!(session.delete_item("/not-installed:*").is_err());
    Ok(())
}
