//! 变更顺序性质测试：提交顺序不影响变更集
use datastore_common::{ChangeEntry, Datastore, Value};
use datastore_impl::Connection;
use proptest::prelude::*;

fn edits_strategy() -> impl Strategy<Value = (Vec<(String, i32)>, Vec<(String, i32)>)> {
    prop::collection::btree_map(("[a-d]{1,2}", "[xyz]"), any::<i32>(), 1..16)
        .prop_map(|edits| {
            edits
                .into_iter()
                .map(|((key, leaf), value)| (format!("/m:c/entry[name='{}']/{}", key, leaf), value))
                .collect::<Vec<_>>()
        })
        .prop_flat_map(|edits| {
            let shuffled = Just(edits.clone()).prop_shuffle();
            (Just(edits), shuffled)
        })
}

async fn commit_in_order(edits: &[(String, i32)]) -> anyhow::Result<Vec<ChangeEntry>> {
    let conn = Connection::builder("order").build();
    let session = conn.open_session(Datastore::Running).await?;
    for (xpath, value) in edits {
        session.set_item(xpath, Value::Int32(*value))?;
    }
    let outcome = session.commit().await?;
    Ok(outcome
        .changes_for("m")
        .map(|changes| changes.entries().to_vec())
        .unwrap_or_default())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_change_set_independent_of_submission_order((ordered, shuffled) in edits_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (expected, actual) = runtime.block_on(async {
            let expected = commit_in_order(&ordered).await.unwrap();
            let actual = commit_in_order(&shuffled).await.unwrap();
            (expected, actual)
        });

        prop_assert_eq!(&expected, &actual);
        for pair in actual.windows(2) {
            prop_assert!(pair[0].xpath() < pair[1].xpath());
        }
    }
}
