//! Dependency-chain scheduling over Postgres stores and the NATS bus.
//!
//! Run with: `cargo test -p depchain-tests --test scheduler_tests --features integration`

#![cfg(feature = "integration")]

use depchain_core::buildset::BuildResult;
use depchain_core::ids::SourceStampId;
use depchain_core::ports::{BuildsetStore, PendingRequestStore, SourceStampRepository};
use depchain_scheduler::{Admission, SchedulerSet};
use depchain_tests::{CHAIN_CONFIG, RequestFixture, StampFixture, TestContext, wait_for};
use std::time::Duration;

async fn builders_for(ctx: &TestContext, ssid: SourceStampId) -> Vec<String> {
    ctx.db
        .buildsets()
        .get_buildsets_for_source_stamp(ssid)
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.builder)
        .collect()
}

async fn complete_builder(set: &SchedulerSet, ctx: &TestContext, ssid: SourceStampId, builder: &str, result: BuildResult) {
    let buildset = ctx
        .db
        .buildsets()
        .get_buildsets_for_source_stamp(ssid)
        .await
        .unwrap()
        .into_iter()
        .find(|b| b.builder == builder && !b.complete)
        .unwrap_or_else(|| panic!("no open buildset for {}", builder));
    set.complete_buildset(buildset.id, result).await.unwrap();
}

#[tokio::test]
async fn test_chain_runs_to_completion_through_listeners() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let set = ctx.scheduler_set(CHAIN_CONFIG).unwrap();
    set.start().await.unwrap();

    let outcome = set.commit(StampFixture::main("abc")).await.unwrap();
    let ssid = outcome.source_stamp.id;
    assert_eq!(outcome.triggered, vec!["main-commits".to_string()]);
    assert_eq!(builders_for(&ctx, ssid).await, vec!["Update-Scripts"]);

    complete_builder(&set, &ctx, ssid, "Update-Scripts", BuildResult::Success).await;
    assert!(
        wait_for(Duration::from_secs(10), Duration::from_millis(50), || async {
            builders_for(&ctx, ssid).await.contains(&"Build-Compile".to_string())
        })
        .await,
        "compile was not admitted after update completed"
    );

    complete_builder(&set, &ctx, ssid, "Build-Compile", BuildResult::Success).await;
    assert!(
        wait_for(Duration::from_secs(10), Duration::from_millis(50), || async {
            builders_for(&ctx, ssid).await.contains(&"Test-Unit".to_string())
        })
        .await,
        "test was not admitted after compile completed"
    );

    assert!(ctx.db.pending().list_pending_requests("test").await.unwrap().is_empty());
    set.stop().await;
}

#[tokio::test]
async fn test_failed_dependency_keeps_request_pending() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let set = ctx.scheduler_set(CHAIN_CONFIG).unwrap();
    set.start().await.unwrap();

    let stamp = ctx
        .db
        .source_stamps()
        .create(&StampFixture::main("def"))
        .await
        .unwrap();
    let admission = set
        .submit("compile", stamp.id, &RequestFixture::manual())
        .await
        .unwrap();
    assert!(matches!(admission, Admission::Waiting { .. }));

    complete_builder(&set, &ctx, stamp.id, "Update-Scripts", BuildResult::Failure).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(builders_for(&ctx, stamp.id).await, vec!["Update-Scripts"]);
    assert_eq!(
        ctx.db
            .pending()
            .get_pending_requests(stamp.id, "compile")
            .await
            .unwrap()
            .len(),
        1
    );
    set.stop().await;
}

#[tokio::test]
async fn test_restart_reconciles_missed_completion() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let stamp = ctx
        .db
        .source_stamps()
        .create(&StampFixture::main("ghi"))
        .await
        .unwrap();

    // No listeners yet: the completion event goes unobserved.
    let set = ctx.scheduler_set(CHAIN_CONFIG).unwrap();
    set.submit("compile", stamp.id, &RequestFixture::with_revision("ghi"))
        .await
        .unwrap();
    complete_builder(&set, &ctx, stamp.id, "Update-Scripts", BuildResult::Success).await;
    assert!(!builders_for(&ctx, stamp.id).await.contains(&"Build-Compile".to_string()));

    let restarted = ctx.scheduler_set(CHAIN_CONFIG).unwrap();
    let summary = restarted.start().await.unwrap();

    assert_eq!(summary.admitted, 1);
    assert!(builders_for(&ctx, stamp.id).await.contains(&"Build-Compile".to_string()));
    restarted.stop().await;
}
